//! Access to a directory: the seams the search engine works against and
//! their pooled LDAP implementation.

use std::{cell::Cell, fmt, time::Duration};

use async_trait::async_trait;
use deadpool::managed::{Object, PoolError};
use ldap3::{LdapError, LdapResult, Scope, SearchEntry, SearchOptions, SearchResult};
use tracing::{debug, warn};

use crate::{
	config::DirectoryConfig,
	error::Error,
	pool::{classify, LdapConnectionManager, LdapPool, PoolSettings},
};

/// Result code of a search that hit its size limit. The entries returned so
/// far are still valid.
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// A single subtree search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
	/// Root of the searched subtree
	pub base: String,
	/// Search filter
	pub filter: String,
	/// Attributes to return
	pub attributes: Vec<String>,
	/// Maximum number of entries, 0 for unlimited
	pub size_limit: usize,
	/// Time limit enforced by the server
	pub time_limit: Duration,
}

/// A directory reachable with the settings of one [`DirectoryConfig`].
#[async_trait]
pub trait Directory: Send + Sync {
	/// Run a subtree search.
	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, Error>;

	/// Check `password` for `dn`. A rejected bind is
	/// [`Error::InvalidCredentials`].
	async fn bind(&self, dn: &str, password: &str) -> Result<(), Error>;
}

/// Opens [`Directory`] handles for directory configs.
pub trait DirectoryConnector: Send + Sync {
	/// The directory handle type
	type Directory: Directory;

	/// Get a handle for `config`.
	fn connect(&self, config: &DirectoryConfig) -> Result<Self::Directory, Error>;
}

/// [`Directory`] backed by a connection pool.
#[derive(Clone)]
pub struct LdapDirectory {
	/// Pool of connections bound with the pool identity
	pool: LdapPool,
	/// Eviction settings
	settings: PoolSettings,
}

impl fmt::Debug for LdapDirectory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapDirectory")
			.field("manager", self.pool.manager())
			.field("status", &self.pool.status())
			.finish()
	}
}

impl LdapDirectory {
	/// Wrap a pool.
	#[must_use]
	pub fn new(pool: LdapPool, settings: PoolSettings) -> Self {
		Self { pool, settings }
	}

	/// Close idle connections past the idle timeout, and any beyond the
	/// idle cap.
	fn prune(&self) {
		let kept = Cell::new(0_usize);
		let removed = Cell::new(0_usize);
		self.pool.retain(|_, metrics| {
			let retain = metrics.last_used() <= self.settings.idle_timeout
				&& kept.get() < self.settings.max_idle;
			if retain {
				kept.set(kept.get() + 1);
			} else {
				removed.set(removed.get() + 1);
			}
			retain
		});
		if removed.get() > 0 {
			debug!(removed = removed.get(), "Closed idle directory connections");
		}
	}

	/// Check a connection out of the pool, waiting if all are in use.
	async fn checkout(&self) -> Result<Object<LdapConnectionManager>, Error> {
		self.prune();
		self.pool.get().await.map_err(|err| match err {
			PoolError::Backend(err) => err,
			err => Error::Connection(err.to_string()),
		})
	}
}

#[async_trait]
impl Directory for LdapDirectory {
	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, Error> {
		let mut ldap = self.checkout().await?;
		let options = SearchOptions::new()
			.sizelimit(i32::try_from(request.size_limit).unwrap_or(i32::MAX))
			.timelimit(i32::try_from(request.time_limit.as_secs()).unwrap_or(i32::MAX));

		let SearchResult(entries, result) = ldap
			.with_search_options(options)
			.search(&request.base, Scope::Subtree, &request.filter, request.attributes.clone())
			.await
			.map_err(classify)?;
		if result.rc != SIZE_LIMIT_EXCEEDED {
			result.success()?;
		}

		Ok(entries.into_iter().map(SearchEntry::construct).collect())
	}

	async fn bind(&self, dn: &str, password: &str) -> Result<(), Error> {
		let mut ldap = self.checkout().await?;
		let outcome = bind_outcome(dn, ldap.simple_bind(dn, password).await);

		if let Err(err) = self.pool.manager().restore(&mut ldap).await {
			warn!("Failed to restore pool identity, closing connection: {err}");
			let mut ldap = Object::take(ldap);
			if let Err(err) = ldap.unbind().await {
				debug!("Unbind failed: {err}");
			}
		}
		outcome
	}
}

/// Outcome of a user bind. Any result code but success rejects the
/// credentials of `dn`, whether they are wrong, locked or expired; only
/// transport failures keep their own kind.
fn bind_outcome(dn: &str, result: Result<LdapResult, LdapError>) -> Result<(), Error> {
	match result {
		Ok(result) if result.rc == 0 => Ok(()),
		Ok(result) => {
			debug!(%dn, rc = result.rc, text = %result.text, "Bind rejected");
			Err(Error::InvalidCredentials { dn: dn.to_owned() })
		}
		Err(err) => Err(classify(err)),
	}
}
