//! Searches and binds against the directory of one [`DirectoryConfig`].
use ldap3::SearchEntry;
use tracing::{debug, error};

use crate::{
	config::DirectoryConfig,
	error::Error,
	filter,
	ldap::{Directory, SearchRequest},
};

/// Search engine for a single directory.
///
/// Search bases are always visited one after the other in configured order.
/// A failing base is logged and skipped; the remaining bases are still
/// searched.
#[derive(Debug)]
pub struct DirectorySearch<'a, D> {
	/// Settings of the directory
	config: &'a DirectoryConfig,
	/// Handle to the directory
	directory: &'a D,
}

impl<'a, D: Directory> DirectorySearch<'a, D> {
	/// Create a search engine for `config`, using `directory` for access.
	#[must_use]
	pub const fn new(config: &'a DirectoryConfig, directory: &'a D) -> Self {
		Self { config, directory }
	}

	/// Look up the entry of `username` and bind with its DN and `password`.
	/// On success the entry is handed to `mapper`. A blank password is
	/// rejected without binding.
	pub async fn authenticate<T, F>(&self, username: &str, password: &str, mapper: F) -> Result<T, Error>
	where
		F: FnOnce(SearchEntry) -> Result<T, Error>,
	{
		let entry = self.find_user(username).await?;
		// A simple bind without password is an unauthenticated bind, which
		// most servers accept.
		if password.is_empty() {
			return Err(Error::InvalidCredentials { dn: entry.dn });
		}
		debug!(dn = %entry.dn, "Binding as user");
		self.directory.bind(&entry.dn, password).await?;
		mapper(entry)
	}

	/// Look up the entry of `username` without binding.
	pub async fn search_user<T, F>(&self, username: &str, mapper: F) -> Result<T, Error>
	where
		F: FnOnce(SearchEntry) -> Result<T, Error>,
	{
		mapper(self.find_user(username).await?)
	}

	/// Search all search bases with `template`, its positional placeholders
	/// replaced by the escaped `args`. Stops once `max_results` entries are
	/// found; 0 searches every base in full.
	pub async fn search<T, F>(
		&self,
		template: &str,
		args: &[&str],
		mapper: F,
		max_results: usize,
	) -> Result<Vec<T>, Error>
	where
		F: Fn(SearchEntry) -> Result<T, Error>,
	{
		let filter = filter::format(template, args)?;
		let mut results = Vec::new();

		for base in &self.config.search_bases {
			let size_limit = if max_results == 0 {
				0
			} else {
				match max_results.saturating_sub(results.len()) {
					0 => break,
					remaining => remaining,
				}
			};

			let request = self.request(base, &filter, "*", size_limit);
			match self.directory.search(&request).await {
				Ok(entries) => {
					let limit = if size_limit == 0 { usize::MAX } else { size_limit };
					for entry in entries.into_iter().take(limit) {
						results.push(mapper(entry)?);
					}
				}
				Err(err) => error!(%base, %filter, "Search failed: {err}"),
			}
		}

		Ok(results)
	}

	/// Search `search_bases` with a prebuilt group membership `filter`,
	/// returning only DNs and without a size limit.
	pub async fn search_group<T, F>(
		&self,
		search_bases: &[String],
		filter: &str,
		mapper: F,
	) -> Result<Vec<T>, Error>
	where
		F: Fn(SearchEntry) -> Result<T, Error>,
	{
		let mut results = Vec::new();
		for base in search_bases {
			let request = self.request(base, filter, "dn", 0);
			match self.directory.search(&request).await {
				Ok(entries) => {
					for entry in entries {
						results.push(mapper(entry)?);
					}
				}
				Err(err) => error!(%base, %filter, "Group search failed: {err}"),
			}
		}
		Ok(results)
	}

	/// Probe the directory with a single user search in the first search
	/// base. Errors are returned, not logged.
	pub async fn verify_connection(&self) -> Result<(), Error> {
		let base = self.config.search_bases.first().ok_or_else(|| {
			Error::Configuration("At least one search base is required".to_owned())
		})?;
		let filter = filter::format(&self.config.user_search_filter(), &["test"])?;
		self.directory.search(&self.request(base, &filter, "*", 1)).await?;
		Ok(())
	}

	/// The first entry matching the login filter. Search bases are scanned in
	/// order, so the first base holding the username wins.
	async fn find_user(&self, username: &str) -> Result<SearchEntry, Error> {
		self.search(&self.config.user_login_filter(), &[username], Ok, 1)
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| Error::UserNotFound {
				username: username.to_owned(),
				url: self.config.url.to_string(),
			})
	}

	/// A subtree search of `base` with the configured time limit.
	fn request(&self, base: &str, filter: &str, attribute: &str, size_limit: usize) -> SearchRequest {
		SearchRequest {
			base: base.to_owned(),
			filter: filter.to_owned(),
			attributes: vec![attribute.to_owned()],
			size_limit,
			time_limit: self.config.search_timeout(),
		}
	}
}
