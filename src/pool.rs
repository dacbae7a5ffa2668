//! Connection pools, one per distinct connection descriptor.
use std::{collections::HashMap, fmt, io, sync::Arc, time::Duration};

use deadpool::managed::{self, Metrics, Pool, QueueMode, RecycleError, RecycleResult};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError};
use parking_lot::{Mutex, RwLock};
use rustls::ClientConfig;
use tracing::{debug, warn};

use crate::{
	config::{DirectoryConfig, TlsMode},
	error::Error,
	ldap::{DirectoryConnector, LdapDirectory},
	trust,
};

/// A pool of bound directory connections.
pub type LdapPool = Pool<LdapConnectionManager>;

/// The part of a [`DirectoryConfig`] that decides which pool serves it.
/// Configs differing only in search bases, filters or attribute names
/// share a pool.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
	/// Directory host
	pub host: String,
	/// Directory port
	pub port: u16,
	/// How the connection is secured
	pub tls_mode: TlsMode,
	/// DN pooled connections bind with
	pub manager_dn: Option<String>,
	/// Password for the manager DN
	pub password: Option<String>,
	/// Trimmed PEM certificate to trust
	pub certificate: Option<String>,
	/// Whether start-TLS was requested
	pub start_tls: bool,
}

impl ConnectionDescriptor {
	/// Extract the descriptor of a directory config.
	pub fn from_config(config: &DirectoryConfig) -> Result<Self, Error> {
		let host = config
			.host()
			.ok_or_else(|| Error::Configuration(format!("No host in url `{}`", config.url)))?;

		Ok(Self {
			host: host.to_owned(),
			port: config.port(),
			tls_mode: config.tls_mode(),
			manager_dn: config.manager_dn.clone().filter(|dn| !dn.trim().is_empty()),
			password: config.password.clone().filter(|password| !password.is_empty()),
			certificate: config.certificate().map(str::to_owned),
			start_tls: config.start_tls,
		})
	}

	/// URL to open connections with.
	#[must_use]
	pub fn url(&self) -> String {
		let scheme = match self.tls_mode {
			TlsMode::Implicit => "ldaps",
			TlsMode::None | TlsMode::StartTls => "ldap",
		};
		format!("{scheme}://{}:{}", self.host, self.port)
	}

	/// Manager DN and password, if both are set.
	fn credentials(&self) -> Option<(String, String)> {
		Some((self.manager_dn.clone()?, self.password.clone()?))
	}
}

impl fmt::Debug for ConnectionDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionDescriptor")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("tls_mode", &self.tls_mode)
			.field("manager_dn", &self.manager_dn)
			.field("password", &self.password.as_ref().map(|_| "********"))
			.field("certificate", &self.certificate.is_some())
			.field("start_tls", &self.start_tls)
			.finish()
	}
}

/// Sizing and eviction of each pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
	/// Maximum number of connections, idle and checked out
	pub max_size: usize,
	/// Maximum number of idle connections kept
	pub max_idle: usize,
	/// Idle connections the pool keeps open ahead of demand. Connections are
	/// created lazily, so anything but 0 has no effect.
	pub min_idle: usize,
	/// Connections idle for longer are closed
	pub idle_timeout: Duration,
	/// Order idle connections are handed out in
	pub queue_mode: QueueMode,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			max_size: 250,
			max_idle: 50,
			min_idle: 0,
			idle_timeout: Duration::from_secs(30 * 60),
			queue_mode: QueueMode::Lifo,
		}
	}
}

/// Opens directory connections and binds them with the pool identity.
pub struct LdapConnectionManager {
	/// Target of the connections
	descriptor: ConnectionDescriptor,
	/// Connection settings, including the TLS config
	settings: LdapConnSettings,
	/// Connections idle for longer are not recycled
	idle_timeout: Duration,
}

impl fmt::Debug for LdapConnectionManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapConnectionManager")
			.field("descriptor", &self.descriptor)
			.field("idle_timeout", &self.idle_timeout)
			.finish_non_exhaustive()
	}
}

impl LdapConnectionManager {
	/// Create a manager for `descriptor`. `tls` is required unless the
	/// descriptor uses a plain connection.
	fn new(
		descriptor: ConnectionDescriptor,
		tls: Option<Arc<ClientConfig>>,
		idle_timeout: Duration,
	) -> Self {
		let mut settings =
			LdapConnSettings::new().set_starttls(descriptor.tls_mode == TlsMode::StartTls);
		if let Some(tls) = tls {
			settings = settings.set_config(tls);
		}
		Self { descriptor, settings, idle_timeout }
	}

	/// Bind `ldap` with the pool identity: the manager DN if configured,
	/// anonymous otherwise.
	pub(crate) async fn restore(&self, ldap: &mut Ldap) -> Result<(), Error> {
		let (dn, password) = self.descriptor.credentials().unwrap_or_default();
		let result = ldap.simple_bind(&dn, &password).await.map_err(classify)?;
		if result.rc != 0 {
			return Err(self.creation_error(format!(
				"Binding as `{dn}` failed with code {}: {}",
				result.rc, result.text
			)));
		}
		Ok(())
	}

	/// Wrap a failure to set up a connection.
	fn creation_error(&self, reason: String) -> Error {
		Error::PoolCreation {
			host: self.descriptor.host.clone(),
			port: self.descriptor.port,
			reason,
		}
	}
}

impl managed::Manager for LdapConnectionManager {
	type Type = Ldap;
	type Error = Error;

	async fn create(&self) -> Result<Ldap, Error> {
		let url = self.descriptor.url();
		debug!(%url, "Opening directory connection");
		let (conn, mut ldap) = LdapConnAsync::with_settings(self.settings.clone(), &url)
			.await
			.map_err(|err| match classify(err) {
				err @ Error::TlsHandshake(_) => err,
				Error::Connection(reason) => self.creation_error(reason),
				err => self.creation_error(err.to_string()),
			})?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});

		self.restore(&mut ldap).await?;
		Ok(ldap)
	}

	async fn recycle(&self, ldap: &mut Ldap, metrics: &Metrics) -> RecycleResult<Error> {
		if ldap.is_closed() {
			return Err(RecycleError::Message("Connection is closed".into()));
		}
		if metrics.last_used() > self.idle_timeout {
			return Err(RecycleError::Message("Connection idle for too long".into()));
		}
		Ok(())
	}
}

/// Sort an [`LdapError`] into the crate's connectivity errors. TLS failures
/// surface from the transport as I/O errors wrapping a [`rustls::Error`].
pub(crate) fn classify(err: LdapError) -> Error {
	match err {
		LdapError::Io { source } if is_tls_error(&source) => Error::TlsHandshake(source.to_string()),
		LdapError::Io { source } => Error::Connection(source.to_string()),
		err => Error::Ldap(err),
	}
}

/// Whether an I/O error is a failed TLS handshake.
fn is_tls_error(err: &io::Error) -> bool {
	err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
}

/// Registry handing out one pool per [`ConnectionDescriptor`].
///
/// Pools are created on first use and kept for the lifetime of the registry.
/// Concurrent first use of the same descriptor creates a single pool;
/// different descriptors never wait on each other. Failed creations are not
/// remembered, the next request retries.
#[derive(Default)]
pub struct PoolRegistry {
	/// Settings every pool is built with
	settings: PoolSettings,
	/// Registered pools
	pools: RwLock<HashMap<ConnectionDescriptor, LdapPool>>,
	/// Per-descriptor creation locks
	locks: Mutex<HashMap<ConnectionDescriptor, Arc<Mutex<()>>>>,
	/// TLS configs by certificate text, `None` for the platform roots
	trust: Mutex<HashMap<Option<String>, Arc<ClientConfig>>>,
}

impl fmt::Debug for PoolRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PoolRegistry")
			.field("settings", &self.settings)
			.field("pools", &self.pools.read().keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

impl PoolRegistry {
	/// Create an empty registry with default [`PoolSettings`].
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Create an empty registry building pools with `settings`.
	#[must_use]
	pub fn with_settings(settings: PoolSettings) -> Self {
		Self { settings, ..Self::default() }
	}

	/// Settings pools are built with.
	#[must_use]
	pub const fn settings(&self) -> PoolSettings {
		self.settings
	}

	/// Get the pool for `descriptor`, creating it if it doesn't exist yet.
	pub fn get_or_create(&self, descriptor: &ConnectionDescriptor) -> Result<LdapPool, Error> {
		if let Some(pool) = self.lookup(descriptor) {
			return Ok(pool);
		}

		let lock = Arc::clone(self.locks.lock().entry(descriptor.clone()).or_default());
		let _guard = lock.lock();
		if let Some(pool) = self.lookup(descriptor) {
			return Ok(pool);
		}

		let pool = self.build(descriptor).map_err(|reason| Error::PoolCreation {
			host: descriptor.host.clone(),
			port: descriptor.port,
			reason,
		})?;
		debug!(?descriptor, "Created connection pool");
		self.pools.write().insert(descriptor.clone(), pool.clone());
		Ok(pool)
	}

	/// Number of registered pools.
	#[must_use]
	pub fn len(&self) -> usize {
		self.pools.read().len()
	}

	/// Whether no pool is registered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.pools.read().is_empty()
	}

	/// Close and forget every pool.
	pub fn clear(&self) {
		for (_, pool) in self.pools.write().drain() {
			pool.close();
		}
		self.locks.lock().clear();
		self.trust.lock().clear();
	}

	/// Registered pool for `descriptor`.
	fn lookup(&self, descriptor: &ConnectionDescriptor) -> Option<LdapPool> {
		self.pools.read().get(descriptor).cloned()
	}

	/// Build a new pool.
	fn build(&self, descriptor: &ConnectionDescriptor) -> Result<LdapPool, String> {
		let tls = match descriptor.tls_mode {
			TlsMode::None => None,
			TlsMode::Implicit | TlsMode::StartTls => Some(
				self.trust_config(descriptor.certificate.as_deref()).map_err(|err| err.to_string())?,
			),
		};

		let manager = LdapConnectionManager::new(descriptor.clone(), tls, self.settings.idle_timeout);
		Pool::builder(manager)
			.max_size(self.settings.max_size)
			.queue_mode(self.settings.queue_mode)
			.build()
			.map_err(|err| err.to_string())
	}

	/// TLS config for `certificate`, built once per distinct certificate.
	fn trust_config(&self, certificate: Option<&str>) -> Result<Arc<ClientConfig>, Error> {
		let key = certificate.map(str::to_owned);
		if let Some(config) = self.trust.lock().get(&key) {
			return Ok(Arc::clone(config));
		}

		let config = trust::client_config(certificate)?;
		self.trust.lock().insert(key, Arc::clone(&config));
		Ok(config)
	}
}

impl DirectoryConnector for PoolRegistry {
	type Directory = LdapDirectory;

	fn connect(&self, config: &DirectoryConfig) -> Result<LdapDirectory, Error> {
		let descriptor = ConnectionDescriptor::from_config(config)?;
		let pool = self.get_or_create(&descriptor)?;
		Ok(LdapDirectory::new(pool, self.settings))
	}
}
