//! Error codes

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The directory configuration is unusable, e.g. start-TLS combined with
	/// an `ldaps` URL, or a URL without a host.
	#[error("Invalid configuration: {0}")]
	Configuration(String),
	/// The configured PEM certificate could not be parsed.
	#[error("Failed to parse certificate: {0}")]
	CertificateParse(String),
	/// A connection pool could not be built for a descriptor. Never cached;
	/// the next request for the same descriptor tries again.
	#[error("Failed to create connection pool for {host}:{port}: {reason}")]
	PoolCreation {
		/// Directory host of the failed descriptor
		host: String,
		/// Directory port of the failed descriptor
		port: u16,
		/// What went wrong
		reason: String,
	},
	/// The TLS handshake with the directory failed, e.g. because the server
	/// certificate is expired or not trusted.
	#[error("TLS handshake failed: {0}")]
	TlsHandshake(String),
	/// The directory could not be reached or the pool could not hand out a
	/// connection.
	#[error("Failed to connect to directory: {0}")]
	Connection(String),
	/// The login filter matched no entry in any search base.
	#[error("User {username} does not exist in {url}")]
	UserNotFound {
		/// The username that was looked up
		username: String,
		/// The directory that was searched
		url: String,
	},
	/// The directory rejected the bind for the resolved entry.
	#[error("Invalid credentials for `{dn}`")]
	InvalidCredentials {
		/// DN the bind was attempted with
		dn: String,
	},
	/// A `{attribute}` placeholder in a filter template referenced an
	/// attribute the entry doesn't have.
	#[error("Failed to build search filter `{template}`. Missing attribute for the expression `{attribute}`")]
	MissingAttribute {
		/// The template being expanded
		template: String,
		/// The placeholder content that could not be resolved
		attribute: String,
	},
	/// A positional filter template referenced an argument that was not
	/// supplied, or was otherwise malformed.
	#[error("Invalid search filter `{0}`")]
	InvalidFilter(String),
	/// The username attribute resolved to an empty value.
	#[error("Username can not be blank. Please check the `UserNameAttribute` of the auth config.")]
	InvalidUsername,
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
	/// Reading the platform trust store failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Whether this error means the directory (or the way to reach it) is
	/// at fault rather than the request.
	#[must_use]
	pub const fn is_connection_error(&self) -> bool {
		matches!(
			self,
			Self::Connection(_) | Self::TlsHandshake(_) | Self::PoolCreation { .. } | Self::Io(_)
		)
	}

	/// Whether this error is an ordinary negative answer: unknown user or
	/// wrong password.
	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(self, Self::UserNotFound { .. } | Self::InvalidCredentials { .. })
	}
}
