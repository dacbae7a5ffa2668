//! Config for a single directory ("auth config").
use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
	error::Error,
	filter::enclose_parentheses,
	validation::{self, ValidationResult},
};

/// Property keys of the host's auth config and role config profiles.
pub mod keys {
	#![allow(missing_docs, clippy::missing_docs_in_private_items)]

	pub const URL: &str = "Url";
	pub const SEARCH_BASES: &str = "SearchBases";
	pub const MANAGER_DN: &str = "ManagerDN";
	pub const PASSWORD: &str = "Password";
	pub const USER_SEARCH_FILTER: &str = "UserSearchFilter";
	pub const USER_LOGIN_FILTER: &str = "UserLoginFilter";
	pub const USERNAME_ATTRIBUTE: &str = "UserNameAttribute";
	pub const DISPLAY_NAME_ATTRIBUTE: &str = "DisplayNameAttribute";
	pub const EMAIL_ATTRIBUTE: &str = "EmailAttribute";
	pub const CERTIFICATE: &str = "Certificate";
	pub const START_TLS: &str = "StartTLS";
	pub const SEARCH_TIMEOUT: &str = "SearchTimeout";

	pub const USER_GROUP_MEMBERSHIP_ATTRIBUTE: &str = "UserGroupMembershipAttribute";
	pub const GROUP_IDENTIFIERS: &str = "GroupIdentifiers";
	pub const GROUP_SEARCH_BASES: &str = "GroupSearchBases";
	pub const GROUP_MEMBERSHIP_FILTER: &str = "GroupMembershipFilter";
}

/// Filter used for user searches when none is configured. `{0}` is the
/// search term.
pub const DEFAULT_USER_SEARCH_FILTER: &str =
	"(|(sAMAccountName=*{0}*)(uid=*{0}*)(cn=*{0}*)(mail=*{0}*)(otherMailbox=*{0}*))";

/// Attribute holding the display name when none is configured.
pub const DEFAULT_DISPLAY_NAME_ATTRIBUTE: &str = "cn";

/// Attribute holding the email address when none is configured.
pub const DEFAULT_EMAIL_ATTRIBUTE: &str = "mail";

/// Search time limit in seconds when none is configured.
pub const DEFAULT_SEARCH_TIMEOUT: u64 = 5;

/// How the connection to the directory is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsMode {
	/// Plain `ldap://`
	None,
	/// TLS from the start, `ldaps://`
	Implicit,
	/// Plain `ldap://` upgraded with the start-TLS extended operation
	StartTls,
}

/// Configuration of one directory.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
	/// The URL to connect to the server with. Supports the ldap and ldaps
	/// schemes
	pub url: Url,
	/// Search bases, searched in the listed order
	pub search_bases: Vec<String>,
	/// DN to bind pooled connections with. Connections bind anonymously
	/// without it
	#[serde(default)]
	pub manager_dn: Option<String>,
	/// Password for the manager DN
	#[serde(default)]
	pub password: Option<String>,
	/// Filter locating the entry of a user logging in; `{0}` is the username
	pub user_login_filter: String,
	/// Filter for user searches; `{0}` is the search term
	#[serde(default)]
	pub user_search_filter: Option<String>,
	/// Attribute holding the username
	pub username_attribute: String,
	/// Attribute holding the display name
	#[serde(default)]
	pub display_name_attribute: Option<String>,
	/// Attribute holding the email address
	#[serde(default)]
	pub email_attribute: Option<String>,
	/// PEM certificate to trust instead of the platform trust store
	#[serde(default)]
	pub certificate: Option<String>,
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	#[serde(default)]
	pub start_tls: bool,
	/// Search time limit in seconds
	#[serde(default = "default_search_timeout")]
	pub search_timeout: u64,
}

/// Serde default for [`DirectoryConfig::search_timeout`].
const fn default_search_timeout() -> u64 {
	DEFAULT_SEARCH_TIMEOUT
}

impl DirectoryConfig {
	/// Create a configuration with the mandatory settings; everything else
	/// takes its default.
	#[must_use]
	pub fn new(
		url: Url,
		search_bases: Vec<String>,
		user_login_filter: impl Into<String>,
		username_attribute: impl Into<String>,
	) -> Self {
		Self {
			url,
			search_bases,
			manager_dn: None,
			password: None,
			user_login_filter: user_login_filter.into(),
			user_search_filter: None,
			username_attribute: username_attribute.into(),
			display_name_attribute: None,
			email_attribute: None,
			certificate: None,
			start_tls: false,
			search_timeout: DEFAULT_SEARCH_TIMEOUT,
		}
	}

	/// Build a configuration from the host's auth config profile. The profile
	/// is validated first; any problem is returned as
	/// [`Error::Configuration`].
	pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, Error> {
		let result = validation::validate_auth_config(properties);
		if result.has_errors() {
			return Err(Error::Configuration(result.to_string()));
		}

		let get = |key: &str| {
			properties.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
		};
		let required = |key: &str| {
			get(key).ok_or_else(|| Error::Configuration(format!("{key} must not be blank.")))
		};

		let url = Url::parse(required(keys::URL)?)
			.map_err(|err| Error::Configuration(format!("Invalid ldap url: {err}")))?;
		let search_timeout = match get(keys::SEARCH_TIMEOUT) {
			Some(timeout) => timeout.parse().map_err(|_| {
				Error::Configuration(format!("{} must be a number.", keys::SEARCH_TIMEOUT))
			})?,
			None => DEFAULT_SEARCH_TIMEOUT,
		};

		Ok(Self {
			url,
			search_bases: split_lines(required(keys::SEARCH_BASES)?),
			manager_dn: get(keys::MANAGER_DN).map(str::to_owned),
			password: properties.get(keys::PASSWORD).filter(|p| !p.is_empty()).cloned(),
			user_login_filter: required(keys::USER_LOGIN_FILTER)?.to_owned(),
			user_search_filter: get(keys::USER_SEARCH_FILTER).map(str::to_owned),
			username_attribute: required(keys::USERNAME_ATTRIBUTE)?.to_owned(),
			display_name_attribute: get(keys::DISPLAY_NAME_ATTRIBUTE).map(str::to_owned),
			email_attribute: get(keys::EMAIL_ATTRIBUTE).map(str::to_owned),
			certificate: get(keys::CERTIFICATE).map(str::to_owned),
			start_tls: get(keys::START_TLS).and_then(validation::parse_bool).unwrap_or(false),
			search_timeout,
		})
	}

	/// Check the cross-field rules: a usable URL, no start-TLS over `ldaps`,
	/// a password for the manager DN and a parseable, current certificate.
	pub fn validate(&self) -> Result<(), Error> {
		let mut result = ValidationResult::default();
		validation::check_url(self.url.as_str(), &mut result);
		validation::check_start_tls(self.url.as_str(), self.start_tls, &mut result);
		validation::check_credentials(
			self.manager_dn.as_deref(),
			self.password.as_deref(),
			&mut result,
		);
		validation::check_certificate(self.certificate.as_deref(), &mut result);
		if self.search_bases.is_empty() {
			result.add_error(keys::SEARCH_BASES, "SearchBases must not be blank.");
		}

		if result.has_errors() {
			return Err(Error::Configuration(result.to_string()));
		}
		Ok(())
	}

	/// How the connection is secured, derived from the URL scheme and the
	/// start-TLS flag.
	#[must_use]
	pub fn tls_mode(&self) -> TlsMode {
		if self.url.scheme().eq_ignore_ascii_case("ldaps") {
			TlsMode::Implicit
		} else if self.start_tls {
			TlsMode::StartTls
		} else {
			TlsMode::None
		}
	}

	/// Host part of the URL.
	#[must_use]
	pub fn host(&self) -> Option<&str> {
		self.url.host_str().filter(|host| !host.is_empty())
	}

	/// Port of the URL, falling back to the scheme's well-known port.
	#[must_use]
	pub fn port(&self) -> u16 {
		self.url.port().unwrap_or(match self.tls_mode() {
			TlsMode::Implicit => 636,
			TlsMode::None | TlsMode::StartTls => 389,
		})
	}

	/// The manager DN and password, if both are set.
	#[must_use]
	pub fn manager_credentials(&self) -> Option<(&str, &str)> {
		let dn = self.manager_dn.as_deref().filter(|dn| !dn.trim().is_empty())?;
		let password = self.password.as_deref().filter(|password| !password.is_empty())?;
		Some((dn, password))
	}

	/// Login filter, wrapped in parentheses.
	#[must_use]
	pub fn user_login_filter(&self) -> String {
		enclose_parentheses(&self.user_login_filter)
	}

	/// User search filter, wrapped in parentheses. Falls back to
	/// [`DEFAULT_USER_SEARCH_FILTER`].
	#[must_use]
	pub fn user_search_filter(&self) -> String {
		match self.user_search_filter.as_deref().filter(|filter| !filter.trim().is_empty()) {
			Some(filter) => enclose_parentheses(filter),
			None => DEFAULT_USER_SEARCH_FILTER.to_owned(),
		}
	}

	/// Display name attribute, falling back to `cn`.
	#[must_use]
	pub fn display_name_attribute(&self) -> &str {
		non_blank(self.display_name_attribute.as_deref()).unwrap_or(DEFAULT_DISPLAY_NAME_ATTRIBUTE)
	}

	/// Email attribute, falling back to `mail`.
	#[must_use]
	pub fn email_attribute(&self) -> &str {
		non_blank(self.email_attribute.as_deref()).unwrap_or(DEFAULT_EMAIL_ATTRIBUTE)
	}

	/// Trimmed certificate text, `None` if blank.
	#[must_use]
	pub fn certificate(&self) -> Option<&str> {
		non_blank(self.certificate.as_deref())
	}

	/// Search time limit.
	#[must_use]
	pub fn search_timeout(&self) -> Duration {
		Duration::from_secs(self.search_timeout)
	}
}

impl fmt::Debug for DirectoryConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DirectoryConfig")
			.field("url", &self.url.as_str())
			.field("search_bases", &self.search_bases)
			.field("manager_dn", &self.manager_dn)
			.field("password", &self.password.as_ref().map(|_| "********"))
			.field("user_login_filter", &self.user_login_filter)
			.field("user_search_filter", &self.user_search_filter)
			.field("username_attribute", &self.username_attribute)
			.field("display_name_attribute", &self.display_name_attribute)
			.field("email_attribute", &self.email_attribute)
			.field("certificate", &self.certificate.is_some())
			.field("start_tls", &self.start_tls)
			.field("search_timeout", &self.search_timeout)
			.finish()
	}
}

/// Trimmed value, `None` if blank.
fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|value| !value.is_empty())
}

/// Split a multi-line profile value into its trimmed, non-blank lines.
pub(crate) fn split_lines(value: &str) -> Vec<String> {
	value.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_owned).collect()
}
