//! Users, the directories that resolved them and the credentials they
//! logged in with.
use std::{
	fmt,
	hash::{Hash, Hasher},
};

use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};

use crate::{config::DirectoryConfig, entry::SearchEntryExt, error::Error};

/// Username and password of a login attempt.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
	/// Username as typed by the user
	pub username: String,
	/// Password as typed by the user
	pub password: String,
}

impl Credentials {
	/// Create credentials.
	#[must_use]
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self { username: username.into(), password: password.into() }
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"********")
			.finish()
	}
}

/// A directory configuration together with the identifier the host knows it
/// by. Contexts are equal if their identifiers are.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthContext {
	/// Identifier of the auth config
	pub id: String,
	/// The directory configuration
	pub config: DirectoryConfig,
}

impl AuthContext {
	/// Create a context.
	#[must_use]
	pub fn new(id: impl Into<String>, config: DirectoryConfig) -> Self {
		Self { id: id.into(), config }
	}
}

impl PartialEq for AuthContext {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for AuthContext {}

impl Hash for AuthContext {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

/// A user resolved from a directory entry.
///
/// The entry is kept for role resolution. It is never serialized and does
/// not take part in comparisons.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedUser {
	/// Username, never blank
	username: String,
	/// Display name, the username if the entry has none
	display_name: String,
	/// Lower-cased email address
	email: Option<String>,
	/// The entry the user was resolved from
	#[serde(skip)]
	entry: Option<SearchEntry>,
}

impl ResolvedUser {
	/// Create a user without a backing entry.
	pub fn new(
		username: impl Into<String>,
		display_name: Option<&str>,
		email: Option<&str>,
	) -> Result<Self, Error> {
		let username = username.into();
		if username.trim().is_empty() {
			return Err(Error::InvalidUsername);
		}

		let display_name = display_name
			.filter(|name| !name.is_empty())
			.map_or_else(|| username.clone(), str::to_owned);
		let email = email.map(|email| email.trim().to_lowercase());
		Ok(Self { username, display_name, email, entry: None })
	}

	/// Username.
	#[must_use]
	pub fn username(&self) -> &str {
		&self.username
	}

	/// Display name.
	#[must_use]
	pub fn display_name(&self) -> &str {
		&self.display_name
	}

	/// Email address, if the entry has one.
	#[must_use]
	pub fn email(&self) -> Option<&str> {
		self.email.as_deref()
	}

	/// The directory entry the user was resolved from.
	#[must_use]
	pub fn entry(&self) -> Option<&SearchEntry> {
		self.entry.as_ref()
	}
}

impl PartialEq for ResolvedUser {
	fn eq(&self, other: &Self) -> bool {
		self.username == other.username
			&& self.display_name == other.display_name
			&& self.email == other.email
	}
}

impl Eq for ResolvedUser {}

impl Hash for ResolvedUser {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.username.hash(state);
		self.display_name.hash(state);
		self.email.hash(state);
	}
}

/// Maps directory entries to [`ResolvedUser`]s using the attribute names of a
/// directory config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMapper {
	/// Attribute holding the username
	pub username_attribute: String,
	/// Attribute holding the display name
	pub display_name_attribute: String,
	/// Attribute holding the email address
	pub email_attribute: String,
}

impl UserMapper {
	/// Create a mapper with the attribute names of `config`.
	#[must_use]
	pub fn from_config(config: &DirectoryConfig) -> Self {
		Self {
			username_attribute: config.username_attribute.clone(),
			display_name_attribute: config.display_name_attribute().to_owned(),
			email_attribute: config.email_attribute().to_owned(),
		}
	}

	/// Build the user of `entry`. Fails with [`Error::InvalidUsername`] if
	/// the username attribute is missing or blank.
	pub fn map(&self, entry: SearchEntry) -> Result<ResolvedUser, Error> {
		let mut user = ResolvedUser::new(
			entry.attr_first(&self.username_attribute).unwrap_or_default(),
			entry.attr_first(&self.display_name_attribute),
			entry.attr_first(&self.email_attribute),
		)?;
		user.entry = Some(entry);
		Ok(user)
	}
}

/// A resolved user and the context of the directory that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationResult {
	/// The user
	pub user: ResolvedUser,
	/// The producing directory
	#[serde(rename = "auth_config_id", serialize_with = "serialize_context_id")]
	pub context: AuthContext,
}

/// Serialize only the identifier of a context.
fn serialize_context_id<S: serde::Serializer>(
	context: &AuthContext,
	serializer: S,
) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&context.id)
}
