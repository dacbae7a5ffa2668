//! Resolve user identities and group roles against one or more LDAP
//! directories.
//!
//! The caller supplies a prioritized list of directory configurations ("auth
//! configs", see [`AuthContext`]) and a list of role definitions. The
//! [`Authenticator`] tries the directories in order and returns the user
//! resolved by the first one that accepts the credentials. The [`Authorizer`]
//! then decides which roles that user holds, either from an attribute of the
//! user's entry (such as `memberOf`) or from a group search built from the
//! entry.
//!
//! Connections are pooled. A [`PoolRegistry`] keeps one pool per distinct
//! connection target and identity, shared by every configuration that only
//! differs in search bases or filters.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ldap_authz::{
//! 	AuthContext, Authenticator, Authorizer, Credentials, DirectoryConfig, PoolRegistry,
//! 	RoleDefinition,
//! };
//! use url::Url;
//!
//! // Configuration can also be deserialized with serde, or built from the
//! // host's key/value profile with `DirectoryConfig::from_properties`.
//! let mut config = DirectoryConfig::new(
//! 	Url::parse("ldap://localhost:1389")?,
//! 	vec!["ou=users,dc=example,dc=org".to_owned()],
//! 	"(uid={0})",
//! 	"uid",
//! );
//! config.manager_dn = Some("cn=admin,dc=example,dc=org".to_owned());
//! config.password = Some("adminpassword".to_owned());
//! let contexts = vec![AuthContext::new("ldap", config)];
//! let roles: Vec<RoleDefinition> = Vec::new();
//!
//! let registry = Arc::new(PoolRegistry::new());
//! let authenticator = Authenticator::new(Arc::clone(&registry));
//! let authorizer = Authorizer::new(registry);
//!
//! let credentials = Credentials::new("bford", "bob");
//! if let Some(result) = authenticator.authenticate(&credentials, &contexts).await {
//! 	let roles = authorizer.authorize(&result.user, &result.context, &roles).await;
//! 	println!("{} holds {roles:?}", result.user.username());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Password policy controls (expiry warnings, grace logins) are not
//!   requested or reported.
//! * Bind has no timeout of its own, only searches are time limited.

pub mod authenticator;
pub mod authorizer;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod pool;
pub mod role;
pub mod search;
pub mod trust;
pub mod user;
pub mod validation;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	authenticator::Authenticator,
	authorizer::Authorizer,
	config::{DirectoryConfig, TlsMode},
	entry::SearchEntryExt,
	error::Error,
	ldap::{Directory, DirectoryConnector, LdapDirectory, SearchRequest},
	pool::{ConnectionDescriptor, PoolRegistry, PoolSettings},
	role::{AttributeRule, FilterRule, RoleDefinition, RoleMatchRule},
	search::DirectorySearch,
	user::{AuthContext, AuthenticationResult, Credentials, ResolvedUser, UserMapper},
	validation::ValidationResult,
};
