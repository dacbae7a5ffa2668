//! Resolving users against a prioritized list of directories.
use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error, info};

use crate::{
	config::DirectoryConfig,
	error::Error,
	ldap::DirectoryConnector,
	search::DirectorySearch,
	user::{AuthContext, AuthenticationResult, Credentials, ResolvedUser, UserMapper},
};

/// Maximum number of users a user search returns per directory.
pub const USER_SEARCH_PAGE_SIZE: usize = 100;

/// Authenticates and looks up users in the directories of a list of auth
/// contexts.
///
/// Contexts are tried in the order given and the first one that resolves the
/// user wins. A context that fails, for whatever reason, is logged and
/// skipped.
#[derive(Debug)]
pub struct Authenticator<C> {
	/// Source of directory handles
	connector: Arc<C>,
}

impl<C> Clone for Authenticator<C> {
	fn clone(&self) -> Self {
		Self { connector: Arc::clone(&self.connector) }
	}
}

impl<C: DirectoryConnector> Authenticator<C> {
	/// Create an authenticator getting its directory handles from
	/// `connector`.
	#[must_use]
	pub const fn new(connector: Arc<C>) -> Self {
		Self { connector }
	}

	/// Authenticate `credentials` against each context in turn. Returns the
	/// user and the context of the first directory accepting them, or `None`
	/// if none does.
	pub async fn authenticate(
		&self,
		credentials: &Credentials,
		contexts: &[AuthContext],
	) -> Option<AuthenticationResult> {
		for context in contexts {
			info!(
				username = %credentials.username,
				auth_config = %context.id,
				"Authenticating user"
			);
			match self.authenticate_with_context(credentials, context).await {
				Ok(result) => return Some(result),
				Err(err) => log_failure("authenticate", &credentials.username, context, &err),
			}
		}
		None
	}

	/// Look up `username` in each context in turn, without checking a
	/// password.
	pub async fn search_user(
		&self,
		username: &str,
		contexts: &[AuthContext],
	) -> Option<AuthenticationResult> {
		for context in contexts {
			if let Some(result) = self.search_user_with_context(username, context).await {
				return Some(result);
			}
		}
		None
	}

	/// Look up `username` in the directory of a single context.
	pub async fn search_user_with_context(
		&self,
		username: &str,
		context: &AuthContext,
	) -> Option<AuthenticationResult> {
		debug!(%username, auth_config = %context.id, "Looking up user");
		let result = async {
			let directory = self.connector.connect(&context.config)?;
			let mapper = UserMapper::from_config(&context.config);
			DirectorySearch::new(&context.config, &directory)
				.search_user(username, |entry| mapper.map(entry))
				.await
		}
		.await;

		match result {
			Ok(user) => Some(AuthenticationResult { user, context: context.clone() }),
			Err(err) => {
				log_failure("look up", username, context, &err);
				None
			}
		}
	}

	/// Search users matching `term` with the user search filter of each
	/// context. At most [`USER_SEARCH_PAGE_SIZE`] users are taken from each
	/// directory; once a directory fills a page, later contexts are not
	/// searched. Users found in several directories are returned once.
	pub async fn search_users(&self, term: &str, contexts: &[AuthContext]) -> Vec<ResolvedUser> {
		let mut seen = HashSet::new();
		let mut users = Vec::new();

		for context in contexts {
			let filter = context.config.user_search_filter();
			info!(
				search_term = %term,
				%filter,
				auth_config = %context.id,
				"Looking up users matching search term"
			);

			let found = async {
				let directory = self.connector.connect(&context.config)?;
				let mapper = UserMapper::from_config(&context.config);
				DirectorySearch::new(&context.config, &directory)
					.search(&filter, &[term], |entry| mapper.map(entry), USER_SEARCH_PAGE_SIZE)
					.await
			}
			.await;

			match found {
				Ok(found) => {
					let full_page = found.len() >= USER_SEARCH_PAGE_SIZE;
					for user in found {
						if seen.insert(user.clone()) {
							users.push(user);
						}
					}
					if full_page {
						break;
					}
				}
				Err(err) => {
					error!(auth_config = %context.id, "Failed to search users: {err}");
				}
			}
		}

		users
	}

	/// Check that `config` is valid and its directory answers a user search.
	pub async fn verify_connection(&self, config: &DirectoryConfig) -> Result<(), Error> {
		config.validate()?;
		let directory = self.connector.connect(config)?;
		DirectorySearch::new(config, &directory).verify_connection().await
	}

	/// Authenticate against the directory of a single context.
	async fn authenticate_with_context(
		&self,
		credentials: &Credentials,
		context: &AuthContext,
	) -> Result<AuthenticationResult, Error> {
		let directory = self.connector.connect(&context.config)?;
		let mapper = UserMapper::from_config(&context.config);
		let user = DirectorySearch::new(&context.config, &directory)
			.authenticate(&credentials.username, &credentials.password, |entry| mapper.map(entry))
			.await?;
		Ok(AuthenticationResult { user, context: context.clone() })
	}
}

/// Log a context that did not resolve the user. `action` names what was
/// attempted, e.g. `authenticate`.
fn log_failure(action: &str, username: &str, context: &AuthContext, err: &Error) {
	if err.is_not_found() {
		info!(%username, auth_config = %context.id, "User not resolved: {err}");
	} else {
		error!(%username, auth_config = %context.id, "Failed to {action} user: {err}");
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::{
		io,
		sync::{Arc, Mutex},
	};

	use url::Url;

	use super::log_failure;
	use crate::{config::DirectoryConfig, error::Error, user::AuthContext};

	/// Log output collected in memory.
	#[derive(Clone, Default)]
	struct Captured(Arc<Mutex<Vec<u8>>>);

	impl io::Write for Captured {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	fn logged(action: &str, err: &Error) -> String {
		let captured = Captured::default();
		let writer = captured.clone();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(move || writer.clone())
			.with_ansi(false)
			.finish();
		let config = DirectoryConfig::new(
			Url::parse("ldap://localhost:10389").unwrap(),
			vec!["ou=users,ou=system".to_owned()],
			"(uid={0})",
			"uid",
		);
		let context = AuthContext::new("ldap", config);

		tracing::subscriber::with_default(subscriber, || {
			log_failure(action, "bford", &context, err);
		});
		let output = captured.0.lock().unwrap().clone();
		String::from_utf8(output).unwrap()
	}

	#[test]
	fn failure_log_names_the_attempted_action() {
		let err = Error::Connection("connection refused".to_owned());

		let output = logged("look up", &err);
		assert!(output.contains("Failed to look up user"), "{output}");
		assert!(!output.contains("authenticate"), "{output}");

		let output = logged("authenticate", &err);
		assert!(output.contains("Failed to authenticate user"), "{output}");
	}

	#[test]
	fn missing_user_is_not_logged_as_failure() {
		let err = Error::UserNotFound {
			username: "bford".to_owned(),
			url: "ldap://localhost:10389".to_owned(),
		};

		let output = logged("look up", &err);
		assert!(output.contains("INFO"), "{output}");
		assert!(!output.contains("Failed to"), "{output}");
	}
}
