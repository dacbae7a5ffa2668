//! Resolving the roles of an authenticated user.
use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error, info, warn};

use crate::{
	error::Error,
	filter,
	ldap::DirectoryConnector,
	role::{self, RoleDefinition},
	search::DirectorySearch,
	user::{AuthContext, ResolvedUser},
};

/// Decides which roles a user holds.
///
/// Roles are matched in two phases. First the attribute rules are checked
/// against the user's entry. Roles still unmatched are then checked with
/// their group membership filter, which needs a directory search per role. A
/// role matched by its attribute rule is never searched for.
#[derive(Debug)]
pub struct Authorizer<C> {
	/// Source of directory handles
	connector: Arc<C>,
}

impl<C> Clone for Authorizer<C> {
	fn clone(&self) -> Self {
		Self { connector: Arc::clone(&self.connector) }
	}
}

impl<C: DirectoryConnector> Authorizer<C> {
	/// Create an authorizer getting its directory handles from `connector`.
	#[must_use]
	pub const fn new(connector: Arc<C>) -> Self {
		Self { connector }
	}

	/// Names of the `roles` the user holds. Only roles of `context` with a
	/// well-formed rule are considered. Failures are logged and yield no
	/// roles, never an error.
	pub async fn authorize(
		&self,
		user: &ResolvedUser,
		context: &AuthContext,
		roles: &[RoleDefinition],
	) -> HashSet<String> {
		let roles: Vec<&RoleDefinition> = roles
			.iter()
			.filter(|role| role.auth_config_id == context.id)
			.filter(|role| {
				let valid = role.is_well_formed();
				if !valid {
					warn!(role = %role.name, "Skipping authorization mapping for invalid role config");
				}
				valid
			})
			.collect();

		if roles.is_empty() {
			info!(
				username = %user.username(),
				auth_config = %context.id,
				"Skipping authorization as no roles are defined"
			);
			return HashSet::new();
		}

		debug!(username = %user.username(), auth_config = %context.id, "Resolving roles");
		match self.resolve(user, context, &roles).await {
			Ok(matched) => matched,
			Err(err) => {
				error!(
					username = %user.username(),
					auth_config = %context.id,
					"Error resolving roles: {err}"
				);
				HashSet::new()
			}
		}
	}

	/// Run both matching phases.
	async fn resolve(
		&self,
		user: &ResolvedUser,
		context: &AuthContext,
		roles: &[&RoleDefinition],
	) -> Result<HashSet<String>, Error> {
		let Some(entry) = user.entry() else {
			warn!(username = %user.username(), "User has no directory entry, can't resolve roles");
			return Ok(HashSet::new());
		};

		let mut matched = role::match_attributes(entry, roles.iter().copied());
		if matched.is_empty() {
			debug!("No roles found using user group membership attribute");
		}

		let pending: Vec<&RoleDefinition> = roles
			.iter()
			.copied()
			.filter(|role| !matched.contains(&role.name) && role.filter_rule().is_some())
			.collect();
		if pending.is_empty() {
			return Ok(matched);
		}

		let directory = self.connector.connect(&context.config)?;
		let search = DirectorySearch::new(&context.config, &directory);
		let mut found = false;
		for role in pending {
			let Some(rule) = role.filter_rule() else {
				continue;
			};

			debug!(role = %role.name, filter = %rule.filter, "Resolving role using group membership filter");
			let groups = async {
				let filter = filter::build(&rule.filter, entry)?;
				search.search_group(&rule.search_bases, &filter, |entry| Ok(entry.dn)).await
			}
			.await;

			match groups {
				Ok(groups) if !groups.is_empty() => {
					found = true;
					matched.insert(role.name.clone());
				}
				Ok(_) => {}
				Err(err) => {
					error!(
						role = %role.name,
						filter = %rule.filter,
						"Error assigning role using group membership filter: {err}"
					);
				}
			}
		}
		if !found {
			debug!("No roles found using user group membership filter");
		}

		Ok(matched)
	}
}
