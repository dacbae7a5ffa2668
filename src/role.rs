//! Role definitions and matching them against a user's directory entry.
use std::collections::{HashMap, HashSet};

use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
	config::{keys, split_lines},
	entry::SearchEntryExt,
	error::Error,
	filter::enclose_parentheses,
	validation,
};

/// Grants a role if an attribute of the user's entry holds one of the
/// accepted values, e.g. `memberOf` holding a group DN.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttributeRule {
	/// Attribute of the user's entry to inspect
	pub attribute: String,
	/// Values granting the role
	pub accepted_values: HashSet<String>,
}

/// Grants a role if a group search with a filter built from the user's entry
/// finds anything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterRule {
	/// Group membership filter, `{attribute}` placeholders are taken from the
	/// user's entry
	pub filter: String,
	/// Bases the group search runs in
	pub search_bases: Vec<String>,
}

/// How membership of a role is decided. A well-formed rule has at least one
/// part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleMatchRule {
	/// Attribute based matching
	#[serde(default)]
	pub attribute: Option<AttributeRule>,
	/// Group search based matching
	#[serde(default)]
	pub filter: Option<FilterRule>,
}

/// A role of the host, tied to the auth config whose users it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleDefinition {
	/// Role name
	pub name: String,
	/// Identifier of the owning auth config
	pub auth_config_id: String,
	/// Membership rule
	pub rule: RoleMatchRule,
}

impl RoleDefinition {
	/// Build a role from the host's role config profile.
	pub fn from_properties(
		name: impl Into<String>,
		auth_config_id: impl Into<String>,
		properties: &HashMap<String, String>,
	) -> Result<Self, Error> {
		let result = validation::validate_role_config(properties);
		if result.has_errors() {
			return Err(Error::Configuration(result.to_string()));
		}

		let get = |key: &str| {
			properties.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
		};

		let attribute = match (get(keys::USER_GROUP_MEMBERSHIP_ATTRIBUTE), get(keys::GROUP_IDENTIFIERS)) {
			(Some(attribute), Some(identifiers)) => Some(AttributeRule {
				attribute: attribute.to_owned(),
				accepted_values: split_lines(identifiers).into_iter().collect(),
			}),
			_ => None,
		};
		let filter = get(keys::GROUP_MEMBERSHIP_FILTER).map(|filter| FilterRule {
			filter: enclose_parentheses(filter),
			search_bases: get(keys::GROUP_SEARCH_BASES).map(split_lines).unwrap_or_default(),
		});

		Ok(Self {
			name: name.into(),
			auth_config_id: auth_config_id.into(),
			rule: RoleMatchRule { attribute, filter },
		})
	}

	/// Whether the rule has usable attribute or filter data.
	#[must_use]
	pub fn is_well_formed(&self) -> bool {
		self.attribute_rule().is_some() || self.filter_rule().is_some()
	}

	/// The attribute rule, if it names an attribute and at least one value.
	#[must_use]
	pub fn attribute_rule(&self) -> Option<&AttributeRule> {
		self.rule
			.attribute
			.as_ref()
			.filter(|rule| !rule.attribute.trim().is_empty() && !rule.accepted_values.is_empty())
	}

	/// The filter rule, if it has a filter.
	#[must_use]
	pub fn filter_rule(&self) -> Option<&FilterRule> {
		self.rule.filter.as_ref().filter(|rule| !rule.filter.trim().is_empty())
	}
}

/// Names of the `roles` whose attribute rule matches `entry`. Roles without
/// an attribute rule are ignored.
#[must_use]
pub fn match_attributes<'r>(
	entry: &SearchEntry,
	roles: impl IntoIterator<Item = &'r RoleDefinition>,
) -> HashSet<String> {
	let mut matched = HashSet::new();
	for role in roles {
		let Some(rule) = role.attribute_rule() else {
			continue;
		};

		debug!(role = %role.name, attribute = %rule.attribute, "Matching role by attribute");
		let Some(values) = entry.attr_values(&rule.attribute) else {
			info!(attribute = %rule.attribute, "Missing group membership attribute on user entry");
			continue;
		};

		if values.iter().any(|value| rule.accepted_values.contains(value)) {
			matched.insert(role.name.clone());
		} else {
			debug!(role = %role.name, ?values, "No attribute value is an accepted group identifier");
		}
	}
	matched
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::collections::HashMap;

	use ldap3::SearchEntry;

	use super::{match_attributes, AttributeRule, FilterRule, RoleDefinition, RoleMatchRule};
	use crate::error::Error;

	fn properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
	}

	fn role(name: &str, attribute: &str, values: &[&str]) -> RoleDefinition {
		RoleDefinition {
			name: name.to_owned(),
			auth_config_id: "ldap".to_owned(),
			rule: RoleMatchRule {
				attribute: Some(AttributeRule {
					attribute: attribute.to_owned(),
					accepted_values: values.iter().map(|v| (*v).to_owned()).collect(),
				}),
				filter: None,
			},
		}
	}

	#[test]
	fn from_properties() {
		let role = RoleDefinition::from_properties(
			"admins",
			"ldap",
			&properties(&[
				("UserGroupMembershipAttribute", "memberOf"),
				("GroupIdentifiers", "ou=admins,ou=groups\n\n  ou=devs,ou=groups "),
				("GroupMembershipFilter", "member={dn}"),
				("GroupSearchBases", "ou=groups,ou=system"),
			]),
		)
		.unwrap();

		let attribute = role.attribute_rule().unwrap();
		assert_eq!(attribute.attribute, "memberOf");
		assert_eq!(attribute.accepted_values.len(), 2);
		assert!(attribute.accepted_values.contains("ou=devs,ou=groups"));
		assert_eq!(
			role.filter_rule(),
			Some(&FilterRule {
				filter: "(member={dn})".to_owned(),
				search_bases: vec!["ou=groups,ou=system".to_owned()],
			})
		);
	}

	#[test]
	fn from_properties_rejects_incomplete_rule() {
		let err = RoleDefinition::from_properties(
			"admins",
			"ldap",
			&properties(&[("UserGroupMembershipAttribute", "memberOf")]),
		)
		.unwrap_err();
		assert!(matches!(err, Error::Configuration(_)));
	}

	#[test]
	fn well_formed() {
		assert!(role("admins", "memberOf", &["ou=admins"]).is_well_formed());
		assert!(!role("admins", "memberOf", &[]).is_well_formed());
		assert!(!role("admins", " ", &["ou=admins"]).is_well_formed());

		let mut empty = role("admins", "memberOf", &[]);
		empty.rule = RoleMatchRule::default();
		assert!(!empty.is_well_formed());
		empty.rule.filter = Some(FilterRule { filter: "  ".to_owned(), search_bases: vec![] });
		assert!(!empty.is_well_formed());
	}

	#[test]
	fn matches_any_accepted_value() {
		let entry = SearchEntry {
			dn: "uid=bford,ou=system".to_owned(),
			attrs: [(
				"memberOf".to_owned(),
				vec!["ou=devs,ou=groups".to_owned(), "ou=admins,ou=groups".to_owned()],
			)]
			.into_iter()
			.collect(),
			bin_attrs: HashMap::new(),
		};
		let roles = [
			role("admins", "memberOf", &["ou=admins,ou=groups"]),
			role("partial", "memberOf", &["ou=admins"]),
			role("missing", "groupMembership", &["ou=admins,ou=groups"]),
			role("case", "MEMBEROF", &["ou=devs,ou=groups"]),
		];

		let matched = match_attributes(&entry, &roles);
		assert_eq!(matched.len(), 2);
		assert!(matched.contains("admins"));
		assert!(matched.contains("case"));
	}
}
