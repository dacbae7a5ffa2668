//! Validation of auth config and role config profiles.
//!
//! Profiles arrive from the host as flat key/value maps. Each profile kind
//! has a statically declared schema, an ordered list of [`FieldSpec`]s,
//! which [`validate_fields`] checks generically (required fields present,
//! typed fields parseable, no unknown keys). Cross-field rules specific to
//! auth configs and role configs are layered on top.
use std::{collections::HashMap, fmt};

use serde::Serialize;
use time::format_description::well_known::Rfc2822;
use url::Url;

use crate::config::keys;

/// The type of value a profile field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
	/// Free text
	String,
	/// `true` or `false`
	Boolean,
	/// A non-negative integer
	Number,
}

/// Declaration of a single profile field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
	/// Property key as used by the host
	pub key: &'static str,
	/// Whether a blank value is an error
	pub required: bool,
	/// Whether the value is a secret the host must not display
	pub secure: bool,
	/// Type of the value
	pub kind: FieldKind,
}

impl FieldSpec {
	/// Declare an optional, non-secret text field.
	const fn text(key: &'static str) -> Self {
		Self { key, required: false, secure: false, kind: FieldKind::String }
	}

	/// Mark the field as required.
	const fn required(self) -> Self {
		Self { required: true, ..self }
	}

	/// Mark the field as secret.
	const fn secure(self) -> Self {
		Self { secure: true, ..self }
	}

	/// Change the value type of the field.
	const fn kind(self, kind: FieldKind) -> Self {
		Self { kind, ..self }
	}
}

/// Fields of an auth config profile, in display order.
pub const AUTH_CONFIG_SCHEMA: &[FieldSpec] = &[
	FieldSpec::text(keys::URL).required(),
	FieldSpec::text(keys::SEARCH_BASES).required(),
	FieldSpec::text(keys::MANAGER_DN),
	FieldSpec::text(keys::PASSWORD).secure(),
	FieldSpec::text(keys::USER_SEARCH_FILTER),
	FieldSpec::text(keys::USER_LOGIN_FILTER).required(),
	FieldSpec::text(keys::USERNAME_ATTRIBUTE).required(),
	FieldSpec::text(keys::DISPLAY_NAME_ATTRIBUTE),
	FieldSpec::text(keys::EMAIL_ATTRIBUTE),
	FieldSpec::text(keys::CERTIFICATE),
	FieldSpec::text(keys::START_TLS).kind(FieldKind::Boolean),
	FieldSpec::text(keys::SEARCH_TIMEOUT).kind(FieldKind::Number),
];

/// Fields of a role config profile, in display order.
pub const ROLE_CONFIG_SCHEMA: &[FieldSpec] = &[
	FieldSpec::text(keys::USER_GROUP_MEMBERSHIP_ATTRIBUTE),
	FieldSpec::text(keys::GROUP_IDENTIFIERS),
	FieldSpec::text(keys::GROUP_SEARCH_BASES),
	FieldSpec::text(keys::GROUP_MEMBERSHIP_FILTER),
];

/// A problem with a single profile field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
	/// Property key the error belongs to. Empty for profile-wide errors.
	pub key: String,
	/// Human readable description
	pub message: String,
}

/// Collected outcome of validating a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
	/// Errors in the order they were found
	errors: Vec<FieldError>,
}

impl ValidationResult {
	/// Record an error for `key`.
	pub fn add_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
		self.errors.push(FieldError { key: key.into(), message: message.into() });
	}

	/// Append the errors of another result.
	pub fn merge(&mut self, other: ValidationResult) {
		self.errors.extend(other.errors);
	}

	/// Whether any error was recorded.
	#[must_use]
	pub fn has_errors(&self) -> bool {
		!self.errors.is_empty()
	}

	/// All recorded errors.
	#[must_use]
	pub fn errors(&self) -> &[FieldError] {
		&self.errors
	}

	/// The error recorded for `key`, if any.
	#[must_use]
	pub fn error_for(&self, key: &str) -> Option<&FieldError> {
		self.errors.iter().find(|error| error.key == key)
	}
}

impl fmt::Display for ValidationResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, error) in self.errors.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			if error.key.is_empty() {
				f.write_str(&error.message)?;
			} else {
				write!(f, "{}: {}", error.key, error.message)?;
			}
		}
		Ok(())
	}
}

/// Check `properties` against a schema: required fields must be non-blank,
/// typed fields must parse, and keys outside the schema are rejected.
#[must_use]
pub fn validate_fields(
	schema: &[FieldSpec],
	properties: &HashMap<String, String>,
) -> ValidationResult {
	let mut result = ValidationResult::default();

	for field in schema {
		let value = properties.get(field.key).map(|value| value.trim()).unwrap_or_default();
		if value.is_empty() {
			if field.required {
				result.add_error(field.key, format!("{} must not be blank.", field.key));
			}
			continue;
		}

		match field.kind {
			FieldKind::String => {}
			FieldKind::Boolean => {
				if parse_bool(value).is_none() {
					result.add_error(field.key, format!("{} must be `true` or `false`.", field.key));
				}
			}
			FieldKind::Number => {
				if value.parse::<u64>().is_err() {
					result.add_error(field.key, format!("{} must be a number.", field.key));
				}
			}
		}
	}

	let mut unknown: Vec<&String> = properties
		.keys()
		.filter(|key| !schema.iter().any(|field| field.key == key.as_str()))
		.collect();
	unknown.sort();
	for key in unknown {
		result.add_error(key.as_str(), "Is an unknown property");
	}

	result
}

/// Validate an auth config profile: schema checks plus the credential,
/// certificate, start-TLS and URL rules.
#[must_use]
pub fn validate_auth_config(properties: &HashMap<String, String>) -> ValidationResult {
	let mut result = validate_fields(AUTH_CONFIG_SCHEMA, properties);
	let get = |key: &str| properties.get(key).map(String::as_str).map(str::trim);

	check_credentials(get(keys::MANAGER_DN), get(keys::PASSWORD), &mut result);
	check_certificate(get(keys::CERTIFICATE), &mut result);
	if let Some(url) = get(keys::URL).filter(|url| !url.is_empty()) {
		check_url(url, &mut result);
		let start_tls = get(keys::START_TLS).and_then(parse_bool).unwrap_or(false);
		check_start_tls(url, start_tls, &mut result);
	}

	result
}

/// Validate a role config profile. A role needs either a group membership
/// filter or both a membership attribute and the group identifiers to
/// accept.
#[must_use]
pub fn validate_role_config(properties: &HashMap<String, String>) -> ValidationResult {
	let mut result = validate_fields(ROLE_CONFIG_SCHEMA, properties);
	let is_blank =
		|key: &str| properties.get(key).map_or(true, |value| value.trim().is_empty());

	if !is_blank(keys::GROUP_MEMBERSHIP_FILTER) {
		return result;
	}

	for key in [keys::USER_GROUP_MEMBERSHIP_ATTRIBUTE, keys::GROUP_IDENTIFIERS] {
		if is_blank(key) {
			result.add_error(key, format!("`{key}` must not be blank."));
		}
	}

	result
}

/// Parse a profile boolean.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
	match value.trim() {
		v if v.eq_ignore_ascii_case("true") => Some(true),
		v if v.eq_ignore_ascii_case("false") => Some(false),
		_ => None,
	}
}

/// A manager DN is useless without its password.
pub(crate) fn check_credentials(
	manager_dn: Option<&str>,
	password: Option<&str>,
	result: &mut ValidationResult,
) {
	let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());
	if present(manager_dn) && !present(password) {
		result.add_error(keys::PASSWORD, "Password cannot be blank when ManagerDN is provided.");
	}
}

/// The certificate, if any, must parse and be within its validity period.
pub(crate) fn check_certificate(certificate: Option<&str>, result: &mut ValidationResult) {
	let Some(certificate) = certificate.map(str::trim).filter(|cert| !cert.is_empty()) else {
		return;
	};

	let pem = match x509_parser::pem::parse_x509_pem(certificate.as_bytes()) {
		Ok((_, pem)) => pem,
		Err(err) => {
			result.add_error(keys::CERTIFICATE, format!("Error parsing certificate - `{err}`"));
			return;
		}
	};
	let parsed = match pem.parse_x509() {
		Ok(parsed) => parsed,
		Err(err) => {
			result.add_error(keys::CERTIFICATE, format!("Error parsing certificate - `{err}`"));
			return;
		}
	};

	let validity = parsed.validity();
	let now = x509_parser::time::ASN1Time::now();
	if validity.not_after < now {
		result.add_error(
			keys::CERTIFICATE,
			format!(
				"Invalid Certificate, expired on `{}`",
				render_time(validity.not_after.to_datetime())
			),
		);
	} else if validity.not_before > now {
		result.add_error(
			keys::CERTIFICATE,
			format!(
				"Invalid Certificate, valid from `{}`",
				render_time(validity.not_before.to_datetime())
			),
		);
	}
}

/// Format a certificate date for an error message.
fn render_time(time: time::OffsetDateTime) -> String {
	time.format(&Rfc2822).unwrap_or_else(|_| time.to_string())
}

/// Start-TLS upgrades a plain connection, so it can't be combined with
/// `ldaps`.
pub(crate) fn check_start_tls(url: &str, start_tls: bool, result: &mut ValidationResult) {
	let is_ldaps = Url::parse(url).is_ok_and(|url| url.scheme() == "ldaps");
	if start_tls && is_ldaps {
		result.add_error(keys::START_TLS, "Cannot startTLS if using `ldaps://` URL.");
	}
}

/// The URL must be an `ldap` or `ldaps` URL naming a host.
pub(crate) fn check_url(url: &str, result: &mut ValidationResult) {
	let valid = Url::parse(url).is_ok_and(|url| {
		matches!(url.scheme(), "ldap" | "ldaps") && url.host_str().is_some_and(|h| !h.is_empty())
	});
	if !valid {
		result.add_error(keys::URL, "Invalid ldap url.");
	}
}
