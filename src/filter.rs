//! Building search filters from templates.
//!
//! Two kinds of templates are in use:
//!
//! * Positional templates such as the login filter `(uid={0})`. The
//!   arguments are user input and are escaped with [`ldap3::ldap_escape`]
//!   before substitution, see [`format`].
//! * Attribute templates such as the group membership filter
//!   `(|(member={dn})(memberUid={uid}))`. Placeholders name attributes of a
//!   previously resolved entry, which are substituted verbatim, see
//!   [`build`].
use std::sync::LazyLock;

use ldap3::{ldap_escape, SearchEntry};
use regex::Regex;

use crate::{entry::SearchEntryExt, error::Error};

/// Non-greedy `{...}` placeholder.
#[allow(clippy::unwrap_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(.*?)\}").unwrap());

/// Positional `{n}` placeholder.
#[allow(clippy::unwrap_used)]
static POSITIONAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}").unwrap());

/// Expand the attribute placeholders of `template` with values from `entry`.
///
/// `{dn}` (in any case) is replaced by the DN of the entry, any other
/// `{name}` by the first value of attribute `name`. Every occurrence of a
/// placeholder is replaced. If an attribute is missing,
/// [`Error::MissingAttribute`] names it; each distinct placeholder is looked
/// up only once.
pub fn build(template: &str, entry: &SearchEntry) -> Result<String, Error> {
	let mut placeholders: Vec<(&str, &str)> = Vec::new();
	for captures in PLACEHOLDER.captures_iter(template) {
		let (Some(expression), Some(content)) = (captures.get(0), captures.get(1)) else {
			continue;
		};
		let placeholder = (expression.as_str(), content.as_str());
		if !placeholders.contains(&placeholder) {
			placeholders.push(placeholder);
		}
	}

	let mut filter = template.to_owned();
	for (expression, content) in placeholders {
		let value = if content.eq_ignore_ascii_case("dn") {
			entry.dn.as_str()
		} else {
			entry.attr_first(content).ok_or_else(|| Error::MissingAttribute {
				template: template.to_owned(),
				attribute: content.to_owned(),
			})?
		};
		filter = filter.replace(expression, value);
	}
	Ok(filter)
}

/// Substitute the positional arguments `{0}`, `{1}`, … of `template`,
/// escaping each argument so it can't alter the structure of the filter.
pub fn format(template: &str, args: &[&str]) -> Result<String, Error> {
	let mut filter = String::with_capacity(template.len() + 16);
	let mut last = 0;
	for captures in POSITIONAL.captures_iter(template) {
		let (Some(expression), Some(index)) = (captures.get(0), captures.get(1)) else {
			continue;
		};
		let arg = index
			.as_str()
			.parse::<usize>()
			.ok()
			.and_then(|index| args.get(index))
			.ok_or_else(|| Error::InvalidFilter(template.to_owned()))?;

		filter.push_str(&template[last..expression.start()]);
		filter.push_str(&ldap_escape(*arg));
		last = expression.end();
	}
	filter.push_str(&template[last..]);
	Ok(filter)
}

/// Wrap a filter in parentheses unless it already is. Blank input is
/// returned as an empty string.
#[must_use]
pub fn enclose_parentheses(filter: &str) -> String {
	let filter = filter.trim();
	if filter.is_empty() || (filter.starts_with('(') && filter.ends_with(')')) {
		return filter.to_owned();
	}
	format!("({filter})")
}
