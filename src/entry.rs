//! Helper methods for extracting data from search results.
use ldap3::SearchEntry;

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data.
///
/// Attribute descriptions are case-insensitive in LDAP, while the attribute
/// map of a [`SearchEntry`] is keyed by whatever spelling the server
/// returned. Lookups try the exact key first and fall back to a
/// case-insensitive scan.
pub trait SearchEntryExt {
	/// Get all values of an attribute. Will return `None` if the attribute is
	/// not present on the entry.
	fn attr_values(&self, attr: &str) -> Option<&[String]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_values(attr)?.first().map(String::as_str)
	}

	/// Whether the entry carries the attribute at all.
	fn has_attr(&self, attr: &str) -> bool {
		self.attr_values(attr).is_some()
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_values(&self, attr: &str) -> Option<&[String]> {
		if let Some(values) = self.attrs.get(attr) {
			return Some(values.as_slice());
		}

		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.as_slice())
	}
}
