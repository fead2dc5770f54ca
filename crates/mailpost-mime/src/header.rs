//! Typed header map.
//!
//! Each field carries either a single value or, for the address fields that
//! may legitimately repeat, a list of values. The arity is checked when the
//! value is stored rather than at every read.

use crate::error::{Error, Result};
use std::fmt;

/// Header fields allowed to hold a list of values.
const MULTI_VALUE_FIELDS: &[&str] = &["from", "to", "cc", "bcc", "reply-to"];

/// A header value: one string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum HeaderValue {
    /// A single value.
    Single(String),
    /// Several values, rendered comma separated.
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Returns the values as a slice-like iterator.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// Returns the first value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.values().next()
    }

    /// Returns true if no non-blank value is present.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.values().all(|v| v.trim().is_empty())
    }

    /// Returns the value as a single line, joining lists with `", "`.
    #[must_use]
    pub fn joined(&self) -> String {
        self.values().collect::<Vec<_>>().join(", ")
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(values: [&str; N]) -> Self {
        Self::Multi(values.iter().map(|v| (*v).to_string()).collect())
    }
}

/// Ordered collection of message headers.
///
/// Names are matched case-insensitively; insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `name` may hold a list of values.
    #[must_use]
    pub fn is_multi_value(name: &str) -> bool {
        MULTI_VALUE_FIELDS.contains(&name.to_lowercase().as_str())
    }

    /// Sets a header, replacing any existing value in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the name is not a valid field name,
    /// a value contains a line break, or a list is given for a single-valued
    /// field.
    pub fn set(&mut self, name: &str, value: impl Into<HeaderValue>) -> Result<()> {
        let key = validate_name(name)?;
        let value = value.into();

        if value.values().any(|v| v.contains(['\r', '\n'])) {
            return Err(Error::InvalidHeader(format!(
                "{name}: value contains a line break"
            )));
        }
        if matches!(value, HeaderValue::Multi(_)) && !Self::is_multi_value(&key) {
            return Err(Error::InvalidHeader(format!(
                "{name} does not accept multiple values"
            )));
        }

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Gets the value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let key = name.to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::first)
    }

    /// Returns true if the header is present with a non-blank value.
    #[must_use]
    pub fn has_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_blank())
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let key = name.to_lowercase();
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns an iterator over `(lowercase name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_name(name: &str) -> Result<String> {
    let valid = !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':');
    if valid {
        Ok(name.to_lowercase())
    } else {
        Err(Error::InvalidHeader(format!("invalid field name {name:?}")))
    }
}

/// Returns the canonical capitalization of a header name.
///
/// `content-type` becomes `Content-Type`; a few fields keep their
/// conventional spelling (`Message-ID`, `MIME-Version`).
#[must_use]
pub fn display_name(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "message-id" => "Message-ID".to_string(),
        "content-id" => "Content-ID".to_string(),
        "mime-version" => "MIME-Version".to_string(),
        lower => lower
            .split('-')
            .map(|part| {
                let mut chars = part.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().collect::<String>() + chars.as_str()
                })
            })
            .collect::<Vec<_>>()
            .join("-"),
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", display_name(name), value.joined())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_set_get() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain").unwrap();
        assert_eq!(headers.get_first("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get_first("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.set("Subject", "one").unwrap();
        headers.set("To", "a@example.com").unwrap();
        headers.set("subject", "two").unwrap();

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["subject", "to"]);
        assert_eq!(headers.get_first("Subject"), Some("two"));
    }

    #[test]
    fn test_multi_values_only_for_address_fields() {
        let mut headers = Headers::new();
        headers.set("To", ["a@example.com", "b@example.com"]).unwrap();
        assert_eq!(
            headers.get("to").unwrap().joined(),
            "a@example.com, b@example.com"
        );

        let err = headers.set("Subject", vec!["a", "b"]).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_rejects_bad_names_and_line_breaks() {
        let mut headers = Headers::new();
        assert!(headers.set("", "x").is_err());
        assert!(headers.set("Bad Name", "x").is_err());
        assert!(headers.set("X-Test", "a\r\nBcc: evil@example.com").is_err());
    }

    #[test]
    fn test_has_value() {
        let mut headers = Headers::new();
        headers.set("Cc", "  ").unwrap();
        assert!(!headers.has_value("cc"));
        assert!(!headers.has_value("to"));
        headers.set("To", "a@b.c").unwrap();
        assert!(headers.has_value("to"));
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.set("Subject", "Test").unwrap();
        assert_eq!(headers.remove("subject"), Some(HeaderValue::from("Test")));
        assert!(headers.get("Subject").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_display() {
        let mut headers = Headers::new();
        headers.set("from", "sender@example.com").unwrap();
        headers.set("message-id", "<a@b>").unwrap();
        headers.set("mime-version", "1.0").unwrap();

        assert_eq!(
            headers.to_string(),
            "From: sender@example.com\r\nMessage-ID: <a@b>\r\nMIME-Version: 1.0\r\n"
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("content-transfer-encoding"), "Content-Transfer-Encoding");
        assert_eq!(display_name("x-mailer"), "X-Mailer");
        assert_eq!(display_name("CONTENT-ID"), "Content-ID");
    }
}
