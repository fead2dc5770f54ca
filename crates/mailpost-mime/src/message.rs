//! Outgoing message description and validation.

use crate::address::{self, Address};
use crate::attachment::Attachment;
use crate::error::Result;
use crate::header::{HeaderValue, Headers};

/// Outcome of [`Message::check_validity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityResult {
    /// Whether the message can be sent.
    pub is_valid: bool,
    /// Why it cannot, when invalid.
    pub error: Option<String>,
}

impl ValidityResult {
    const fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn invalid(error: &str) -> Self {
        Self {
            is_valid: false,
            error: Some(error.to_string()),
        }
    }
}

/// An application-level message: headers, optional plain text, and
/// attachments (one of which may be the HTML alternative).
#[derive(Debug)]
pub struct Message {
    pub(crate) headers: Headers,
    pub(crate) text: Option<String>,
    pub(crate) attachments: Vec<Attachment>,
    pub(crate) utc: bool,
    pub(crate) message_id_host: Option<String>,
}

impl Message {
    /// Starts building a message.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Returns the caller-supplied headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the plain text body, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Returns the attachments.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Parses every value of an address header.
    #[must_use]
    pub fn addresses(&self, field: &str) -> Vec<Address> {
        self.headers
            .get(field)
            .map(|value| address::parse_all(value.values()))
            .unwrap_or_default()
    }

    /// Checks that the message has a sender and at least one recipient.
    #[must_use]
    pub fn check_validity(&self) -> ValidityResult {
        if !self.headers.has_value("from") {
            return ValidityResult::invalid("Message must have a 'from' header");
        }
        if !["to", "cc", "bcc"].iter().any(|f| self.headers.has_value(f)) {
            return ValidityResult::invalid(
                "Message must have at least one 'to', 'cc', or 'bcc' header",
            );
        }
        ValidityResult::valid()
    }
}

/// Builder for [`Message`].
///
/// Header values are collected as given and validated by
/// [`build`](Self::build), so setters never fail.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    headers: Vec<(String, HeaderValue)>,
    text: Option<String>,
    attachments: Vec<Attachment>,
    utc: bool,
    message_id_host: Option<String>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an arbitrary header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(self, value: impl Into<HeaderValue>) -> Self {
        self.header("from", value)
    }

    /// Sets the primary recipients.
    #[must_use]
    pub fn to(self, value: impl Into<HeaderValue>) -> Self {
        self.header("to", value)
    }

    /// Sets the carbon-copy recipients.
    #[must_use]
    pub fn cc(self, value: impl Into<HeaderValue>) -> Self {
        self.header("cc", value)
    }

    /// Sets the blind carbon-copy recipients; never written to the message.
    #[must_use]
    pub fn bcc(self, value: impl Into<HeaderValue>) -> Self {
        self.header("bcc", value)
    }

    /// Sets the reply-to addresses.
    #[must_use]
    pub fn reply_to(self, value: impl Into<HeaderValue>) -> Self {
        self.header("reply-to", value)
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("subject", subject.into())
    }

    /// Sets the `Message-ID`; angle brackets are added if missing.
    #[must_use]
    pub fn message_id(self, id: impl Into<String>) -> Self {
        self.header("message-id", id.into())
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Renders a generated `Date` in UTC instead of local time.
    #[must_use]
    pub const fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Host part of a generated `Message-ID`; defaults to the local host name.
    #[must_use]
    pub fn message_id_host(mut self, host: impl Into<String>) -> Self {
        self.message_id_host = Some(host.into());
        self
    }

    /// Validates the headers and builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`](crate::Error::InvalidHeader) for an
    /// invalid name, a value with line breaks, or a list value on a
    /// single-valued field.
    pub fn build(self) -> Result<Message> {
        let mut headers = Headers::new();
        for (name, value) in self.headers {
            let value = if name.eq_ignore_ascii_case("message-id") {
                normalize_message_id(value)
            } else {
                value
            };
            headers.set(&name, value)?;
        }

        Ok(Message {
            headers,
            text: self.text,
            attachments: self.attachments,
            utc: self.utc,
            message_id_host: self.message_id_host,
        })
    }
}

fn normalize_message_id(value: HeaderValue) -> HeaderValue {
    match value {
        HeaderValue::Single(id) => {
            let id = id.trim();
            if id.starts_with('<') && id.ends_with('>') {
                HeaderValue::Single(id.to_string())
            } else {
                HeaderValue::Single(format!("<{id}>"))
            }
        }
        multi @ HeaderValue::Multi(_) => multi,
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
    use crate::error::Error;

    #[test]
    fn test_validity_requires_from() {
        let result = MessageBuilder::new().build().unwrap().check_validity();
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Message must have a 'from' header"));
    }

    #[test]
    fn test_validity_requires_recipient() {
        let result = MessageBuilder::new()
            .from("piglet@gmail.com")
            .build()
            .unwrap()
            .check_validity();
        assert!(!result.is_valid);
        assert_eq!(
            result.error.as_deref(),
            Some("Message must have at least one 'to', 'cc', or 'bcc' header")
        );
    }

    #[test]
    fn test_validity_accepts_any_recipient_field() {
        let builders = [
            MessageBuilder::new().to("pooh@gmail.com"),
            MessageBuilder::new().to(["pooh@gmail.com"]),
            MessageBuilder::new().cc("pooh@gmail.com"),
            MessageBuilder::new().cc(["pooh@gmail.com"]),
            MessageBuilder::new().bcc("pooh@gmail.com"),
            MessageBuilder::new().bcc(["pooh@gmail.com"]),
        ];
        for builder in builders {
            let result = builder.from("piglet@gmail.com").build().unwrap().check_validity();
            assert!(result.is_valid);
            assert_eq!(result.error, None);
        }
    }

    #[test]
    fn test_blank_recipient_is_missing() {
        let result = MessageBuilder::new()
            .from("piglet@gmail.com")
            .to("")
            .build()
            .unwrap()
            .check_validity();
        assert!(!result.is_valid);
    }

    #[test]
    fn test_message_id_gets_brackets() {
        let message = MessageBuilder::new()
            .message_id("this is a special id")
            .build()
            .unwrap();
        assert_eq!(
            message.headers().get_first("Message-ID"),
            Some("<this is a special id>")
        );

        let message = MessageBuilder::new().message_id("<a@b>").build().unwrap();
        assert_eq!(message.headers().get_first("message-id"), Some("<a@b>"));
    }

    #[test]
    fn test_build_rejects_multi_valued_subject() {
        let err = MessageBuilder::new()
            .header("Subject", vec!["a", "b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_addresses_flatten_lists() {
        let message = MessageBuilder::new()
            .to(["a <a@example.com>", "b@example.com, c@example.com"])
            .build()
            .unwrap();
        let addresses = message.addresses("to");
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0], Address::single("a", "a@example.com"));
    }
}
