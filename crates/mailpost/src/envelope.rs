//! SMTP envelope resolution.
//!
//! The envelope is what the relay sees in `MAIL FROM` and `RCPT TO`; it is
//! derived from the message headers but is independent of what the
//! recipients see (a `Bcc` recipient is in the envelope only).

use mailpost_mime::{Address as HeaderAddress, Message};
use mailpost_smtp::Address;

use crate::error::{Error, Result};

/// Header fields whose mailboxes receive the message, in envelope order.
const RECIPIENT_FIELDS: [&str; 3] = ["to", "cc", "bcc"];

/// Sender and recipients of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path used in `MAIL FROM`.
    pub from: Address,
    /// Forward paths for `RCPT TO`, in header order without duplicates.
    pub recipients: Vec<Address>,
}

impl Envelope {
    /// Resolves the envelope of `message`.
    ///
    /// The sender is the `Return-Path` mailbox when that header is set,
    /// otherwise the first `From` mailbox. Recipients are the mailboxes of
    /// `To`, `Cc` and `Bcc` in that order, with groups expanded. An address
    /// already seen (exact string match) is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if there is no sender or no recipient,
    /// or [`Error::InvalidAddress`] if an address cannot be used on the
    /// command line.
    pub fn from_message(message: &Message) -> Result<Self> {
        let from = first_mailbox(&message.addresses("return-path"))
            .or_else(|| first_mailbox(&message.addresses("from")))
            .ok_or_else(|| Error::Validation("message has no sender address".into()))?;

        let mut recipients: Vec<Address> = Vec::new();
        for field in RECIPIENT_FIELDS {
            for entry in message.addresses(field) {
                for spec in entry.mailboxes().into_iter().filter_map(HeaderAddress::address) {
                    if recipients.iter().any(|seen| seen.as_str() == spec) {
                        continue;
                    }
                    recipients.push(envelope_address(spec)?);
                }
            }
        }

        if recipients.is_empty() {
            return Err(Error::Validation("message has no recipient address".into()));
        }

        Ok(Self {
            from: envelope_address(&from)?,
            recipients,
        })
    }
}

fn first_mailbox(entries: &[HeaderAddress]) -> Option<String> {
    entries
        .iter()
        .flat_map(HeaderAddress::mailboxes)
        .find_map(HeaderAddress::address)
        .map(str::to_owned)
}

fn envelope_address(spec: &str) -> Result<Address> {
    Address::new(spec).map_err(|e| Error::InvalidAddress(format!("{spec}: {e}")))
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

    fn addresses(envelope: &Envelope) -> Vec<&str> {
        envelope.recipients.iter().map(Address::as_str).collect()
    }

    #[test]
    fn test_recipients_deduplicated() {
        let message = Message::builder()
            .from("zelda@gmail.com")
            .to("gannon@gmail.com")
            .cc("gannon@gmail.com")
            .bcc("gannon@gmail.com")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.from.as_str(), "zelda@gmail.com");
        assert_eq!(addresses(&envelope), ["gannon@gmail.com"]);
    }

    #[test]
    fn test_recipient_lists_flattened_in_field_order() {
        let message = Message::builder()
            .from(vec!["zelda@gmail.com"])
            .to(vec!["gannon1@gmail.com"])
            .cc(vec!["gannon2@gmail.com"])
            .bcc(vec!["gannon3@gmail.com"])
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(
            addresses(&envelope),
            ["gannon1@gmail.com", "gannon2@gmail.com", "gannon3@gmail.com"]
        );
    }

    #[test]
    fn test_groups_expanded() {
        let message = Message::builder()
            .from("Piglet <piglet@gmail.com>")
            .to("friends: pooh@gmail.com, Tigger <tigger@gmail.com>;, owl@gmail.com")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.from.as_str(), "piglet@gmail.com");
        assert_eq!(
            addresses(&envelope),
            ["pooh@gmail.com", "tigger@gmail.com", "owl@gmail.com"]
        );
    }

    #[test]
    fn test_dedupe_is_exact_match() {
        let message = Message::builder()
            .from("a@example.com")
            .to("Pooh@example.com, pooh@example.com")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(addresses(&envelope), ["Pooh@example.com", "pooh@example.com"]);
    }

    #[test]
    fn test_return_path_overrides_sender() {
        let message = Message::builder()
            .from("piglet@gmail.com")
            .header("Return-Path", "<bounces@gmail.com>")
            .to("pooh@gmail.com")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.from.as_str(), "bounces@gmail.com");
    }

    #[test]
    fn test_missing_recipients() {
        let message = Message::builder().from("piglet@gmail.com").build().unwrap();
        assert!(matches!(
            Envelope::from_message(&message),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_unusable_address() {
        assert!(matches!(envelope_address("pooh"), Err(Error::InvalidAddress(_))));
        assert!(matches!(envelope_address("@gmail.com"), Err(Error::InvalidAddress(_))));
        assert_eq!(envelope_address("pooh@gmail.com").unwrap().as_str(), "pooh@gmail.com");
    }
}
