//! Connection state types.

use std::fmt;

/// Command whose reply is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// EHLO
    Ehlo,
    /// HELO (fallback when EHLO is rejected)
    Helo,
    /// STARTTLS
    StartTls,
    /// AUTH exchange; step 0 is the AUTH command itself.
    Auth(u8),
    /// MAIL FROM
    Mail,
    /// RCPT TO
    Rcpt,
    /// DATA, including the message body and its terminating dot
    Data,
    /// QUIT
    Quit,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo => f.write_str("EHLO"),
            Self::Helo => f.write_str("HELO"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth(step) => write!(f, "AUTH step {step}"),
            Self::Mail => f.write_str("MAIL"),
            Self::Rcpt => f.write_str("RCPT"),
            Self::Data => f.write_str("DATA"),
            Self::Quit => f.write_str("QUIT"),
        }
    }
}

/// Lifecycle of one SMTP connection.
///
/// ```text
/// Idle → Connecting → Greeted → (TlsNegotiating →) (Authenticating →) Ready
///                         InCommand(verb) while a reply is awaited
///        Closing → Closed           any fatal failure → Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing started.
    #[default]
    Idle,
    /// Transport open, greeting not yet received.
    Connecting,
    /// Greeting and EHLO done.
    Greeted,
    /// STARTTLS accepted, handshake in progress.
    TlsNegotiating,
    /// AUTH exchange in progress.
    Authenticating,
    /// Ready for a mail transaction.
    Ready,
    /// A command's reply is outstanding.
    InCommand(Verb),
    /// QUIT sent.
    Closing,
    /// Transport closed cleanly.
    Closed,
    /// A timeout or transport failure ended the connection.
    Errored,
}

impl ConnectionState {
    /// Returns true if commands may still be sent.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        !matches!(self, Self::Idle | Self::Closed | Self::Errored)
    }

    /// Returns true once the connection has ended, cleanly or not.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
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
    fn test_default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert!(!ConnectionState::Idle.is_usable());
    }

    #[test]
    fn test_usable_states() {
        assert!(ConnectionState::Greeted.is_usable());
        assert!(ConnectionState::Ready.is_usable());
        assert!(ConnectionState::InCommand(Verb::Rcpt).is_usable());
        assert!(!ConnectionState::Errored.is_usable());
        assert!(ConnectionState::Errored.is_finished());
        assert!(ConnectionState::Closed.is_finished());
        assert!(!ConnectionState::Closing.is_finished());
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(Verb::Auth(2).to_string(), "AUTH step 2");
        assert_eq!(Verb::Rcpt.to_string(), "RCPT");
    }
}
