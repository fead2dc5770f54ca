//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

use crate::types::Reply;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name not usable for TLS server verification.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The relay could not be reached.
    #[error("Connection to {host}:{port} failed: {source}")]
    Connection {
        /// Relay host.
        host: String,
        /// Relay port.
        port: u16,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection abruptly.
    #[error("Connection has closed")]
    ConnectionClosed,

    /// The peer ended the stream.
    #[error("Connection has ended")]
    ConnectionEnded,

    /// No reply arrived within the idle timeout.
    #[error("Timed out after {0:?} waiting for the server")]
    TimedOut(Duration),

    /// Unexpected reply or reply sequence.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Credentials rejected or no usable mechanism.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transient failure (4xx).
    #[error("Transient failure {code}: {message}")]
    Transient {
        /// Reply code (e.g., 450).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Permanent failure (5xx).
    #[error("Permanent failure {code}: {message}")]
    Permanent {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Operation not allowed in the current connection state.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Classifies a reply that did not have the expected code.
    ///
    /// 4xx becomes [`Error::Transient`], 5xx [`Error::Permanent`]; any other
    /// code at this point is a [`Error::Protocol`] error.
    #[must_use]
    pub fn from_reply(command: &str, reply: &Reply) -> Self {
        let code = reply.code.as_u16();
        let message = reply.text();
        if reply.is_transient_error() {
            Self::Transient { code, message }
        } else if reply.is_permanent_error() {
            Self::Permanent { code, message }
        } else {
            Self::Protocol(format!("unexpected reply to {command}: {code} {message}"))
        }
    }

    /// Returns the reply code for server-reported failures.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if the error ended the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tls(_)
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::ConnectionEnded
                | Self::TimedOut(_)
        )
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
    use crate::types::ReplyCode;

    #[test]
    fn test_from_reply_classifies_codes() {
        let busy = Reply::new(ReplyCode::MAILBOX_BUSY, vec!["greylisted".to_string()]);
        let err = Error::from_reply("RCPT", &busy);
        assert!(err.is_transient());
        assert_eq!(err.code(), Some(450));

        let denied = Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, vec!["no such user".to_string()]);
        let err = Error::from_reply("RCPT", &denied);
        assert!(err.is_permanent());
        assert_eq!(err.to_string(), "Permanent failure 550: no such user");

        let odd = Reply::new(ReplyCode::START_DATA, vec!["go".to_string()]);
        assert!(matches!(Error::from_reply("MAIL", &odd), Error::Protocol(_)));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::TimedOut(Duration::from_secs(1)).is_fatal());
        assert!(Error::ConnectionEnded.is_fatal());
        assert!(!Error::Auth("bad".into()).is_fatal());
    }
}
