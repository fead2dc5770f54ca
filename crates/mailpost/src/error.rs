//! Error types for the mail client.

use thiserror::Error;

/// Errors reported by [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum Error {
    /// Client configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message failed validation before any network I/O.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// An envelope address could not be used in an SMTP command.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// SMTP dialogue failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailpost_smtp::Error),

    /// Message could not be rendered.
    #[error("MIME error: {0}")]
    Mime(#[from] mailpost_mime::Error),
}

impl Error {
    /// Returns true if retrying the send later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Smtp(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
