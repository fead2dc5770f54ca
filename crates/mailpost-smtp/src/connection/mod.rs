//! SMTP connection management.

mod client;
mod config;
mod data;
mod state;
mod stream;

pub use client::{Connection, MAX_RCPT_ATTEMPTS};
pub use config::{
    ConnectionOptions, ConnectionOptionsBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT,
    Security,
};
pub use data::DotStuffer;
pub use state::{ConnectionState, Verb};
pub use stream::{SmtpStream, Transport, connect_plain, connect_tls, create_tls_connector};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// Server capabilities from the greeting and EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Checks if 8BITMIME is supported.
    #[must_use]
    pub fn supports_8bitmime(&self) -> bool {
        self.supports(&Extension::EightBitMime)
    }

    /// Returns the maximum message size, if advertised.
    ///
    /// When several `SIZE` lines are present the smallest limit wins.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions
            .iter()
            .filter_map(|ext| match ext {
                Extension::Size(size) => *size,
                _ => None,
            })
            .min()
    }

    /// Returns supported authentication mechanisms in preference order.
    ///
    /// Mechanisms from every `AUTH` line (including the obsolete `AUTH=`
    /// form) are merged without duplicates.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        let advertised: HashSet<AuthMechanism> = self
            .extensions
            .iter()
            .filter_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();
        AuthMechanism::PREFERENCE
            .into_iter()
            .filter(|m| advertised.contains(m))
            .collect()
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
    fn test_server_info_queries() {
        let info = ServerInfo {
            hostname: "smtp.example.com".to_string(),
            extensions: ["STARTTLS", "8BITMIME", "SIZE 35882577", "AUTH LOGIN XOAUTH2"]
                .into_iter()
                .map(Extension::parse)
                .collect(),
        };
        assert!(info.supports_starttls());
        assert!(info.supports_8bitmime());
        assert_eq!(info.max_message_size(), Some(35_882_577));
        assert_eq!(
            info.auth_mechanisms(),
            vec![AuthMechanism::Login, AuthMechanism::XOAuth2]
        );
    }

    #[test]
    fn test_auth_lines_are_merged() {
        let info = ServerInfo {
            hostname: "smtp.example.com".to_string(),
            extensions: ["AUTH LOGIN PLAIN CRAM-MD5", "AUTH=LOGIN", "SIZE 2000", "SIZE 1000"]
                .into_iter()
                .map(Extension::parse)
                .collect(),
        };
        for _ in 0..16 {
            assert_eq!(
                info.auth_mechanisms(),
                vec![
                    AuthMechanism::Plain,
                    AuthMechanism::Login,
                    AuthMechanism::CramMd5
                ]
            );
            assert_eq!(info.max_message_size(), Some(1000));
        }
    }

    #[test]
    fn test_server_info_empty() {
        let info = ServerInfo::default();
        assert!(!info.supports_starttls());
        assert_eq!(info.max_message_size(), None);
        assert!(info.auth_mechanisms().is_empty());
    }
}
