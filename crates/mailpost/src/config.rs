//! Client configuration.

use std::time::Duration;

use mailpost_smtp::{ConnectionOptions, Credentials, DEFAULT_TIMEOUT, Security};

use crate::error::{Error, Result};

/// Settings shared by every send made through one [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay address, security mode and timeouts.
    pub connection: ConnectionOptions,
    /// Login name; authentication is skipped without one.
    pub user: Option<String>,
    /// Password, or the bearer token when XOAUTH2 is negotiated.
    pub password: Option<String>,
    /// Set once a port was chosen explicitly; `security` then leaves it alone.
    port_pinned: bool,
}

impl ClientConfig {
    /// Creates a configuration for `host` with default connection options.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            port_pinned: false,
            ..Self::with_options(ConnectionOptions::new(host))
        }
    }

    /// Creates a configuration from prepared connection options.
    ///
    /// The port in `connection` counts as explicitly chosen.
    #[must_use]
    pub const fn with_options(connection: ConnectionOptions) -> Self {
        Self {
            connection,
            user: None,
            password: None,
            port_pinned: true,
        }
    }

    /// Sets the login name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the per-command idle timeout. Zero selects [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout = timeout;
        self
    }

    /// Sets the security mode, keeping an explicitly chosen port.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        if !self.port_pinned {
            self.connection.port = security.default_port();
        }
        self.connection.security = security;
        self
    }

    /// Sets the relay port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.connection.port = port;
        self.port_pinned = true;
        self
    }

    /// Checks the settings and fills in defaults.
    pub(crate) fn validated(mut self) -> Result<Self> {
        if self.connection.host.is_empty() {
            return Err(Error::Config("host cannot be empty".into()));
        }
        if self.password.is_some() && self.user.is_none() {
            return Err(Error::Config("password given without a user".into()));
        }
        if self.connection.timeout.is_zero() {
            self.connection.timeout = DEFAULT_TIMEOUT;
        }
        Ok(self)
    }

    /// Returns the credentials to authenticate with, if a user is set.
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| {
            Credentials::new(user.clone(), self.password.clone().unwrap_or_default())
        })
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
    fn test_zero_timeout_uses_default() {
        let config = ClientConfig::new("127.0.0.1")
            .timeout(Duration::ZERO)
            .validated()
            .unwrap();
        assert_eq!(config.connection.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_explicit_timeout_kept() {
        let config = ClientConfig::new("127.0.0.1")
            .timeout(Duration::from_secs(9))
            .validated()
            .unwrap();
        assert_eq!(config.connection.timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_password_without_user_rejected() {
        let err = ClientConfig::new("127.0.0.1")
            .password("honey")
            .validated()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            ClientConfig::new("").validated(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_security_moves_default_port() {
        let config = ClientConfig::new("smtp.example.com").security(Security::Implicit);
        assert_eq!(config.connection.port, 465);

        let config = ClientConfig::new("smtp.example.com")
            .port(2525)
            .security(Security::Implicit);
        assert_eq!(config.connection.port, 2525);
    }

    #[test]
    fn test_explicit_default_port_survives_security_change() {
        let config = ClientConfig::new("smtp.example.com")
            .port(25)
            .security(Security::Implicit);
        assert_eq!(config.connection.port, 25);
        assert_eq!(config.connection.security, Security::Implicit);

        let config = ClientConfig::new("smtp.example.com")
            .security(Security::Implicit)
            .security(Security::StartTls);
        assert_eq!(config.connection.port, 587);

        let options = ConnectionOptions::builder("smtp.example.com").port(465).build();
        let config = ClientConfig::with_options(options).security(Security::None);
        assert_eq!(config.connection.port, 465);
    }

    #[test]
    fn test_credentials_only_with_user() {
        assert!(ClientConfig::new("h").credentials().is_none());

        let creds = ClientConfig::new("h").user("pooh").credentials().unwrap();
        assert_eq!(creds.user, "pooh");
    }
}
