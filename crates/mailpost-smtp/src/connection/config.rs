//! Connection configuration types.

use std::time::Duration;

use crate::types::AuthMechanism;

/// Idle timeout applied to every command when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for establishing the TCP connection and TLS handshakes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext only (port 25). **Not recommended for production.**
    None,
    /// Upgrade with STARTTLS when the server advertises it, else stay plain.
    #[default]
    Opportunistic,
    /// Require STARTTLS (port 587).
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::Opportunistic => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// SMTP connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Name announced in EHLO/HELO.
    pub client_domain: String,
    /// Timeout for connecting and TLS handshakes.
    pub connect_timeout: Duration,
    /// Idle timeout while waiting on the server.
    pub timeout: Duration,
    /// Mechanisms the client may use; empty allows all.
    pub mechanisms: Vec<AuthMechanism>,
}

impl ConnectionOptions {
    /// Creates options for `host` with opportunistic TLS on port 25.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Creates an options builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::new(host)
    }

    /// Returns true if the caller permits `mechanism`.
    #[must_use]
    pub fn allows(&self, mechanism: AuthMechanism) -> bool {
        self.mechanisms.is_empty() || self.mechanisms.contains(&mechanism)
    }
}

/// Builder for connection options.
#[derive(Debug, Clone)]
pub struct ConnectionOptionsBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    client_domain: Option<String>,
    connect_timeout: Duration,
    timeout: Duration,
    mechanisms: Vec<AuthMechanism>,
}

impl ConnectionOptionsBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::default(),
            client_domain: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            mechanisms: Vec::new(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the name announced in EHLO/HELO.
    #[must_use]
    pub fn client_domain(mut self, domain: impl Into<String>) -> Self {
        self.client_domain = Some(domain.into());
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle timeout. A zero duration selects [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        self
    }

    /// Restricts the authentication mechanisms the client may use.
    #[must_use]
    pub fn mechanisms(mut self, mechanisms: impl IntoIterator<Item = AuthMechanism>) -> Self {
        self.mechanisms = mechanisms.into_iter().collect();
        self
    }

    /// Builds the options.
    #[must_use]
    pub fn build(self) -> ConnectionOptions {
        ConnectionOptions {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            client_domain: self.client_domain.unwrap_or_else(local_domain),
            connect_timeout: self.connect_timeout,
            timeout: self.timeout,
            mechanisms: self.mechanisms,
        }
    }
}

/// Local hostname for EHLO, or `localhost` when it cannot be determined.
fn local_domain() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty() && name.is_ascii())
        .unwrap_or_else(|| "localhost".to_string())
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
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::Opportunistic.default_port(), 25);
        assert_eq!(Security::StartTls.default_port(), 587);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn test_port_follows_security_unless_set() {
        let implicit = ConnectionOptions::builder("smtp.example.com")
            .security(Security::Implicit)
            .build();
        assert_eq!((implicit.security, implicit.port), (Security::Implicit, 465));

        let submission = ConnectionOptions::builder("smtp.example.com")
            .security(Security::StartTls)
            .build();
        assert_eq!(submission.port, 587);

        let pinned = ConnectionOptions::builder("smtp.example.com")
            .port(25)
            .security(Security::Implicit)
            .build();
        assert_eq!((pinned.security, pinned.port), (Security::Implicit, 25));
    }

    #[test]
    fn test_options_new() {
        let options = ConnectionOptions::new("smtp.example.com");
        assert_eq!(options.host, "smtp.example.com");
        assert_eq!(options.port, 25);
        assert_eq!(options.security, Security::Opportunistic);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(!options.client_domain.is_empty());
    }

    #[test]
    fn test_options_builder() {
        let options = ConnectionOptions::builder("smtp.example.com")
            .security(Security::Implicit)
            .client_domain("client.example.com")
            .timeout(Duration::from_secs(2))
            .mechanisms([AuthMechanism::Login])
            .build();

        assert_eq!(options.port, 465);
        assert_eq!(options.client_domain, "client.example.com");
        assert_eq!(options.timeout, Duration::from_secs(2));
        assert!(options.allows(AuthMechanism::Login));
        assert!(!options.allows(AuthMechanism::Plain));
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let options = ConnectionOptions::builder("localhost")
            .port(2525)
            .timeout(Duration::ZERO)
            .build();
        assert_eq!(options.port, 2525);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(options.allows(AuthMechanism::XOAuth2));
    }
}
