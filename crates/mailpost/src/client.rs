//! High-level mail client.

use std::sync::Arc;

use mailpost_mime::Message;
use mailpost_smtp::{Connection, Reply, SmtpStream};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Sends messages through one relay.
///
/// Every send opens its own connection, so concurrent sends never share
/// sockets, buffers or authentication state. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
}

impl Client {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is empty or a password is
    /// given without a user.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            config: Arc::new(config.validated()?),
        })
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validates `message` and resolves its envelope without sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the message lacks a sender or
    /// recipients, or [`Error::InvalidAddress`] for an unusable address.
    pub fn envelope(&self, message: &Message) -> Result<Envelope> {
        let validity = message.check_validity();
        if !validity.is_valid {
            return Err(Error::Validation(validity.error.unwrap_or_default()));
        }
        Envelope::from_message(message)
    }

    /// Delivers `message` and returns the relay's acceptance reply.
    ///
    /// Validation happens before any network I/O. On failure the session
    /// is ended with `QUIT` when it is still usable, and exactly one error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or the first SMTP error of the dialogue.
    pub async fn send(&self, message: Message) -> Result<Reply> {
        let envelope = self.envelope(&message)?;
        let rendered = message.render()?;

        let options = self.config.connection.clone();
        info!(
            host = %options.host,
            port = options.port,
            recipients = envelope.recipients.len(),
            "sending message"
        );
        let mut conn = Connection::open(options).await?;

        match self.deliver(&mut conn, &envelope, rendered.stream).await {
            Ok(reply) => {
                // The message is already accepted; a failed QUIT changes nothing.
                if let Err(e) = conn.quit().await {
                    debug!(error = %e, "QUIT after delivery failed");
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, "send aborted");
                conn.abort().await;
                Err(e)
            }
        }
    }

    /// Spawns [`send`](Self::send) and calls `callback` once with its outcome.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_with<F>(&self, message: Message, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let outcome = client.send(message).await;
            callback(outcome);
        })
    }

    async fn deliver<R>(
        &self,
        conn: &mut Connection<SmtpStream>,
        envelope: &Envelope,
        body: R,
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(credentials) = self.config.credentials() {
            conn.authenticate(&credentials).await?;
        }

        conn.mail_from(&envelope.from).await?;
        for recipient in &envelope.recipients {
            conn.rcpt_to(recipient).await?;
        }
        Ok(conn.data(body).await?)
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

    fn client() -> Client {
        Client::new(ClientConfig::new("127.0.0.1").port(1)).unwrap()
    }

    #[test]
    fn test_new_rejects_password_without_user() {
        let err = Client::new(ClientConfig::new("localhost").password("password")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_envelope_requires_sender() {
        let message = Message::builder().to("pooh@gmail.com").build().unwrap();
        let err = client().envelope(&message).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid message: Message must have a 'from' header"
        );
    }

    #[test]
    fn test_envelope_requires_recipient() {
        let message = Message::builder().from("piglet@gmail.com").build().unwrap();
        let err = client().envelope(&message).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid message: Message must have at least one 'to', 'cc', or 'bcc' header"
        );
    }

    #[test]
    fn test_envelope_only_cc() {
        let message = Message::builder()
            .from("piglet@gmail.com")
            .cc("pooh@gmail.com")
            .build()
            .unwrap();
        let envelope = client().envelope(&message).unwrap();
        assert_eq!(envelope.recipients.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_message_fails_before_connecting() {
        // Port 1 on loopback refuses; a validation error proves no dial happened.
        let message = Message::builder().subject("no sender").build().unwrap();
        let err = client().send(message).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
