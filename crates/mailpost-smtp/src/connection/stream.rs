//! Transport types for SMTP connections.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::{Error, Result};

/// Byte stream a [`Connection`](super::Connection) talks over.
///
/// Plain and encrypted streams are interchangeable; STARTTLS consumes the
/// plain transport and hands back an encrypted one over the same socket.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Returns true if traffic is already encrypted.
    fn is_encrypted(&self) -> bool;

    /// Wraps this transport in TLS, verifying the server as `host`.
    fn upgrade_to_tls(self, host: &str) -> impl Future<Output = Result<Self>> + Send
    where
        Self: Sized;
}

/// A stream that can be either plaintext or TLS.
pub enum SmtpStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl Transport for SmtpStream {
    fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let connector = create_tls_connector();
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                debug!(host, "TLS established");
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
        }
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector with the webpki root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Connects to a relay without TLS (plaintext or STARTTLS).
///
/// Failing to connect within `limit` is reported as
/// [`Error::Connection`] with a `TimedOut` source.
pub async fn connect_plain(host: &str, port: u16, limit: Duration) -> Result<SmtpStream> {
    let connection_error = |source: io::Error| Error::Connection {
        host: host.to_string(),
        port,
        source,
    };

    let tcp = timeout(limit, TcpStream::connect((host, port)))
        .await
        .map_err(|_| connection_error(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
        .map_err(connection_error)?;
    debug!(host, port, "TCP connected");
    Ok(SmtpStream::Plain(tcp))
}

/// Connects to a relay with TLS from the start (port 465).
pub async fn connect_tls(host: &str, port: u16, limit: Duration) -> Result<SmtpStream> {
    let plain = connect_plain(host, port, limit).await?;
    timeout(limit, plain.upgrade_to_tls(host))
        .await
        .map_err(|_| Error::TimedOut(limit))?
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
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_plain_is_unencrypted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_plain("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        assert!(!stream.is_encrypted());
        assert_eq!(format!("{stream:?}"), "SmtpStream::Plain");
    }

    #[tokio::test]
    async fn test_connect_refused_names_the_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_plain("127.0.0.1", port, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Connection { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_upgrade_rejects_invalid_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect_plain("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();

        let err = stream.upgrade_to_tls("not a host name").await.unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName(_)));
    }
}
