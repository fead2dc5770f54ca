//! Reply reader bound to a transport.
//!
//! [`ResponseReader`] turns the bytes arriving on a transport into
//! [`ReplyEvent`]s: complete replies, or the terminal condition that ended
//! the stream. Every read is bounded by the idle timeout.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::parser::ReplyBuffer;
use crate::types::Reply;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 4096;

/// Something the reader observed on the transport.
#[derive(Debug)]
pub enum ReplyEvent {
    /// A complete reply.
    Reply(Reply),
    /// The transport failed.
    Error(io::Error),
    /// Nothing arrived within the idle timeout; the transport was shut down.
    TimedOut(Duration),
    /// The peer reset or aborted the connection.
    ConnectionClosed(io::Error),
    /// The peer closed its side of the stream.
    ConnectionEnded,
}

impl ReplyEvent {
    /// Converts the event into the reply or the error it represents.
    ///
    /// # Errors
    ///
    /// Returns the terminal condition as an [`Error`].
    pub fn into_reply(self) -> Result<Reply, Error> {
        match self {
            Self::Reply(reply) => Ok(reply),
            Self::Error(e) => Err(Error::Io(e)),
            Self::TimedOut(after) => Err(Error::TimedOut(after)),
            Self::ConnectionClosed(_) => Err(Error::ConnectionClosed),
            Self::ConnectionEnded => Err(Error::ConnectionEnded),
        }
    }

    /// Returns true for every event except a reply.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reply(_))
    }
}

type TerminalHook = Box<dyn FnOnce(&Error) + Send>;

/// Reads replies from a transport until detached.
///
/// The reader owns the partial-reply buffer; the transport stays with the
/// caller so it can write commands and swap in a TLS stream between reads.
pub struct ResponseReader {
    buffer: ReplyBuffer,
    idle_timeout: Duration,
    on_terminal_error: Option<TerminalHook>,
    attached: bool,
}

impl fmt::Debug for ResponseReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseReader")
            .field("buffer", &self.buffer)
            .field("idle_timeout", &self.idle_timeout)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl ResponseReader {
    /// Starts reading with the given idle timeout.
    ///
    /// `on_terminal_error` runs at most once, when [`detach`](Self::detach)
    /// is called with an error.
    pub fn attach(
        idle_timeout: Duration,
        on_terminal_error: impl FnOnce(&Error) + Send + 'static,
    ) -> Self {
        Self {
            buffer: ReplyBuffer::new(),
            idle_timeout,
            on_terminal_error: Some(Box::new(on_terminal_error)),
            attached: true,
        }
    }

    /// Returns the idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns true until [`detach`](Self::detach) is called.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Waits for the next event on `transport`.
    ///
    /// Returns `None` once detached. On idle timeout the transport is shut
    /// down before [`ReplyEvent::TimedOut`] is returned.
    pub async fn next_event<T>(&mut self, transport: &mut T) -> Option<ReplyEvent>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.attached {
            return None;
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = match timeout(self.idle_timeout, transport.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => {
                    warn!(after = ?self.idle_timeout, "timed out waiting for the server");
                    // Best effort; the stream is abandoned either way.
                    let _ = timeout(self.idle_timeout, transport.shutdown()).await;
                    return Some(ReplyEvent::TimedOut(self.idle_timeout));
                }
            };

            match read {
                Ok(0) => {
                    debug!("server ended the connection");
                    return Some(ReplyEvent::ConnectionEnded);
                }
                Ok(n) => {
                    trace!(bytes = n, "received");
                    if let Some(reply) = self.buffer.feed(&chunk[..n]) {
                        debug!(code = reply.code.as_u16(), "S: {}", reply.raw);
                        return Some(ReplyEvent::Reply(reply));
                    }
                }
                Err(e) if is_close(&e) => {
                    debug!(error = %e, "server closed the connection");
                    return Some(ReplyEvent::ConnectionClosed(e));
                }
                Err(e) => {
                    warn!(error = %e, "connection encountered an error");
                    return Some(ReplyEvent::Error(e));
                }
            }
        }
    }

    /// Stops reading. Idempotent.
    ///
    /// With an error, the terminal-error hook runs if it has not run yet.
    pub fn detach(&mut self, error: Option<&Error>) {
        self.attached = false;
        if let Some(error) = error
            && let Some(hook) = self.on_terminal_error.take()
        {
            hook(error);
        }
    }
}

fn is_close(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::io::Builder;

    fn reader() -> ResponseReader {
        ResponseReader::attach(Duration::from_secs(1), |_| {})
    }

    #[tokio::test]
    async fn test_single_reply() {
        let mut mock = Builder::new().read(b"250 OK\r\n").build();
        let mut reader = reader();

        let event = reader.next_event(&mut mock).await.unwrap();
        let reply = event.into_reply().unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.text(), "OK");
    }

    #[tokio::test]
    async fn test_multi_line_reply_across_chunks() {
        let mut mock = Builder::new().read(b"250-a\r\n").read(b"250 b\r\n").build();
        let mut reader = reader();

        let reply = reader.next_event(&mut mock).await.unwrap().into_reply().unwrap();
        assert_eq!(reply.lines, vec!["a", "b"]);
        assert_eq!(reply.raw, "250-a\r\n250 b");
    }

    #[tokio::test]
    async fn test_replies_in_sequence() {
        let mut mock = Builder::new()
            .read(b"220 ready\r\n")
            .read(b"250 ok\r\n")
            .build();
        let mut reader = reader();

        let first = reader.next_event(&mut mock).await.unwrap().into_reply().unwrap();
        let second = reader.next_event(&mut mock).await.unwrap().into_reply().unwrap();
        assert_eq!(first.code, ReplyCode::SERVICE_READY);
        assert_eq!(second.code, ReplyCode::OK);
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut mock = Builder::new().read(b"250-partial\r\n").build();
        let mut reader = reader();

        let event = reader.next_event(&mut mock).await.unwrap();
        assert!(matches!(event, ReplyEvent::ConnectionEnded));
        assert!(matches!(event.into_reply(), Err(Error::ConnectionEnded)));
    }

    #[tokio::test]
    async fn test_reset_is_connection_closed() {
        let mut mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = reader();

        let event = reader.next_event(&mut mock).await.unwrap();
        assert!(matches!(event, ReplyEvent::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_other_failure_is_error() {
        let mut mock = Builder::new()
            .read_error(io::Error::other("boom"))
            .build();
        let mut reader = reader();

        let event = reader.next_event(&mut mock).await.unwrap();
        assert!(event.is_terminal());
        assert!(matches!(event.into_reply(), Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_idle_timeout_shuts_transport_down() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut reader = ResponseReader::attach(Duration::from_millis(50), |_| {});

        let event = reader.next_event(&mut client).await.unwrap();
        assert!(matches!(event, ReplyEvent::TimedOut(d) if d == Duration::from_millis(50)));

        // The peer sees end of stream after the shutdown.
        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_detach_runs_hook_once_and_silences_reader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut reader = ResponseReader::attach(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let error = Error::TimedOut(Duration::from_secs(1));
        reader.detach(Some(&error));
        reader.detach(Some(&Error::ConnectionClosed));
        reader.detach(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!reader.is_attached());

        let mut mock = Builder::new().build();
        assert!(reader.next_event(&mut mock).await.is_none());
    }

    #[tokio::test]
    async fn test_detach_without_error_keeps_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut reader = ResponseReader::attach(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reader.detach(None);
        reader.detach(Some(&Error::ConnectionEnded));
        // The hook is still available; the first error detach runs it.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
