//! Lazily produced message bytes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;
use crate::header::Headers;
use crate::message::Message;
use crate::render::{Plan, write_steps};

/// Bytes buffered between the writer task and the reader.
///
/// When the buffer is full the writer (and with it the attachment source
/// being drained) waits until the reader catches up.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A built message: final headers plus the full message text as a stream.
#[derive(Debug)]
pub struct RenderedMessage {
    /// Top-level headers as written, including generated `Date`,
    /// `Message-ID`, `MIME-Version` and `Content-Type`. Never contains `Bcc`.
    pub headers: Headers,
    /// The complete message (header block, blank line, MIME body).
    pub stream: MessageStream,
}

/// Async byte stream of a rendered message.
///
/// Rendering runs in a background task writing into a bounded pipe. If
/// rendering fails (for example an attachment file cannot be opened) the
/// reader observes the failure as an I/O error instead of a clean end of
/// stream. Dropping the stream stops the task.
#[derive(Debug)]
pub struct MessageStream {
    reader: DuplexStream,
    task: Option<JoinHandle<Result<()>>>,
}

impl AsyncRead for MessageStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let wanted = buf.remaining() > 0;

        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;

        if wanted && buf.filled().len() == before {
            // End of pipe: surface how the writer finished.
            if let Some(task) = this.task.as_mut() {
                let outcome = ready!(Pin::new(task).poll(cx));
                this.task = None;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "message rendering failed");
                        return Poll::Ready(Err(io::Error::other(e)));
                    }
                    Err(e) => return Poll::Ready(Err(io::Error::other(e))),
                }
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Renders a message into its headers and a lazily produced byte stream.
///
/// Header problems are reported here; problems reading attachment sources
/// are reported through the stream.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if a header cannot be rendered.
pub fn build(message: Message) -> Result<RenderedMessage> {
    let Plan { headers, steps } = Plan::new(message)?;
    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let task = tokio::spawn(async move { write_steps(steps, &mut writer).await });

    Ok(RenderedMessage {
        headers,
        stream: MessageStream {
            reader,
            task: Some(task),
        },
    })
}

impl Message {
    /// Renders this message; see [`build`].
    ///
    /// # Errors
    ///
    /// Returns an error if a header cannot be rendered.
    pub fn render(self) -> Result<RenderedMessage> {
        build(self)
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
    use crate::attachment::Attachment;
    use crate::encoding::decode_base64;
    use crate::message::MessageBuilder;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_stream_yields_full_message() {
        let message = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .subject("hi")
            .text("body")
            .build()
            .unwrap();
        let RenderedMessage { headers, mut stream } = build(message).unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("From: a@example.com\r\nTo: b@example.com\r\nSubject: hi\r\n"));
        assert!(out.contains(&format!("Message-ID: {}\r\n", headers.get_first("message-id").unwrap())));
        assert!(out.ends_with("\r\n\r\nbody\r\n"));
    }

    #[tokio::test]
    async fn test_large_attachment_passes_through_pipe() {
        let data: Vec<u8> = (0..=255u8).cycle().take(PIPE_CAPACITY * 3).collect();
        let message = MessageBuilder::new()
            .attach(Attachment::from_data(data.clone()))
            .build()
            .unwrap();
        let RenderedMessage { mut stream, .. } = build(message).unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        let encoded: String = out
            .split("Content-Disposition: attachment\r\n\r\n")
            .nth(1)
            .unwrap()
            .lines()
            .take_while(|line| !line.starts_with("--"))
            .collect();
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[tokio::test]
    async fn test_missing_file_surfaces_as_read_error() {
        let message = MessageBuilder::new()
            .text("x")
            .attach(Attachment::from_path("/definitely/not/here.pdf"))
            .build()
            .unwrap();
        let RenderedMessage { mut stream, .. } = build(message).unwrap();

        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("I/O error"));
    }
}
