//! SMTP reply parser.
//!
//! Replies arrive as arbitrary chunks of bytes. [`ReplyBuffer`] accumulates
//! them and decides when a reply is complete; [`parse_reply`] turns a
//! complete buffer into a [`Reply`].

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses a complete SMTP reply.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// The code is taken from the final line. Lines that do not start with a
/// three digit code are kept verbatim as text.
///
/// # Errors
///
/// Returns an error if the final line does not start with a reply code.
pub fn parse_reply(raw: &str) -> Result<Reply> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let lines: Vec<&str> = raw.lines().filter(|line| !line.trim().is_empty()).collect();

    let last = lines
        .last()
        .ok_or_else(|| Error::Protocol("Empty reply".into()))?
        .trim();
    let code = reply_code(last)
        .ok_or_else(|| Error::Protocol(format!("Invalid reply line: {last}")))?;

    let text = lines
        .iter()
        .map(|line| match reply_code(line) {
            Some(_) => line.get(4..).unwrap_or_default().to_string(),
            None => (*line).to_string(),
        })
        .collect();

    Ok(Reply {
        code: ReplyCode::new(code),
        lines: text,
        raw: raw.to_string(),
    })
}

/// Returns the code of a line shaped `DDD`, `DDD text` or `DDD-text`.
fn reply_code(line: &str) -> Option<u16> {
    let bytes = line.as_bytes();
    let digits = bytes.get(..3)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    match bytes.get(3) {
        None | Some(b' ' | b'-' | b'\t') => line.get(..3)?.parse().ok(),
        Some(_) => None,
    }
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the
/// last line. A bare code also ends a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    let line = line.trim_end();
    reply_code(line).is_some() && line.as_bytes().get(3) != Some(&b'-')
}

/// Accumulates received bytes until they form a complete reply.
///
/// Only the final line of the buffer is examined: once the buffer ends
/// with a line terminator and its last line is a final reply line, the
/// whole buffer is parsed as one reply and cleared. The client never has
/// more than one command outstanding, so a buffer holds at most one reply.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    buffer: Vec<u8>,
}

impl ReplyBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends a chunk and returns the reply it completes, if any.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Reply> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(b"\n") {
            return None;
        }

        let text = String::from_utf8_lossy(&self.buffer);
        let last = text.trim().lines().last().unwrap_or_default();
        if !is_last_reply_line(last) {
            return None;
        }

        let reply = parse_reply(&text).ok();
        self.buffer.clear();
        reply
    }

    /// Returns true if no partial reply is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
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
    fn test_parse_single_line_reply() {
        let reply = parse_reply("250 OK\r\n").unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.lines, vec!["OK"]);
        assert_eq!(reply.raw, "250 OK");
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply = parse_reply("250-First line\r\n250-Second line\r\n250 Last line\r\n").unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.lines, vec!["First line", "Second line", "Last line"]);
    }

    #[test]
    fn test_parse_bare_code_and_empty_continuation() {
        let reply = parse_reply("250-\r\n250\r\n").unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.lines, vec!["", ""]);
    }

    #[test]
    fn test_parse_keeps_uncoded_lines() {
        let reply = parse_reply("hello there\r\n554 go away\r\n").unwrap();
        assert_eq!(reply.code.as_u16(), 554);
        assert_eq!(reply.lines, vec!["hello there", "go away"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply("").is_err());
        assert!(parse_reply("25\r\n").is_err());
        assert!(parse_reply("ABC OK\r\n").is_err());
        assert!(parse_reply("2500 OK\r\n").is_err());
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_buffer_single_chunk() {
        let mut buffer = ReplyBuffer::new();
        let reply = buffer.feed(b"250 OK\r\n").unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_waits_for_final_line() {
        let mut buffer = ReplyBuffer::new();
        assert!(buffer.feed(b"250-a\r\n").is_none());
        assert!(!buffer.is_empty());

        let reply = buffer.feed(b"250 b\r\n").unwrap();
        assert_eq!(reply.lines, vec!["a", "b"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_waits_for_line_terminator() {
        let mut buffer = ReplyBuffer::new();
        assert!(buffer.feed(b"220 smtp.exa").is_none());
        assert!(buffer.feed(b"mple.com ESMTP").is_none());
        let reply = buffer.feed(b"\r\n").unwrap();
        assert_eq!(reply.text(), "smtp.example.com ESMTP");
    }

    #[test]
    fn test_buffer_coalesces_replies_in_one_chunk() {
        let mut buffer = ReplyBuffer::new();
        let reply = buffer.feed(b"250 first\r\n251 second\r\n").unwrap();
        assert_eq!(reply.code.as_u16(), 251);
        assert_eq!(reply.lines, vec!["first", "second"]);
    }

    #[test]
    fn test_buffer_drops_garbage_and_recovers() {
        let mut buffer = ReplyBuffer::new();
        assert!(buffer.feed(b"garbage\r\n").is_none());
        let reply = buffer.feed(b"421 bye\r\n").unwrap();
        assert_eq!(reply.code, ReplyCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.lines, vec!["garbage", "bye"]);
    }
}
