//! DATA payload framing.

/// Dot-stuffs a message body chunk by chunk.
///
/// Lines starting with `.` get an extra `.`, bare LF becomes CRLF, and
/// [`finish`](Self::finish) appends the terminating `.` line. State is
/// carried across chunk boundaries, so a CRLF or a leading dot split
/// between two chunks is handled the same as within one.
#[derive(Debug)]
pub struct DotStuffer {
    at_line_start: bool,
    after_cr: bool,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates a stuffer positioned at the start of the body.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            at_line_start: true,
            after_cr: false,
        }
    }

    /// Stuffs one chunk, appending the result to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        out.reserve(chunk.len() + chunk.len() / 64);
        for &byte in chunk {
            match byte {
                b'\n' => {
                    if !self.after_cr {
                        out.push(b'\r');
                    }
                    out.push(b'\n');
                    self.at_line_start = true;
                    self.after_cr = false;
                    continue;
                }
                b'.' if self.at_line_start => out.push(b'.'),
                _ => {}
            }
            out.push(byte);
            self.at_line_start = false;
            self.after_cr = byte == b'\r';
        }
    }

    /// Ends the body: closes an unterminated last line and adds `.\r\n`.
    pub fn finish(self, out: &mut Vec<u8>) {
        if self.after_cr {
            out.push(b'\n');
        } else if !self.at_line_start {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
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

    fn stuff(chunks: &[&[u8]]) -> Vec<u8> {
        let mut stuffer = DotStuffer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            stuffer.feed(chunk, &mut out);
        }
        stuffer.finish(&mut out);
        out
    }

    #[test]
    fn test_leading_dots_are_doubled() {
        assert_eq!(stuff(&[b".hidden\r\nok\r\n..two\r\n"]), b"..hidden\r\nok\r\n...two\r\n.\r\n");
    }

    #[test]
    fn test_inner_dots_untouched() {
        assert_eq!(stuff(&[b"a.b\r\n"]), b"a.b\r\n.\r\n");
    }

    #[test]
    fn test_lone_dot_line_cannot_end_the_body_early() {
        assert_eq!(stuff(&[b"one\r\n.\r\ntwo\r\n"]), b"one\r\n..\r\ntwo\r\n.\r\n");
    }

    #[test]
    fn test_split_across_chunks() {
        assert_eq!(stuff(&[b"line\r", b"\n", b".dot\r\n"]), b"line\r\n..dot\r\n.\r\n");
        assert_eq!(stuff(&[b"line\r\n", b".", b"dot"]), b"line\r\n..dot\r\n.\r\n");
    }

    #[test]
    fn test_bare_lf_normalized() {
        assert_eq!(stuff(&[b"a\nb\n"]), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_unterminated_body_gets_line_end() {
        assert_eq!(stuff(&[b"no newline"]), b"no newline\r\n.\r\n");
        assert_eq!(stuff(&[b"cr only\r"]), b"cr only\r\n.\r\n");
        assert_eq!(stuff(&[]), b".\r\n");
    }
}
