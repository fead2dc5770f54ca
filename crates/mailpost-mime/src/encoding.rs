//! MIME encoding and decoding utilities.
//!
//! Supports Base64 (with fixed-width line output), Quoted-Printable body
//! encoding, and RFC 2047 encoded-words for header values.

use std::borrow::Cow;
use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{Error, Result};

/// Maximum line length for encoded body lines (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Source bytes per Base64 line (57 bytes encode to 76 characters).
pub const BASE64_LINE_BYTES: usize = 57;

/// Longest Q payload kept in a single encoded-word.
const MAX_Q_WORD_LENGTH: usize = 52;

/// Shortest Q payload a split may produce; fits a 4-octet UTF-8 sequence.
const MIN_Q_WORD_LENGTH: usize = 12;

/// Most source bytes placed in a single B encoded-word.
const MAX_B_WORD_BYTES: usize = 39;

/// Encoded-word transfer encoding (RFC 2047 section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordEncoding {
    /// "Q" encoding, a quoted-printable variant.
    #[default]
    Q,
    /// "B" encoding, Base64.
    B,
}

impl WordEncoding {
    /// Returns the single-letter label used inside the encoded-word.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Q => "Q",
            Self::B => "B",
        }
    }
}

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(Into::into)
}

/// Incremental Base64 encoder producing CRLF-terminated 76-column lines.
///
/// Input may arrive in chunks of any size; output is identical to encoding
/// the concatenated input in one pass.
#[derive(Debug, Default)]
pub struct Base64LineEncoder {
    pending: Vec<u8>,
}

impl Base64LineEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let whole = self.pending.len() / BASE64_LINE_BYTES * BASE64_LINE_BYTES;
        let mut out = String::with_capacity(whole / 3 * 4 + whole / BASE64_LINE_BYTES * 2);
        for line in self.pending[..whole].chunks(BASE64_LINE_BYTES) {
            out.push_str(&STANDARD.encode(line));
            out.push_str("\r\n");
        }
        self.pending.drain(..whole);
        out
    }

    /// Flushes the final partial line, if any.
    #[must_use]
    pub fn finish(self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let mut out = STANDARD.encode(&self.pending);
        out.push_str("\r\n");
        out
    }
}

/// Resolves a charset label, rejecting labels the transcoder does not know.
fn lookup_charset(charset: &str) -> Result<&'static Encoding> {
    Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| Error::UnknownCharset(charset.to_string()))
}

/// Returns the UTF-8 byte sequence for `input` interpreted in `charset`.
fn utf8_bytes<'a>(input: &'a [u8], charset: &str) -> Result<Cow<'a, [u8]>> {
    let encoding = lookup_charset(charset)?;
    if encoding == UTF_8 {
        return Ok(Cow::Borrowed(input));
    }
    let (text, _, _) = encoding.decode(input);
    Ok(match text {
        Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
        Cow::Owned(text) => Cow::Owned(text.into_bytes()),
    })
}

/// Returns `input` interpreted in `charset` as text.
fn utf8_text<'a>(input: &'a [u8], charset: &str) -> Result<Cow<'a, str>> {
    let encoding = lookup_charset(charset)?;
    let (text, _) = encoding.decode_without_bom_handling(input);
    Ok(text)
}

/// Bytes that may appear literally in quoted-printable output.
const fn is_qp_literal(byte: u8) -> bool {
    matches!(byte, b'\t' | b'\n' | b'\r' | b' '..=b'<' | b'>'..=b'~')
}

fn escape_quoted_printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for (index, &byte) in bytes.iter().enumerate() {
        let at_line_end = matches!(bytes.get(index + 1), None | Some(b'\r' | b'\n'));
        let trailing_space = matches!(byte, b' ' | b'\t') && at_line_end;
        if is_qp_literal(byte) && !trailing_space {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "={byte:02X}");
        }
    }
    out
}

/// Quoted-printable escapes `input` after transcoding it from `charset`.
///
/// Every byte outside the printable ASCII range (and `=`) becomes `=XX`.
/// Whitespace that ends a line is escaped so relays that strip trailing
/// blanks cannot change the content. No soft line breaks are inserted.
///
/// # Errors
///
/// Returns [`Error::UnknownCharset`] if `charset` is not a known label.
pub fn mime_encode(input: impl AsRef<[u8]>, charset: &str) -> Result<String> {
    let bytes = utf8_bytes(input.as_ref(), charset)?;
    Ok(escape_quoted_printable(&bytes))
}

/// Encodes a text body as quoted-printable with CRLF line endings and
/// soft line breaks keeping every line within 76 characters.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let normalized = text.replace("\r\n", "\n");
    let mut lines = normalized.split('\n').peekable();
    while let Some(line) = lines.next() {
        let escaped = escape_quoted_printable(line.as_bytes());
        soft_wrap(&escaped, &mut out);
        if lines.peek().is_some() {
            out.push_str("\r\n");
        }
    }
    out
}

fn soft_wrap(line: &str, out: &mut String) {
    let bytes = line.as_bytes();
    let mut start = 0;
    while bytes.len() - start > MAX_LINE_LENGTH {
        let mut end = start + MAX_LINE_LENGTH - 1;
        if bytes[end - 1] == b'=' {
            end -= 1;
        } else if bytes[end - 2] == b'=' {
            end -= 2;
        }
        out.push_str(&line[start..end]);
        out.push_str("=\r\n");
        start = end;
    }
    out.push_str(&line[start..]);
}

/// Returns true if a header value needs RFC 2047 encoding.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.chars()
        .any(|c| !c.is_ascii() || (c.is_ascii_control() && c != '\t'))
}

/// Encodes `input` (in `charset`) as one or more RFC 2047 encoded-words.
///
/// The payload is always transcoded to UTF-8 and labelled as such. Long
/// payloads are split into several space-separated words; a split never
/// lands inside an `=XX` escape, a Base64 group, or a UTF-8 sequence, so
/// every word decodes on its own.
///
/// # Errors
///
/// Returns [`Error::UnknownCharset`] if `charset` is not a known label.
pub fn mime_word_encode(
    input: impl AsRef<[u8]>,
    encoding: WordEncoding,
    charset: &str,
) -> Result<String> {
    let text = utf8_text(input.as_ref(), charset)?;
    Ok(encode_word_with(&text, encoding))
}

/// Encodes UTF-8 text as Q encoded-words.
#[must_use]
pub fn encode_word(text: &str) -> String {
    encode_word_with(text, WordEncoding::Q)
}

/// Encodes UTF-8 text as encoded-words using the given encoding.
#[must_use]
pub fn encode_word_with(text: &str, encoding: WordEncoding) -> String {
    let payloads: Vec<String> = match encoding {
        WordEncoding::Q => {
            let payload = q_escape(&escape_quoted_printable(text.as_bytes()));
            if payload.len() < MAX_Q_WORD_LENGTH {
                vec![payload]
            } else {
                split_q_payload(&payload, MAX_Q_WORD_LENGTH)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            }
        }
        WordEncoding::B => split_b_payload(text)
            .into_iter()
            .map(|part| encode_base64(part.as_bytes()))
            .collect(),
    };

    let label = encoding.as_str();
    payloads
        .iter()
        .map(|payload| format!("=?UTF-8?{label}?{payload}?="))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applies the encoded-word restrictions on top of quoted-printable output.
fn q_escape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    for byte in escaped.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' | b'=' => {
                out.push(char::from(byte));
            }
            b' ' => out.push('_'),
            _ => {
                let _ = write!(out, "={byte:02X}");
            }
        }
    }
    out
}

fn split_q_payload(payload: &str, max_len: usize) -> Vec<&str> {
    let max_len = max_len.max(MIN_Q_WORD_LENGTH);
    let mut words = Vec::new();
    let mut rest = payload;

    while !rest.is_empty() {
        let bytes = rest.as_bytes();
        let limit = rest.len().min(max_len);
        let mut end = limit;

        if end < rest.len() {
            // Never cut through an escape sequence.
            if bytes[end - 1] == b'=' {
                end -= 1;
            } else if end >= 2 && bytes[end - 2] == b'=' {
                end -= 2;
            }

            // Never start the next word on a UTF-8 continuation byte.
            while end >= 3 && starts_with_continuation_escape(&bytes[end..]) {
                end -= 3;
            }

            if end == 0 {
                end = limit;
            }
        }

        words.push(&rest[..end]);
        rest = &rest[end..];
    }

    words
}

fn starts_with_continuation_escape(bytes: &[u8]) -> bool {
    if bytes.len() < 3 || bytes[0] != b'=' {
        return false;
    }
    std::str::from_utf8(&bytes[1..3])
        .ok()
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .is_some_and(|octet| (0x80..0xC2).contains(&octet))
}

fn split_b_payload(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        if index > start && index + ch.len_utf8() - start > MAX_B_WORD_BYTES {
            words.push(&text[start..index]);
            start = index;
        }
    }
    if start < text.len() {
        words.push(&text[start..]);
    }
    words
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    String::from_utf8(decode_quoted_printable_bytes(text)?).map_err(Into::into)
}

fn decode_quoted_printable_bytes(text: &str) -> Result<Vec<u8>> {
    let mut result = Vec::new();
    let mut bytes = text.bytes().peekable();

    while let Some(byte) = bytes.next() {
        if byte != b'=' {
            result.push(byte);
            continue;
        }

        // Soft line break
        if bytes.peek() == Some(&b'\r') {
            bytes.next();
            if bytes.peek() == Some(&b'\n') {
                bytes.next();
            }
            continue;
        }
        if bytes.peek() == Some(&b'\n') {
            bytes.next();
            continue;
        }

        let hex: Vec<u8> = bytes.by_ref().take(2).collect();
        let decoded = std::str::from_utf8(&hex)
            .ok()
            .filter(|hex| hex.len() == 2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        result.push(decoded);
    }

    Ok(result)
}

/// Decodes a header value made of RFC 2047 encoded-words.
///
/// Adjacent encoded-words separated only by whitespace are joined, as the
/// RFC requires. Text without encoded-words is returned unchanged.
///
/// # Errors
///
/// Returns an error if an encoded-word is malformed.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || !words.iter().all(|w| w.starts_with("=?") && w.ends_with("?=")) {
        return Ok(text.to_string());
    }

    let mut decoded = Vec::new();
    for word in words {
        let inner = &word[2..word.len() - 2];
        let parts: Vec<&str> = inner.split('?').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidEncoding(
                "Invalid RFC 2047 format".to_string(),
            ));
        }

        let encoding = parts[1].to_uppercase();
        let encoded_text = parts[2];

        match encoding.as_str() {
            "B" => decoded.extend(decode_base64(encoded_text)?),
            "Q" => decoded.extend(decode_quoted_printable_bytes(&encoded_text.replace('_', " "))?),
            _ => {
                return Err(Error::InvalidEncoding(format!(
                    "Unknown encoding: {encoding}"
                )));
            }
        }
    }

    String::from_utf8(decoded).map_err(Into::into)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_lines_independent_of_chunking() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut whole = Base64LineEncoder::new();
        let mut expected = whole.feed(&data);
        expected.push_str(&whole.finish());

        let mut chunked = Base64LineEncoder::new();
        let mut actual = String::new();
        for chunk in data.chunks(7) {
            actual.push_str(&chunked.feed(chunk));
        }
        actual.push_str(&chunked.finish());

        assert_eq!(actual, expected);
        for line in actual.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= 76);
        }
        let joined: String = actual.split("\r\n").collect();
        assert_eq!(decode_base64(&joined).unwrap(), data);
    }

    #[test]
    fn test_mime_encode_utf8() {
        assert_eq!(
            mime_encode("tere ÕÄÖÕ", "utf-8").unwrap(),
            "tere =C3=95=C3=84=C3=96=C3=95"
        );
    }

    #[test]
    fn test_mime_encode_trailing_whitespace() {
        assert_eq!(mime_encode("tere  ", "utf-8").unwrap(), "tere =20");
        assert_eq!(mime_encode("a \r\nb\t", "utf-8").unwrap(), "a=20\r\nb=09");
    }

    #[test]
    fn test_mime_encode_transcodes_charset() {
        assert_eq!(mime_encode([0xbd, 0xc5], "utf-16be").unwrap(), "=EB=B7=85");
    }

    #[test]
    fn test_mime_encode_escapes_equals() {
        assert_eq!(mime_encode("a=b", "utf-8").unwrap(), "a=3Db");
    }

    #[test]
    fn test_mime_encode_unknown_charset() {
        assert!(matches!(
            mime_encode("x", "no-such-charset"),
            Err(Error::UnknownCharset(_))
        ));
    }

    #[test]
    fn test_word_encode_default_q() {
        assert_eq!(
            encode_word("See on õhin test"),
            "=?UTF-8?Q?See_on_=C3=B5hin_test?="
        );
    }

    #[test]
    fn test_word_encode_q_from_utf16() {
        let input = [0x4a, 0xf5, 0x67, 0x65, 0x2d, 0x76, 0x61, 0xde];
        assert_eq!(
            mime_word_encode(input, WordEncoding::Q, "utf-16be").unwrap(),
            "=?UTF-8?Q?=E4=AB=B5=E6=9D=A5=E2=B5=B6=E6=87=9E?="
        );
    }

    #[test]
    fn test_word_encode_b() {
        assert_eq!(
            encode_word_with("Привет и до свидания", WordEncoding::B),
            "=?UTF-8?B?0J/RgNC40LLQtdGCINC4INC00L4g0YHQstC40LTQsNC90LjRjw==?="
        );
    }

    #[test]
    fn test_word_encode_long_b() {
        let payload = "üöß‹€Привет и до свиданияПривет и до свиданияПривет и до свиданияПривет и до свиданияПривет и до свиданияПривет и до свиданияПривет и до свиданияПривет и до свидания";
        let expected = concat!(
            "=?UTF-8?B?w7zDtsOf4oC54oKs0J/RgNC40LLQtdGCINC4INC00L4g0YHQstC4?= ",
            "=?UTF-8?B?0LTQsNC90LjRj9Cf0YDQuNCy0LXRgiDQuCDQtNC+INGB0LLQuNC0?= ",
            "=?UTF-8?B?0LDQvdC40Y/Qn9GA0LjQstC10YIg0Lgg0LTQviDRgdCy0LjQtNCw?= ",
            "=?UTF-8?B?0L3QuNGP0J/RgNC40LLQtdGCINC4INC00L4g0YHQstC40LTQsNC9?= ",
            "=?UTF-8?B?0LjRj9Cf0YDQuNCy0LXRgiDQuCDQtNC+INGB0LLQuNC00LDQvdC4?= ",
            "=?UTF-8?B?0Y/Qn9GA0LjQstC10YIg0Lgg0LTQviDRgdCy0LjQtNCw0L3QuNGP?= ",
            "=?UTF-8?B?0J/RgNC40LLQtdGCINC4INC00L4g0YHQstC40LTQsNC90LjRj9Cf?= ",
            "=?UTF-8?B?0YDQuNCy0LXRgiDQuCDQtNC+INGB0LLQuNC00LDQvdC40Y8=?="
        );
        let encoded = encode_word_with(payload, WordEncoding::B);
        assert_eq!(encoded, expected);

        let mut rebuilt = String::new();
        for word in encoded.split(' ') {
            assert!(word.len() <= 76);
            rebuilt.push_str(&decode_rfc2047(word).unwrap());
        }
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn test_word_encode_long_q_words_decode_independently() {
        let payload = "Ünïcödé sübjéct līne that is definitely longer than one encoded word ✓✓✓";
        let encoded = encode_word(payload);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);

        let mut rebuilt = String::new();
        for word in &words {
            assert!(word.starts_with("=?UTF-8?Q?") && word.ends_with("?="));
            assert!(word.len() <= 76);
            rebuilt.push_str(&decode_rfc2047(word).unwrap());
        }
        assert_eq!(rebuilt, payload);
        assert_eq!(decode_rfc2047(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_encode_quoted_printable_body() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
        assert_eq!(encode_quoted_printable("Héllo\nline "), "H=C3=A9llo\r\nline=20");

        let long = "é".repeat(60);
        let encoded = encode_quoted_printable(&long);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= 76);
        }
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), long);
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable("H=C3=A9llo").unwrap(), "Héllo");
        assert_eq!(decode_quoted_printable("Hello=\r\nWorld").unwrap(), "HelloWorld");
        assert!(decode_quoted_printable("bad=4").is_err());
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_needs_encoding() {
        assert!(!needs_encoding("plain subject"));
        assert!(needs_encoding("this ✓ is"));
    }
}
