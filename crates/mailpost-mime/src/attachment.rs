//! Message attachments and their byte sources.

use std::fmt;
use std::io;
use std::path::PathBuf;

use tokio::io::AsyncRead;

use crate::content_type::ContentType;
use crate::error::Result;
use crate::header::Headers;

/// Where an attachment's bytes come from.
///
/// All three variants are encoded identically; only the moment the bytes
/// are read differs.
pub enum AttachmentSource {
    /// Bytes held in memory.
    Data(Vec<u8>),
    /// A file read lazily while the message body streams.
    Path(PathBuf),
    /// A pull-based byte stream, drained in order while the body streams.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl AttachmentSource {
    /// Opens the source for sequential reading.
    pub(crate) async fn open(self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        Ok(match self {
            Self::Data(data) => Box::new(io::Cursor::new(data)),
            Self::Path(path) => Box::new(tokio::fs::File::open(path).await?),
            Self::Reader(reader) => reader,
        })
    }
}

/// A file or inline part attached to a message.
///
/// An attachment marked [`alternative`](Self::alternative) is the HTML
/// rendition of the message text; any [`related`](Self::related) parts
/// (images referenced by `cid:`) are bundled with it in a
/// `multipart/related` container.
#[derive(Debug)]
pub struct Attachment {
    pub(crate) source: AttachmentSource,
    pub(crate) content_type: ContentType,
    pub(crate) name: Option<String>,
    pub(crate) inline: bool,
    pub(crate) alternative: bool,
    pub(crate) related: Vec<Attachment>,
    pub(crate) headers: Vec<(String, String)>,
}

impl Attachment {
    fn new(source: AttachmentSource) -> Self {
        Self {
            source,
            content_type: ContentType::octet_stream(),
            name: None,
            inline: false,
            alternative: false,
            related: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Creates an attachment from in-memory bytes.
    #[must_use]
    pub fn from_data(data: impl Into<Vec<u8>>) -> Self {
        Self::new(AttachmentSource::Data(data.into()))
    }

    /// Creates an attachment read from a file; the file name becomes the
    /// attachment name.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let mut attachment = Self::new(AttachmentSource::Path(path));
        attachment.name = name;
        attachment
    }

    /// Creates an attachment drained from an async reader.
    #[must_use]
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::new(AttachmentSource::Reader(Box::new(reader)))
    }

    /// Creates the HTML alternative of the message text.
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self::from_data(html.into().into_bytes())
            .with_content_type(ContentType::text_html())
            .alternative(true)
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Sets the content type from a `type/subtype` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid content type.
    pub fn mime_type(self, content_type: &str) -> Result<Self> {
        Ok(self.with_content_type(ContentType::parse(content_type)?))
    }

    /// Sets the file name presented to the recipient.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the part for inline display.
    #[must_use]
    pub const fn inline(mut self, inline: bool) -> Self {
        self.inline = inline;
        self
    }

    /// Marks the part as the alternative (HTML) rendition of the text.
    #[must_use]
    pub const fn alternative(mut self, alternative: bool) -> Self {
        self.alternative = alternative;
        self
    }

    /// Adds a related part, displayed inline by default.
    #[must_use]
    pub fn related(mut self, related: Self) -> Self {
        let mut related = related;
        related.inline = true;
        self.related.push(related);
        self
    }

    /// Sets the `Content-ID`, adding angle brackets if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` contains a line break.
    pub fn content_id(self, id: &str) -> Result<Self> {
        let id = if id.starts_with('<') {
            id.to_string()
        } else {
            format!("<{id}>")
        };
        self.header("content-id", &id)
    }

    /// Adds an extra part header.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid header name or a value with line
    /// breaks.
    pub fn header(self, name: &str, value: &str) -> Result<Self> {
        // Validate through the typed map, then keep the raw pair.
        let mut check = Headers::new();
        check.set(name, value)?;
        Ok(self.push_header(name, value.to_string()))
    }

    fn push_header(mut self, name: &str, value: String) -> Self {
        let name = name.to_lowercase();
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value));
        self
    }

    /// Returns true if this is the alternative rendition.
    #[must_use]
    pub const fn is_alternative(&self) -> bool {
        self.alternative
    }

    /// Returns the related parts.
    #[must_use]
    pub fn related_parts(&self) -> &[Self] {
        &self.related
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
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_from_path_uses_file_name() {
        let attachment = Attachment::from_path("/tmp/report.pdf");
        assert_eq!(attachment.name.as_deref(), Some("report.pdf"));
        assert!(!attachment.inline);
    }

    #[test]
    fn test_html_is_alternative() {
        let attachment = Attachment::html("<b>hi</b>");
        assert!(attachment.is_alternative());
        assert_eq!(attachment.content_type.sub_type, "html");
    }

    #[test]
    fn test_related_parts_are_inline() {
        let attachment = Attachment::html("<img src=\"cid:logo\">")
            .related(Attachment::from_data(vec![1, 2, 3]).content_id("logo").unwrap());
        let related = &attachment.related_parts()[0];
        assert!(related.inline);
        assert_eq!(
            related.headers,
            vec![("content-id".to_string(), "<logo>".to_string())]
        );
    }

    #[test]
    fn test_header_rejects_line_breaks() {
        assert!(Attachment::from_data(vec![]).header("X-Note", "a\r\nb").is_err());
        let attachment = Attachment::from_data(vec![]).header("X-Note", "ok").unwrap();
        assert_eq!(attachment.headers.len(), 1);
    }

    #[test]
    fn test_content_id_rejects_line_breaks() {
        let injected = "x>\r\nBcc: victim@evil.test\r\nX: <y";
        assert!(Attachment::from_data(vec![1]).content_id(injected).is_err());
        assert!(Attachment::from_data(vec![1]).content_id("a\nb").is_err());

        let attachment = Attachment::from_data(vec![1]).content_id("<logo@host>").unwrap();
        assert_eq!(
            attachment.headers,
            vec![("content-id".to_string(), "<logo@host>".to_string())]
        );
    }

    #[test]
    fn test_mime_type() {
        let attachment = Attachment::from_data(vec![]).mime_type("image/gif").unwrap();
        assert_eq!(attachment.content_type.to_string(), "image/gif");
        assert!(Attachment::from_data(vec![]).mime_type("nonsense").is_err());
    }

    #[tokio::test]
    async fn test_sources_open_to_same_bytes() {
        let bytes = b"attachment bytes".to_vec();

        let mut out = Vec::new();
        AttachmentSource::Data(bytes.clone())
            .open()
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, bytes);

        let reader = tokio_test::io::Builder::new()
            .read(b"attachment ")
            .read(b"bytes")
            .build();
        let mut out = Vec::new();
        AttachmentSource::Reader(Box::new(reader))
            .open()
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, bytes);
    }

    #[tokio::test]
    async fn test_missing_path_fails_on_open() {
        let result = AttachmentSource::Path("/definitely/not/here.bin".into())
            .open()
            .await;
        assert!(result.is_err());
    }
}
