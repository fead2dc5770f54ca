//! MIME tree assembly and streaming serialization.
//!
//! A [`Message`] is first turned into a flat list of [`Step`]s: literal
//! text (header blocks, boundaries, encoded text bodies) interleaved with
//! attachment sources still to be read. Writing the steps in order yields
//! the complete message; attachment bytes are pulled only when their step
//! is reached.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::address;
use crate::attachment::{Attachment, AttachmentSource};
use crate::content_type::{ContentType, TransferEncoding, parameter};
use crate::date;
use crate::encoding::{BASE64_LINE_BYTES, Base64LineEncoder, encode_quoted_printable, encode_word, needs_encoding};
use crate::error::Result;
use crate::header::{HeaderValue, Headers, display_name};
use crate::message::Message;

/// Header lines are folded before this many characters.
const MAX_HEADER_LINE: usize = 78;

/// Bytes read from an attachment source per chunk.
const READ_CHUNK: usize = BASE64_LINE_BYTES * 144;

/// Fallback host for generated Message-IDs.
const DEFAULT_MESSAGE_ID_HOST: &str = "localhost";

/// One unit of output.
pub(crate) enum Step {
    /// Literal text written as-is.
    Raw(String),
    /// An attachment source, written as Base64 lines.
    Base64(AttachmentSource),
}

/// A rendered message not yet written: final top-level headers plus the
/// steps producing the full message text (header block included).
pub(crate) struct Plan {
    pub(crate) headers: Headers,
    pub(crate) steps: Vec<Step>,
}

enum Body {
    Text(String),
    Base64(AttachmentSource),
}

enum Node {
    Leaf {
        headers: Vec<(String, String)>,
        body: Body,
    },
    Multipart {
        content_type: ContentType,
        children: Vec<Node>,
    },
}

impl Node {
    fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::Leaf { headers, .. } => headers.clone(),
            Self::Multipart { content_type, .. } => {
                vec![("content-type".to_string(), content_type.to_string())]
            }
        }
    }
}

/// Creates a random MIME boundary.
fn make_boundary() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("----mailpost_{token}")
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE_ID_HOST.to_string())
}

/// Generates a `<token@host>` Message-ID.
pub(crate) fn make_message_id(host: Option<&str>) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let token: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let host = host.map_or_else(local_hostname, str::to_string);
    format!("<{millis}.{token}@{host}>")
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

fn text_leaf(content_type: ContentType, text: &str) -> Node {
    let encoding = TransferEncoding::for_text(text);
    let body = match encoding {
        TransferEncoding::SevenBit => normalize_newlines(text),
        _ => encode_quoted_printable(&normalize_newlines(text)),
    };
    Node::Leaf {
        headers: vec![
            ("content-type".to_string(), content_type.to_string()),
            ("content-transfer-encoding".to_string(), encoding.to_string()),
        ],
        body: Body::Text(body),
    }
}

fn encoded_name(name: &str) -> String {
    if needs_encoding(name) {
        encode_word(name)
    } else {
        name.to_string()
    }
}

fn attachment_leaf(attachment: Attachment) -> Node {
    let Attachment {
        source,
        content_type,
        name,
        inline,
        alternative,
        headers: extra,
        ..
    } = attachment;

    // Inline textual alternatives are written verbatim, not re-encoded.
    if alternative && content_type.is_text() {
        if let AttachmentSource::Data(data) = &source {
            if let Ok(text) = std::str::from_utf8(data) {
                let mut node = text_leaf(content_type, text);
                if let Node::Leaf { headers, .. } = &mut node {
                    headers.extend(extra);
                }
                return node;
            }
        }
    }

    let content_type = match &name {
        Some(name) => content_type.with_parameter("name", encoded_name(name)),
        None => content_type,
    };
    let mut headers = vec![
        ("content-type".to_string(), content_type.to_string()),
        (
            "content-transfer-encoding".to_string(),
            TransferEncoding::Base64.to_string(),
        ),
    ];
    if !alternative {
        let kind = if inline { "inline" } else { "attachment" };
        let disposition = match &name {
            Some(name) => format!("{kind}{}", parameter("filename", &encoded_name(name))),
            None => kind.to_string(),
        };
        headers.push(("content-disposition".to_string(), disposition));
    }
    headers.extend(extra);

    Node::Leaf {
        headers,
        body: Body::Base64(source),
    }
}

/// Builds the part tree: mixed(content, attachments...) where content is
/// the text, or alternative(text, html) with the html optionally wrapped in
/// related(html, inline parts...). Without a non-inline attachment there is
/// no mixed layer and top-level inline parts join the related group.
fn build_tree(text: Option<String>, attachments: Vec<Attachment>) -> Node {
    let text = text.unwrap_or_default();
    let (mut alternatives, attachments): (Vec<_>, Vec<_>) =
        attachments.into_iter().partition(Attachment::is_alternative);

    // Only one alternative rendition is supported; extras become attachments.
    let extra_alternatives = alternatives.split_off(alternatives.len().min(1));
    let attachments: Vec<Attachment> = extra_alternatives
        .into_iter()
        .map(|a| a.alternative(false))
        .chain(attachments)
        .collect();

    let (inline, attachments) = if attachments.iter().any(|a| !a.inline) {
        (Vec::new(), attachments)
    } else {
        (attachments, Vec::new())
    };

    let content = match alternatives.pop() {
        None => with_related(text_leaf(ContentType::text_plain(), &text), inline),
        Some(mut html) => {
            let mut related = std::mem::take(&mut html.related);
            related.extend(inline);
            Node::Multipart {
                content_type: ContentType::multipart("alternative", make_boundary()),
                children: vec![
                    text_leaf(ContentType::text_plain(), &text),
                    with_related(attachment_leaf(html), related),
                ],
            }
        }
    };

    if attachments.is_empty() {
        content
    } else {
        let mut children = vec![content];
        children.extend(attachments.into_iter().map(attachment_leaf));
        Node::Multipart {
            content_type: ContentType::multipart("mixed", make_boundary()),
            children,
        }
    }
}

/// Wraps `root` and `parts` in multipart/related; `root` alone if none.
fn with_related(root: Node, parts: Vec<Attachment>) -> Node {
    if parts.is_empty() {
        return root;
    }
    let mut children = vec![root];
    children.extend(parts.into_iter().map(attachment_leaf));
    Node::Multipart {
        content_type: ContentType::multipart("related", make_boundary()),
        children,
    }
}

/// Folds a header into lines of at most 78 characters where spaces allow.
pub(crate) fn fold_header(name: &str, value: &str) -> String {
    let mut out = format!("{}:", display_name(name));
    let mut line_len = out.len();
    let mut words_on_line = 0;
    for word in value.split(' ') {
        if words_on_line > 0 && line_len + 1 + word.len() > MAX_HEADER_LINE {
            out.push_str("\r\n");
            line_len = 0;
            words_on_line = 0;
        }
        out.push(' ');
        out.push_str(word);
        line_len += 1 + word.len();
        words_on_line += 1;
    }
    out.push_str("\r\n");
    out
}

fn render_headers<'a>(headers: impl IntoIterator<Item = (&'a str, String)>) -> String {
    headers
        .into_iter()
        .map(|(name, value)| fold_header(name, &value))
        .collect()
}

/// Re-encodes caller headers for the wire: non-ASCII display names and
/// unstructured values become encoded-words; `Bcc` is dropped.
fn wire_headers(headers: &Headers) -> Result<Headers> {
    let mut out = Headers::new();
    for (name, value) in headers.iter() {
        if name == "bcc" {
            continue;
        }
        let value = if Headers::is_multi_value(name) {
            map_values(value, |v| {
                if needs_encoding(v) {
                    address::parse(v)
                        .iter()
                        .map(address::Address::to_header_value)
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    v.to_string()
                }
            })
        } else {
            map_values(value, |v| if needs_encoding(v) { encode_word(v) } else { v.to_string() })
        };
        out.set(name, value)?;
    }
    Ok(out)
}

fn map_values(value: &HeaderValue, f: impl Fn(&str) -> String) -> HeaderValue {
    match value {
        HeaderValue::Single(v) => HeaderValue::Single(f(v)),
        HeaderValue::Multi(values) => HeaderValue::Multi(values.iter().map(|v| f(v)).collect()),
    }
}

enum Work {
    Node(Node),
    Raw(String),
}

fn push_raw(steps: &mut Vec<Step>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Step::Raw(last)) = steps.last_mut() {
        last.push_str(text);
    } else {
        steps.push(Step::Raw(text.to_string()));
    }
}

impl Plan {
    /// Assembles the headers and output steps for a message.
    pub(crate) fn new(message: Message) -> Result<Self> {
        let Message {
            headers: caller,
            text,
            attachments,
            utc,
            message_id_host,
        } = message;

        let mut headers = wire_headers(&caller)?;
        if !headers.has_value("date") {
            headers.set("date", date::now_rfc2822(utc))?;
        }
        if !headers.has_value("message-id") {
            headers.set("message-id", make_message_id(message_id_host.as_deref()))?;
        }
        headers.set("mime-version", "1.0")?;

        let root = build_tree(text, attachments);
        for (name, value) in root.headers() {
            headers.set(&name, value)?;
        }

        let mut steps = Vec::new();
        let mut block = render_headers(headers.iter().map(|(n, v)| (n, v.joined())));
        block.push_str("\r\n");
        push_raw(&mut steps, &block);

        // Depth-first without recursion: pop a node, queue its children
        // (each preceded by its boundary and part headers) and its closer.
        let mut stack = vec![Work::Node(root)];
        while let Some(work) = stack.pop() {
            match work {
                Work::Raw(text) => push_raw(&mut steps, &text),
                Work::Node(Node::Leaf { body, .. }) => match body {
                    Body::Text(text) => {
                        push_raw(&mut steps, &text);
                        if !text.is_empty() && !text.ends_with("\r\n") {
                            push_raw(&mut steps, "\r\n");
                        }
                    }
                    Body::Base64(source) => steps.push(Step::Base64(source)),
                },
                Work::Node(Node::Multipart {
                    content_type,
                    children,
                }) => {
                    let boundary = content_type.boundary().unwrap_or_default().to_string();
                    stack.push(Work::Raw(format!("--{boundary}--\r\n")));
                    for child in children.into_iter().rev() {
                        let part_headers = render_headers(
                            child.headers().iter().map(|(n, v)| (n.as_str(), v.clone())),
                        );
                        stack.push(Work::Node(child));
                        stack.push(Work::Raw(format!("--{boundary}\r\n{part_headers}\r\n")));
                    }
                }
            }
        }

        debug!(steps = steps.len(), "planned message body");
        Ok(Self { headers, steps })
    }
}

/// Writes the steps in order, pulling attachment sources as they come up.
/// The writer is shut down once everything has been written.
pub(crate) async fn write_steps<W>(steps: Vec<Step>, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for step in steps {
        match step {
            Step::Raw(text) => out.write_all(text.as_bytes()).await?,
            Step::Base64(source) => {
                let mut reader = source.open().await?;
                let mut encoder = Base64LineEncoder::new();
                let mut buf = vec![0u8; READ_CHUNK];
                let mut total = 0usize;
                loop {
                    let read = reader.read(&mut buf).await?;
                    if read == 0 {
                        break;
                    }
                    total += read;
                    out.write_all(encoder.feed(&buf[..read]).as_bytes()).await?;
                }
                out.write_all(encoder.finish().as_bytes()).await?;
                trace!(bytes = total, "attachment drained");
            }
        }
    }
    out.shutdown().await?;
    Ok(())
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
    use crate::encoding::{decode_base64, decode_quoted_printable};
    use crate::message::MessageBuilder;

    async fn render(message: Message) -> (Headers, String) {
        let plan = Plan::new(message).unwrap();
        let mut out = Vec::new();
        write_steps(plan.steps, &mut out).await.unwrap();
        (plan.headers, String::from_utf8(out).unwrap())
    }

    fn boundary_of(headers: &Headers) -> String {
        let ct = ContentType::parse(headers.get_first("content-type").unwrap()).unwrap();
        ct.boundary().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_simple_text_message() {
        let message = MessageBuilder::new()
            .from("zelda@gmail.com")
            .to("gannon@gmail.com")
            .bcc("hidden@gmail.com")
            .subject("hello")
            .text("line one\nline two")
            .message_id("fixed@id")
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get("bcc").is_none());
        assert!(!out.contains("hidden@gmail.com"));
        assert_eq!(headers.get_first("message-id"), Some("<fixed@id>"));
        assert_eq!(headers.get_first("mime-version"), Some("1.0"));
        assert!(date::is_rfc2822_date(headers.get_first("date").unwrap()));
        assert!(out.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(out.contains("Content-Transfer-Encoding: 7bit\r\n"));
        assert!(out.ends_with("\r\n\r\nline one\r\nline two\r\n"));
    }

    #[tokio::test]
    async fn test_unicode_subject_and_names_are_encoded() {
        let message = MessageBuilder::new()
            .from("zelda✓ <zelda@gmail.com>")
            .to("gannon@gmail.com")
            .subject("this ✓ is a test")
            .text("hello ✓ friend")
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert_eq!(
            headers.get_first("subject"),
            Some("=?UTF-8?Q?this_=E2=9C=93_is_a_test?=")
        );
        assert_eq!(
            headers.get_first("from"),
            Some("=?UTF-8?Q?zelda=E2=9C=93?= <zelda@gmail.com>")
        );
        assert!(out.is_ascii());
        assert!(out.contains("Content-Transfer-Encoding: quoted-printable"));
        let body = out.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(decode_quoted_printable(body.trim_end()).unwrap(), "hello ✓ friend");
    }

    #[tokio::test]
    async fn test_generated_date_in_utc() {
        let message = MessageBuilder::new().utc(true).message_id_host("example.org").build().unwrap();
        let (headers, _) = render(message).await;
        assert!(headers.get_first("date").unwrap().ends_with("+0000"));
        let id = headers.get_first("message-id").unwrap();
        assert!(id.starts_with('<') && id.ends_with("@example.org>"));
    }

    #[tokio::test]
    async fn test_attachment_uses_mixed_and_base64() {
        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let message = MessageBuilder::new()
            .text("see attached")
            .attach(Attachment::from_data(data.clone()).name("blob.bin"))
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get_first("content-type").unwrap().starts_with("multipart/mixed"));
        let boundary = boundary_of(&headers);
        assert!(out.ends_with(&format!("--{boundary}--\r\n")));
        assert!(out.contains("Content-Disposition: attachment; filename=blob.bin"));

        let part = out.split(&format!("--{boundary}")).nth(2).unwrap();
        let (_, encoded) = part.split_once("\r\n\r\n").unwrap();
        for line in encoded.lines() {
            assert!(line.len() <= 76);
        }
        let joined: String = encoded.split_whitespace().collect();
        assert_eq!(decode_base64(&joined).unwrap(), data);
    }

    #[tokio::test]
    async fn test_alternative_with_related() {
        let html = "<p>hi <img src=\"cid:logo\"></p>\n";
        let message = MessageBuilder::new()
            .text("plain")
            .attach(
                Attachment::html(html).related(
                    Attachment::from_data(vec![0x47, 0x49, 0x46])
                        .mime_type("image/gif")
                        .unwrap()
                        .name("logo.gif")
                        .content_id("logo")
                        .unwrap(),
                ),
            )
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get_first("content-type").unwrap().starts_with("multipart/alternative"));
        let unfolded = out.replace("\r\n ", " ");
        assert!(unfolded.contains("Content-Type: multipart/related; boundary="));
        assert!(out.contains("Content-Type: text/html; charset=utf-8\r\nContent-Transfer-Encoding: 7bit\r\n\r\n<p>hi <img src=\"cid:logo\"></p>\r\n"));
        assert!(out.contains("Content-Disposition: inline; filename=logo.gif\r\nContent-ID: <logo>\r\n"));
        assert!(out.contains("R0lG\r\n"));

        let plain_at = out.find("text/plain").unwrap();
        let html_at = out.find("text/html").unwrap();
        assert!(plain_at < html_at);
    }

    #[tokio::test]
    async fn test_inline_attachments_skip_mixed() {
        let message = MessageBuilder::new()
            .text("see the picture")
            .attach(Attachment::from_data(vec![1, 2, 3]).name("pic.png").inline(true))
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get_first("content-type").unwrap().starts_with("multipart/related"));
        assert!(!out.contains("multipart/mixed"));
        assert!(out.contains("Content-Disposition: inline; filename=pic.png"));
        let text_at = out.find("see the picture").unwrap();
        assert!(text_at < out.find("pic.png").unwrap());
    }

    #[tokio::test]
    async fn test_inline_attachment_joins_html_related() {
        let message = MessageBuilder::new()
            .text("plain")
            .attach(Attachment::html("<img src=\"cid:pic\">"))
            .attach(
                Attachment::from_data(vec![1])
                    .name("pic.png")
                    .inline(true)
                    .content_id("pic")
                    .unwrap(),
            )
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get_first("content-type").unwrap().starts_with("multipart/alternative"));
        assert!(out.replace("\r\n ", " ").contains("Content-Type: multipart/related; boundary="));
        assert!(!out.contains("multipart/mixed"));
    }

    #[tokio::test]
    async fn test_mixed_keeps_inline_parts_beside_attachments() {
        let message = MessageBuilder::new()
            .text("two parts")
            .attach(Attachment::from_data(vec![1]).name("pic.png").inline(true))
            .attach(Attachment::from_data(vec![2]).name("doc.bin"))
            .build()
            .unwrap();
        let (headers, out) = render(message).await;

        assert!(headers.get_first("content-type").unwrap().starts_with("multipart/mixed"));
        assert!(out.contains("Content-Disposition: inline; filename=pic.png"));
        assert!(out.contains("Content-Disposition: attachment; filename=doc.bin"));
        assert!(!out.contains("multipart/related"));
    }

    #[tokio::test]
    async fn test_unicode_filename_is_encoded() {
        let message = MessageBuilder::new()
            .attach(Attachment::from_data(vec![1]).name("smtp-✓-info.pdf"))
            .build()
            .unwrap();
        let (_, out) = render(message).await;
        assert!(out.contains("filename=\"=?UTF-8?Q?smtp-=E2=9C=93-info=2Epdf?=\""));
    }

    #[tokio::test]
    async fn test_streamed_source_drains_in_order() {
        let reader = tokio_test::io::Builder::new()
            .read(b"first ")
            .read(b"second ")
            .read(b"third")
            .build();
        let message = MessageBuilder::new()
            .attach(Attachment::from_reader(reader).name("s.txt"))
            .build()
            .unwrap();
        let (headers, out) = render(message).await;
        let boundary = boundary_of(&headers);
        let part = out.split(&format!("--{boundary}")).nth(2).unwrap();
        let (_, encoded) = part.split_once("\r\n\r\n").unwrap();
        let joined: String = encoded.split_whitespace().collect();
        assert_eq!(decode_base64(&joined).unwrap(), b"first second third");
    }

    #[test]
    fn test_fold_header() {
        let value = ["word"; 30].join(" ");
        let folded = fold_header("subject", &value);
        for line in folded.split("\r\n") {
            assert!(line.len() <= MAX_HEADER_LINE);
        }
        assert_eq!(folded.replace("\r\n ", " ").trim_end(), format!("Subject: {value}"));
        assert_eq!(fold_header("to", "a@b.c"), "To: a@b.c\r\n");
    }
}
