//! # mailpost-mime
//!
//! Message model and MIME generation for outgoing email.
//!
//! ## Features
//!
//! - **Address lists**: RFC 2822 address-list parsing, including groups
//! - **Header encoding**: RFC 2047 encoded-words (Q and B) and
//!   quoted-printable escaping with charset transcoding
//! - **Message building**: headers, text, HTML alternative, related inline
//!   parts and attachments
//! - **Streaming output**: the rendered message is produced lazily, pulling
//!   attachment files and readers only as the consumer reads
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpost_mime::{Attachment, Message};
//!
//! let message = Message::builder()
//!     .from("Piglet <piglet@example.com>")
//!     .to(["pooh@example.com", "Owl <owl@example.com>"])
//!     .subject("Honey ✓")
//!     .text("Plain text version")
//!     .attach(Attachment::html("<p>HTML version</p>"))
//!     .attach(Attachment::from_path("map.pdf"))
//!     .build()?;
//!
//! assert!(message.check_validity().is_valid);
//! let rendered = message.render()?;
//! // rendered.stream implements AsyncRead
//! ```
//!
//! ### Address parsing
//!
//! ```
//! use mailpost_mime::{Address, address};
//!
//! let parsed = address::parse("Disclosed:andris@tr.ee, andris@example.com;");
//! assert!(matches!(&parsed[0], Address::Group { members, .. } if members.len() == 2));
//! ```
//!
//! ### Encoded-words
//!
//! ```
//! use mailpost_mime::encoding::encode_word;
//!
//! assert_eq!(encode_word("See on õhin test"), "=?UTF-8?Q?See_on_=C3=B5hin_test?=");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod attachment;
mod content_type;
mod error;
mod header;
mod message;
mod render;
mod stream;

pub mod address;
pub mod date;
pub mod encoding;

pub use address::Address;
pub use attachment::{Attachment, AttachmentSource};
pub use content_type::{ContentType, TransferEncoding};
pub use error::{Error, Result};
pub use header::{HeaderValue, Headers, display_name};
pub use message::{Message, MessageBuilder, ValidityResult};
pub use stream::{MessageStream, RenderedMessage, build};
