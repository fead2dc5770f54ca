//! # mailpost
//!
//! Sends email messages to an SMTP relay.
//!
//! A [`Client`] validates a [`Message`], resolves its envelope, renders it
//! to MIME and delivers it over a fresh connection per send. Protocol work
//! lives in [`mailpost_smtp`], message construction in [`mailpost_mime`].
//!
//! ## Example
//!
//! ```ignore
//! use mailpost::{Client, ClientConfig, Message, Security};
//!
//! #[tokio::main]
//! async fn main() -> mailpost::Result<()> {
//!     let client = Client::new(
//!         ClientConfig::new("smtp.example.com")
//!             .security(Security::StartTls)
//!             .user("pooh")
//!             .password("honey"),
//!     )?;
//!
//!     let message = Message::builder()
//!         .from("Pooh <pooh@example.com>")
//!         .to("piglet@example.com")
//!         .subject("hunny")
//!         .text("It is more fun to talk with someone who doesn't use long, difficult words.")
//!         .build()?;
//!
//!     let reply = client.send(message).await?;
//!     println!("queued: {reply}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod config;
mod envelope;
mod error;

pub use client::Client;
pub use config::ClientConfig;
pub use envelope::Envelope;
pub use error::{Error, Result};

pub use mailpost_mime::{Attachment, Message, MessageBuilder};
pub use mailpost_smtp::{AuthMechanism, ConnectionOptions, DEFAULT_TIMEOUT, Reply, Security};
