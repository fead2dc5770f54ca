//! # mailpost-smtp
//!
//! SMTP client protocol engine (RFC 5321).
//!
//! ## Features
//!
//! - **Reply reader**: accumulates transport bytes into complete replies and
//!   reports timeouts and hangups as terminal events
//! - **Connection state machine**: greeting, EHLO with HELO fallback,
//!   STARTTLS, AUTH, MAIL/RCPT/DATA/QUIT with one command outstanding
//! - **TLS**: implicit TLS (port 465) and STARTTLS through one [`Transport`]
//!   abstraction
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5, XOAUTH2
//! - **Greylisting**: a `4xx` to `RCPT TO` is retried once
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpost_smtp::{Address, Connection, ConnectionOptions, Credentials, Security};
//!
//! #[tokio::main]
//! async fn main() -> mailpost_smtp::Result<()> {
//!     let options = ConnectionOptions::builder("smtp.example.com")
//!         .security(Security::StartTls)
//!         .build();
//!     let mut conn = Connection::open(options).await?;
//!     conn.authenticate(&Credentials::new("user@example.com", "password")).await?;
//!
//!     conn.mail_from(&Address::new("sender@example.com")?).await?;
//!     conn.rcpt_to(&Address::new("recipient@example.com")?).await?;
//!     conn.data(&b"Subject: Test\r\n\r\nHello, World!\r\n"[..]).await?;
//!
//!     conn.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connecting ── 220 ──→ Greeted ── STARTTLS ──→ TlsNegotiating ──→ Greeted
//!                          │
//!                          ├── AUTH ──→ Authenticating ──→ Ready
//!                          │
//!                          └── MAIL / RCPT / DATA ──→ QUIT ──→ Closing ──→ Closed
//!
//! timeout or transport failure, from anywhere ──→ Errored
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: SASL response framing
//! - [`command`]: SMTP command builders
//! - [`connection`]: Transports, options and the connection state machine
//! - [`parser`]: Reply parser and accumulation buffer
//! - [`reader`]: Reply reader bound to a transport
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod reader;
pub mod types;

pub use auth::Credentials;
pub use connection::{
    Connection, ConnectionOptions, ConnectionState, DEFAULT_TIMEOUT, Security, ServerInfo,
    SmtpStream, Transport,
};
pub use error::{Error, Result};
pub use reader::{ReplyEvent, ResponseReader};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
