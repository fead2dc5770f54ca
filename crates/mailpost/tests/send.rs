//! Integration tests for the mail client.
//!
//! Each test runs a scripted relay on a loopback socket and drives the
//! public `Client` API against it.

#![allow(clippy::unwrap_used, clippy::similar_names)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Greylist, Relay, Script, closed_port};
use mailpost::{Attachment, Client, ClientConfig, DEFAULT_TIMEOUT, Error, Message, Security};
use mailpost_mime::encoding::decode_base64;

fn client(port: u16) -> Client {
    Client::new(
        ClientConfig::new("127.0.0.1")
            .port(port)
            .security(Security::None)
            .timeout(Duration::from_secs(2)),
    )
    .unwrap()
}

fn message() -> Message {
    Message::builder()
        .from("piglet@gmail.com")
        .to("pooh@gmail.com")
        .subject("this is a test TEXT message from mailpost")
        .text("It is hard to be brave when you're only a Very Small Animal.")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_send_plain_message() {
    let relay = Relay::start(Script::default()).await;
    let reply = client(relay.port).send(message()).await.unwrap();
    assert!(reply.is_success());

    let session = relay.finish().await;
    assert_eq!(session.count("MAIL FROM:<piglet@gmail.com>"), 1);
    assert_eq!(session.count("RCPT TO:<pooh@gmail.com>"), 1);
    assert_eq!(session.commands.last().unwrap(), "QUIT");

    let data = session.data.unwrap();
    assert!(data.contains("Subject: this is a test TEXT message from mailpost"));
    assert!(data.ends_with("It is hard to be brave when you're only a Very Small Animal."));
}

#[tokio::test]
async fn test_send_authenticates_when_user_set() {
    let relay = Relay::start(Script {
        auth_plain: Some("AUTH PLAIN AHBvb2gAaG9uZXk="),
        ..Script::default()
    })
    .await;
    let client = Client::new(
        ClientConfig::new("127.0.0.1")
            .port(relay.port)
            .security(Security::None)
            .user("pooh")
            .password("honey"),
    )
    .unwrap();

    client.send(message()).await.unwrap();
    let session = relay.finish().await;
    assert_eq!(session.count("AUTH PLAIN"), 1);
    assert!(session.data.is_some());
}

#[tokio::test]
async fn test_rejected_credentials_abort_with_quit() {
    let relay = Relay::start(Script {
        auth_plain: Some("AUTH PLAIN AHBvb2gAaG9uZXk="),
        ..Script::default()
    })
    .await;
    let client = Client::new(
        ClientConfig::new("127.0.0.1")
            .port(relay.port)
            .security(Security::None)
            .user("pooh")
            .password("vinegar"),
    )
    .unwrap();

    let err = client.send(message()).await.unwrap_err();
    assert!(matches!(err, Error::Smtp(mailpost_smtp::Error::Auth(_))));

    let session = relay.finish().await;
    assert_eq!(session.count("MAIL"), 0);
    assert_eq!(session.commands.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_unreachable_host_reports_one_error() {
    let port = closed_port().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let outcome = Arc::new(Mutex::new(None));

    let handle = client(port).send_with(message(), {
        let calls = Arc::clone(&calls);
        let outcome = Arc::clone(&outcome);
        move |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            *outcome.lock().unwrap() = Some(result);
        }
    });
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let result = outcome.lock().unwrap().take().unwrap();
    assert!(matches!(
        result,
        Err(Error::Smtp(mailpost_smtp::Error::Connection { .. }))
    ));
}

#[tokio::test]
async fn test_greylisted_once_succeeds() {
    let relay = Relay::start(Script {
        greylist: Greylist::Once,
        ..Script::default()
    })
    .await;
    client(relay.port).send(message()).await.unwrap();

    let session = relay.finish().await;
    assert_eq!(session.count("RCPT TO:<pooh@gmail.com>"), 2);
    assert!(session.data.is_some());
}

#[tokio::test]
async fn test_greylisted_always_fails_once() {
    let relay = Relay::start(Script {
        greylist: Greylist::Always,
        ..Script::default()
    })
    .await;
    let err = client(relay.port).send(message()).await.unwrap_err();
    assert!(err.is_transient());

    let session = relay.finish().await;
    assert_eq!(session.count("RCPT"), 2);
    assert_eq!(session.count("DATA"), 0);
    assert_eq!(session.commands.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_recipients_deduplicated_on_the_wire() {
    let relay = Relay::start(Script::default()).await;
    let message = Message::builder()
        .from("zelda@gmail.com")
        .to("gannon@gmail.com")
        .cc("gannon@gmail.com")
        .bcc("gannon@gmail.com")
        .text("hello")
        .build()
        .unwrap();
    client(relay.port).send(message).await.unwrap();

    let session = relay.finish().await;
    assert_eq!(session.count("RCPT"), 1);
    let data = session.data.unwrap();
    assert!(!data.contains("Bcc:"));
}

#[tokio::test]
async fn test_invalid_message_never_connects() {
    let relay = Relay::start(Script::default()).await;
    let port = relay.port;
    let message = Message::builder()
        .from("piglet@gmail.com")
        .text("nobody to send to")
        .build()
        .unwrap();

    let err = client(port).send(message).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // The relay is still waiting for its only connection.
    let waited = tokio::time::timeout(Duration::from_millis(100), relay.finish()).await;
    assert!(waited.is_err());
}

#[test]
fn test_password_without_user_rejected() {
    let err = Client::new(ClientConfig::new("127.0.0.1").password("password")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_default_timeout() {
    let client = Client::new(ClientConfig::new("127.0.0.1").port(1234)).unwrap();
    assert_eq!(client.config().connection.timeout, DEFAULT_TIMEOUT);

    let client = Client::new(ClientConfig::new("127.0.0.1").timeout(Duration::ZERO)).unwrap();
    assert_eq!(client.config().connection.timeout, DEFAULT_TIMEOUT);
}

#[tokio::test]
async fn test_attachment_survives_the_trip() {
    let relay = Relay::start(Script::default()).await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
    let message = Message::builder()
        .from("piglet@gmail.com")
        .to("pooh@gmail.com")
        .subject("attachment")
        .text(".leading dot stays intact")
        .attach(Attachment::from_data(payload.clone()).name("data.bin"))
        .build()
        .unwrap();
    client(relay.port).send(message).await.unwrap();

    let data = relay.finish().await.data.unwrap();
    assert!(data.contains("\r\n.leading dot stays intact"));

    let (_, part) = data.split_once("filename=data.bin").unwrap();
    let (_, encoded) = part.split_once("\r\n\r\n").unwrap();
    let (encoded, _) = encoded.split_once("\r\n--").unwrap();
    let joined: String = encoded.split_whitespace().collect();
    assert_eq!(decode_base64(&joined).unwrap(), payload);
}
