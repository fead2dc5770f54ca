//! Scripted SMTP relay on a loopback socket.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Routes client logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailpost=debug,mailpost_smtp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// How the relay answers `RCPT TO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greylist {
    /// Accept every recipient at once.
    Never,
    /// Answer `450` to the first attempt of each recipient.
    Once,
    /// Answer `450` to every attempt.
    Always,
}

/// Relay behavior for one session.
#[derive(Debug, Clone)]
pub struct Script {
    /// Answers to `RCPT TO`.
    pub greylist: Greylist,
    /// Exact `AUTH PLAIN` line the relay accepts; `None` hides AUTH.
    pub auth_plain: Option<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greylist: Greylist::Never,
            auth_plain: None,
        }
    }
}

/// What the relay saw during one session.
#[derive(Debug, Default)]
pub struct Session {
    /// Command lines in arrival order, excluding the message body.
    pub commands: Vec<String>,
    /// Message body with dot-stuffing removed, lines joined by CRLF.
    pub data: Option<String>,
}

impl Session {
    /// Counts commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

/// A relay accepting exactly one connection.
pub struct Relay {
    pub port: u16,
    handle: JoinHandle<Session>,
}

impl Relay {
    /// Binds a loopback port and serves one session following `script`.
    pub async fn start(script: Script) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            serve(socket, script).await
        });
        Self { port, handle }
    }

    /// Waits for the session to end and returns its transcript.
    pub async fn finish(self) -> Session {
        self.handle.await.unwrap()
    }
}

/// Returns a loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(socket: tokio::net::TcpStream, script: Script) -> Session {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut session = Session::default();
    let mut attempts: HashMap<String, usize> = HashMap::new();

    write.write_all(b"220 relay.test ESMTP ready\r\n").await.unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        session.commands.push(line.clone());
        let verb = line
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let reply: String = match verb.as_str() {
            "EHLO" => {
                let mut reply = String::from("250-relay.test greets you\r\n250-8BITMIME\r\n");
                if script.auth_plain.is_some() {
                    reply.push_str("250-AUTH PLAIN LOGIN\r\n");
                }
                reply.push_str("250 SIZE 10485760\r\n");
                reply
            }
            "AUTH" => match script.auth_plain {
                Some(expected) if line == expected => "235 2.7.0 accepted\r\n".into(),
                _ => "535 5.7.8 invalid user / pass\r\n".into(),
            },
            "MAIL" => "250 2.1.0 sender ok\r\n".into(),
            "RCPT" => {
                let seen = attempts.entry(line.clone()).or_default();
                *seen += 1;
                let greylisted = match script.greylist {
                    Greylist::Never => false,
                    Greylist::Once => *seen == 1,
                    Greylist::Always => true,
                };
                if greylisted {
                    "450 4.7.1 greylisted, try again\r\n".into()
                } else {
                    "250 2.1.5 recipient ok\r\n".into()
                }
            }
            "DATA" => {
                write.write_all(b"354 end data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                let mut body = Vec::new();
                while let Ok(Some(data_line)) = lines.next_line().await {
                    if data_line == "." {
                        break;
                    }
                    let unstuffed = data_line.strip_prefix('.').unwrap_or(&data_line);
                    body.push(unstuffed.to_string());
                }
                session.data = Some(body.join("\r\n"));
                "250 2.0.0 queued as 4F2A\r\n".into()
            }
            "QUIT" => {
                let _ = write.write_all(b"221 2.0.0 bye\r\n").await;
                break;
            }
            _ => "502 5.5.2 command not recognized\r\n".into(),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
    session
}
