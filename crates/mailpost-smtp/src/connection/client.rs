//! SMTP connection state machine.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::{ConnectionOptions, Security};
use super::data::DotStuffer;
use super::state::{ConnectionState, Verb};
use super::stream::{SmtpStream, Transport, connect_plain, connect_tls};
use super::ServerInfo;
use crate::auth::{
    Credentials, cram_md5_response, login_response, plain_response, select_mechanism,
    xoauth2_response,
};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::reader::ResponseReader;
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// Attempts per recipient; a `4xx` to the first attempt is retried once.
pub const MAX_RCPT_ATTEMPTS: usize = 2;

/// Bytes read from the message body per write.
const BODY_CHUNK: usize = 16 * 1024;

/// One SMTP session over an exclusively owned transport.
///
/// Every operation sends one command (or one AUTH step) and consumes
/// exactly one reply before returning; `&mut self` keeps a second call
/// from starting until the first finishes. A timeout or transport failure
/// moves the connection to [`ConnectionState::Errored`], after which every
/// operation fails with [`Error::InvalidState`] without touching the
/// transport.
#[derive(Debug)]
pub struct Connection<T> {
    transport: Option<T>,
    reader: ResponseReader,
    state: ConnectionState,
    resting: ConnectionState,
    server_info: ServerInfo,
    options: ConnectionOptions,
    mail_started: bool,
    accepted: usize,
}

impl Connection<SmtpStream> {
    /// Connects to the configured relay and completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the relay cannot be reached, or the
    /// handshake error (see [`Connection::handshake`]).
    pub async fn open(options: ConnectionOptions) -> Result<Self> {
        let (host, port, limit) = (&options.host, options.port, options.connect_timeout);
        debug!(host, port, security = ?options.security, "connecting");
        let stream = match options.security {
            Security::Implicit => connect_tls(host, port, limit).await?,
            Security::None | Security::Opportunistic | Security::StartTls => {
                connect_plain(host, port, limit).await?
            }
        };
        Self::handshake(stream, options).await
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps a connected transport without reading anything yet.
    pub fn new(transport: T, options: ConnectionOptions) -> Self {
        let host = options.host.clone();
        let reader = ResponseReader::attach(options.timeout, move |error| {
            warn!(host = %host, error = %error, "connection failed");
        });
        Self {
            transport: Some(transport),
            reader,
            state: ConnectionState::Connecting,
            resting: ConnectionState::Connecting,
            server_info: ServerInfo::default(),
            options,
            mail_started: false,
            accepted: 0,
        }
    }

    /// Reads the greeting, sends EHLO (falling back to HELO) and upgrades
    /// with STARTTLS as the security mode requires.
    ///
    /// On failure the session is ended with QUIT when still possible.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is not `220`, EHLO and HELO are
    /// both refused, STARTTLS is required but not offered, or the
    /// transport fails.
    pub async fn handshake(transport: T, options: ConnectionOptions) -> Result<Self> {
        let mut connection = Self::new(transport, options);
        match connection.greet().await {
            Ok(()) => Ok(connection),
            Err(e) => {
                connection.abort().await;
                Err(e)
            }
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns what the server announced.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns the options this connection was opened with.
    #[must_use]
    pub const fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns true if the transport is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_encrypted)
    }

    async fn greet(&mut self) -> Result<()> {
        let greeting = self.receive().await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(Error::from_reply("greeting", &greeting));
        }
        self.server_info.hostname = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        self.settle(ConnectionState::Greeted);
        info!(server = %self.server_info.hostname, "connected");

        self.ehlo().await?;
        if self.wants_starttls()? {
            self.starttls().await?;
        }
        Ok(())
    }

    async fn ehlo(&mut self) -> Result<()> {
        let hostname = self.options.client_domain.clone();
        let reply = self
            .command(
                Command::Ehlo {
                    hostname: hostname.clone(),
                },
                Verb::Ehlo,
            )
            .await?;

        if reply.is_success() {
            // The first line is the server's name; each further line is one extension.
            self.server_info.extensions =
                reply.lines.iter().skip(1).map(|line| Extension::parse(line)).collect();
            debug!(extensions = ?self.server_info.extensions, "EHLO accepted");
            return Ok(());
        }

        if reply.is_permanent_error() {
            debug!(code = reply.code.as_u16(), "EHLO refused, trying HELO");
            let reply = self.command(Command::Helo { hostname }, Verb::Helo).await?;
            if reply.is_success() {
                self.server_info.extensions.clear();
                return Ok(());
            }
            return Err(Error::from_reply("HELO", &reply));
        }

        Err(Error::from_reply("EHLO", &reply))
    }

    fn wants_starttls(&self) -> Result<bool> {
        if self.is_encrypted() {
            return Ok(false);
        }
        match self.options.security {
            Security::None | Security::Implicit => Ok(false),
            Security::Opportunistic => Ok(self.server_info.supports_starttls()),
            Security::StartTls if self.server_info.supports_starttls() => Ok(true),
            Security::StartTls => Err(Error::NotSupported("STARTTLS".into())),
        }
    }

    async fn starttls(&mut self) -> Result<()> {
        let reply = self.command(Command::StartTls, Verb::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(Error::from_reply("STARTTLS", &reply));
        }

        self.state = ConnectionState::TlsNegotiating;
        let transport = self.transport.take().ok_or_else(|| unusable(self.state))?;
        let limit = self.options.connect_timeout;
        let upgraded = timeout(limit, transport.upgrade_to_tls(&self.options.host))
            .await
            .unwrap_or(Err(Error::TimedOut(limit)));
        match upgraded {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => return Err(self.fail(e)),
        }
        info!(host = %self.options.host, "STARTTLS negotiated");

        // Capabilities seen before the upgrade cannot be trusted.
        self.server_info.extensions.clear();
        self.settle(ConnectionState::Greeted);
        self.ehlo().await
    }

    /// Authenticates with the strongest mechanism both sides allow.
    ///
    /// Preference order is PLAIN, LOGIN, CRAM-MD5, XOAUTH2, filtered by
    /// [`ConnectionOptions::mechanisms`] and the server's AUTH list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no mechanism is usable or the server
    /// rejects the credentials with a `5xx`; a `4xx` is reported as
    /// [`Error::Transient`].
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<AuthMechanism> {
        self.ensure_usable("AUTH")?;
        let advertised = self.server_info.auth_mechanisms();
        if advertised.is_empty() {
            return Err(Error::Auth("server does not advertise AUTH".into()));
        }
        let mechanism = select_mechanism(&advertised, |m| self.options.allows(m)).ok_or_else(|| {
            Error::Auth(format!("no mutually supported mechanism (server offers {advertised:?})"))
        })?;

        debug!(%mechanism, user = %credentials.user, "authenticating");
        self.settle(ConnectionState::Authenticating);
        let outcome = self.run_auth(mechanism, credentials).await;
        if self.state.is_finished() {
            return outcome.map(|_| mechanism);
        }

        match outcome {
            Ok(reply) if reply.is_success() => {
                self.settle(ConnectionState::Ready);
                info!(%mechanism, "authenticated");
                Ok(mechanism)
            }
            Ok(reply) => {
                self.settle(ConnectionState::Greeted);
                Err(auth_error(mechanism, &reply))
            }
            Err(e) => {
                self.settle(ConnectionState::Greeted);
                Err(e)
            }
        }
    }

    async fn run_auth(&mut self, mechanism: AuthMechanism, credentials: &Credentials) -> Result<Reply> {
        let (user, secret) = (credentials.user.as_str(), credentials.secret());
        let start = |initial_response| Command::Auth {
            mechanism,
            initial_response,
        };

        match mechanism {
            AuthMechanism::Plain => {
                self.command(start(Some(plain_response(user, secret))), Verb::Auth(0))
                    .await
            }
            AuthMechanism::Login => {
                let prompt = self.command(start(None), Verb::Auth(0)).await?;
                expect_challenge(mechanism, &prompt)?;
                let prompt = self
                    .command(Command::AuthResponse(login_response(user)), Verb::Auth(1))
                    .await?;
                expect_challenge(mechanism, &prompt)?;
                self.command(Command::AuthResponse(login_response(secret)), Verb::Auth(2))
                    .await
            }
            AuthMechanism::CramMd5 => {
                let challenge = self.command(start(None), Verb::Auth(0)).await?;
                expect_challenge(mechanism, &challenge)?;
                let answer = cram_md5_response(user, secret, challenge.last_line())?;
                self.command(Command::AuthResponse(answer), Verb::Auth(1)).await
            }
            AuthMechanism::XOAuth2 => {
                let reply = self
                    .command(start(Some(xoauth2_response(user, secret))), Verb::Auth(0))
                    .await?;
                if reply.code == ReplyCode::AUTH_CONTINUE {
                    // Failure details arrive as a challenge; an empty answer
                    // fetches the final reply.
                    debug!(details = %reply.text(), "XOAUTH2 rejected");
                    return self
                        .command(Command::AuthResponse(String::new()), Verb::Auth(1))
                        .await;
                }
                Ok(reply)
            }
        }
    }

    /// Starts a transaction with `MAIL FROM`, adding `BODY=8BITMIME` when
    /// the server supports it.
    ///
    /// # Errors
    ///
    /// Returns the classified reply if the sender is refused.
    pub async fn mail_from(&mut self, from: &Address) -> Result<()> {
        let body = self.server_info.supports_8bitmime().then_some("8BITMIME");
        let command = Command::MailFrom {
            from: from.clone(),
            body,
        };
        let reply = self.command(command, Verb::Mail).await?;
        if !reply.is_success() {
            return Err(Error::from_reply("MAIL FROM", &reply));
        }
        self.mail_started = true;
        self.accepted = 0;
        Ok(())
    }

    /// Adds a recipient with `RCPT TO`.
    ///
    /// A `4xx` reply is retried once right away (greylisting); a second
    /// `4xx` is returned as [`Error::Transient`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] before `MAIL FROM`, otherwise the
    /// classified reply if the recipient is refused.
    pub async fn rcpt_to(&mut self, to: &Address) -> Result<()> {
        if !self.mail_started {
            self.ensure_usable("RCPT")?;
            return Err(Error::InvalidState("RCPT TO before MAIL FROM".into()));
        }

        let mut attempt = 1;
        loop {
            let reply = self
                .command(Command::RcptTo { to: to.clone() }, Verb::Rcpt)
                .await?;
            if reply.is_success() {
                self.accepted += 1;
                return Ok(());
            }
            if reply.is_transient_error() && attempt < MAX_RCPT_ATTEMPTS {
                warn!(recipient = %to, code = reply.code.as_u16(), attempt, "recipient deferred, retrying");
                attempt += 1;
                continue;
            }
            return Err(Error::from_reply("RCPT TO", &reply));
        }
    }

    /// Sends `DATA`, streams `body` dot-stuffed and terminated by a lone
    /// `.` line, and returns the server's verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] without accepted recipients, an
    /// I/O error if `body` fails (the connection is then unusable), or
    /// the classified reply if the message is refused.
    pub async fn data<R>(&mut self, body: R) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        if self.accepted == 0 {
            self.ensure_usable("DATA")?;
            return Err(Error::InvalidState("DATA without an accepted recipient".into()));
        }

        let reply = self.command(Command::Data, Verb::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(Error::from_reply("DATA", &reply));
        }

        self.state = ConnectionState::InCommand(Verb::Data);
        self.send_body(body).await?;
        let reply = self.receive().await?;
        self.state = self.resting;
        self.mail_started = false;
        self.accepted = 0;

        if reply.is_success() {
            info!(reply = %reply.text(), "message accepted");
            Ok(reply)
        } else {
            Err(Error::from_reply("DATA", &reply))
        }
    }

    async fn send_body<R>(&mut self, mut body: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; BODY_CHUNK];
        let mut out = Vec::with_capacity(BODY_CHUNK + BODY_CHUNK / 32);
        let mut stuffer = DotStuffer::new();
        let mut total = 0usize;

        loop {
            let n = match body.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "message body failed mid-DATA");
                    return Err(self.fail(Error::Io(e)));
                }
            };
            total += n;
            out.clear();
            stuffer.feed(&chunk[..n], &mut out);
            self.write(&out).await?;
        }

        out.clear();
        stuffer.finish(&mut out);
        self.write(&out).await?;
        debug!(bytes = total, "message body sent");
        Ok(())
    }

    /// Sends `QUIT` and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if QUIT could not be sent or was refused; the
    /// transport is closed either way.
    pub async fn quit(&mut self) -> Result<()> {
        self.ensure_usable("QUIT")?;
        self.resting = ConnectionState::Closing;
        let outcome = self.command(Command::Quit, Verb::Quit).await;
        self.close().await;

        let reply = outcome?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(Error::from_reply("QUIT", &reply))
        }
    }

    /// Sends `QUIT` if the session is still usable, then closes. Never fails.
    pub async fn abort(&mut self) {
        if self.ensure_usable("QUIT").is_ok() {
            if let Err(e) = self.quit().await {
                debug!(error = %e, "QUIT after failure did not complete");
            }
        } else {
            self.close().await;
        }
    }

    /// Closes the transport without QUIT. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            // The peer may already be gone.
            let _ = timeout(self.options.timeout, transport.shutdown()).await;
        }
        self.reader.detach(None);
        if self.state != ConnectionState::Errored {
            self.state = ConnectionState::Closed;
        }
    }

    async fn command(&mut self, command: Command, verb: Verb) -> Result<Reply> {
        self.ensure_usable(&verb.to_string())?;
        debug!("C: {command}");
        self.state = ConnectionState::InCommand(verb);
        self.write(&command.serialize()).await?;
        let reply = self.receive().await?;
        self.state = self.resting;
        Ok(reply)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let limit = self.options.timeout;
        let transport = self.transport.as_mut().ok_or_else(|| unusable(self.state))?;
        let written = timeout(limit, async {
            transport.write_all(bytes).await?;
            transport.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(Error::Io(e))),
            Err(_) => Err(self.fail(Error::TimedOut(limit))),
        }
    }

    async fn receive(&mut self) -> Result<Reply> {
        let transport = self.transport.as_mut().ok_or_else(|| unusable(self.state))?;
        let event = self.reader.next_event(transport).await;
        let reply = match event {
            Some(event) => event.into_reply(),
            None => Err(unusable(self.state)),
        };
        reply.map_err(|e| self.fail(e))
    }

    /// Moves to `state` and makes it the state to return to after commands.
    fn settle(&mut self, state: ConnectionState) {
        self.state = state;
        self.resting = state;
    }

    /// Makes the connection unusable if `error` ended it.
    fn fail(&mut self, error: Error) -> Error {
        if error.is_fatal() || self.transport.is_none() {
            self.state = ConnectionState::Errored;
            self.transport = None;
            self.reader.detach(Some(&error));
        }
        error
    }

    fn ensure_usable(&self, operation: &str) -> Result<()> {
        if self.transport.is_none() || !self.state.is_usable() {
            return Err(unusable(self.state));
        }
        if let ConnectionState::InCommand(verb) = self.state {
            return Err(Error::InvalidState(format!(
                "cannot {operation}: reply to abandoned {verb} outstanding"
            )));
        }
        Ok(())
    }

    /// Returns the idle timeout in force.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.options.timeout
    }
}

fn unusable(state: ConnectionState) -> Error {
    Error::InvalidState(format!("connection is {state:?}"))
}

fn expect_challenge(mechanism: AuthMechanism, reply: &Reply) -> Result<()> {
    if reply.code == ReplyCode::AUTH_CONTINUE {
        Ok(())
    } else {
        Err(auth_error(mechanism, reply))
    }
}

fn auth_error(mechanism: AuthMechanism, reply: &Reply) -> Error {
    if reply.is_permanent_error() {
        Error::Auth(format!("{mechanism} rejected: {} {}", reply.code, reply.text()))
    } else {
        Error::from_reply("AUTH", reply)
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
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader, DuplexStream, ReadBuf};
    use tokio_test::io::{Builder, Mock};

    /// Wraps a scripted stream; "upgrading" flips a flag on the same stream.
    #[derive(Debug)]
    struct TestTransport<S> {
        inner: S,
        encrypted: bool,
    }

    impl<S> TestTransport<S> {
        const fn new(inner: S) -> Self {
            Self {
                inner,
                encrypted: false,
            }
        }
    }

    impl<S: AsyncRead + Unpin> AsyncRead for TestTransport<S> {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl<S: AsyncWrite + Unpin> AsyncWrite for TestTransport<S> {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for TestTransport<S> {
        fn is_encrypted(&self) -> bool {
            self.encrypted
        }

        async fn upgrade_to_tls(mut self, _host: &str) -> Result<Self> {
            self.encrypted = true;
            Ok(self)
        }
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions::builder("smtp.test")
            .client_domain("client.test")
            .timeout(Duration::from_secs(1))
            .build()
    }

    /// Greeting plus an EHLO advertising `extensions`.
    fn greeted(builder: &mut Builder, extensions: &[&str]) {
        builder.read(b"220 smtp.test ESMTP ready\r\n");
        builder.write(b"EHLO client.test\r\n");
        let mut reply = String::from("250");
        reply.push(if extensions.is_empty() { ' ' } else { '-' });
        reply.push_str("smtp.test greets client.test\r\n");
        for (i, ext) in extensions.iter().enumerate() {
            let sep = if i + 1 == extensions.len() { ' ' } else { '-' };
            reply.push_str(&format!("250{sep}{ext}\r\n"));
        }
        builder.read(reply.as_bytes());
    }

    fn quit(builder: &mut Builder) {
        builder.write(b"QUIT\r\n").read(b"221 bye\r\n");
    }

    async fn open(builder: &mut Builder) -> Connection<TestTransport<Mock>> {
        Connection::handshake(TestTransport::new(builder.build()), options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_reads_capabilities() {
        let mut script = Builder::new();
        greeted(&mut script, &["8BITMIME", "SIZE 1000", "AUTH PLAIN LOGIN"]);
        quit(&mut script);

        let mut conn = open(&mut script).await;
        assert_eq!(conn.state(), ConnectionState::Greeted);
        assert_eq!(conn.server_info().hostname, "smtp.test");
        assert!(conn.server_info().supports_8bitmime());
        assert_eq!(conn.server_info().max_message_size(), Some(1000));
        assert_eq!(
            conn.server_info().auth_mechanisms(),
            vec![AuthMechanism::Plain, AuthMechanism::Login]
        );
        assert!(!conn.is_encrypted());

        conn.quit().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let mut script = Builder::new();
        script
            .read(b"220 old.test\r\n")
            .write(b"EHLO client.test\r\n")
            .read(b"502 command not implemented\r\n")
            .write(b"HELO client.test\r\n")
            .read(b"250 old.test\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        assert!(conn.server_info().extensions.is_empty());
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_greeting_quits() {
        let mut script = Builder::new();
        script.read(b"554 go away\r\n");
        quit(&mut script);

        let err = Connection::handshake(TestTransport::new(script.build()), options())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(err.code(), Some(554));
    }

    #[tokio::test]
    async fn test_opportunistic_starttls_repeats_ehlo() {
        let mut script = Builder::new();
        greeted(&mut script, &["STARTTLS", "AUTH LOGIN"]);
        script
            .write(b"STARTTLS\r\n")
            .read(b"220 go ahead\r\n")
            .write(b"EHLO client.test\r\n")
            .read(b"250-smtp.test\r\n250 AUTH PLAIN\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        assert!(conn.is_encrypted());
        assert!(!conn.server_info().supports_starttls());
        assert_eq!(conn.server_info().auth_mechanisms(), vec![AuthMechanism::Plain]);
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_required_starttls_missing() {
        let mut script = Builder::new();
        greeted(&mut script, &["8BITMIME"]);
        quit(&mut script);

        let options = ConnectionOptions::builder("smtp.test")
            .client_domain("client.test")
            .security(Security::StartTls)
            .build();
        let err = Connection::handshake(TestTransport::new(script.build()), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(ref what) if what == "STARTTLS"));
    }

    #[tokio::test]
    async fn test_starttls_refused_aborts_handshake() {
        let mut script = Builder::new();
        greeted(&mut script, &["STARTTLS"]);
        script
            .write(b"STARTTLS\r\n")
            .read(b"454 4.7.0 TLS not available\r\n");
        quit(&mut script);

        let err = Connection::handshake(TestTransport::new(script.build()), options())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.code(), Some(454));
    }

    #[tokio::test]
    async fn test_security_none_skips_starttls() {
        let mut script = Builder::new();
        greeted(&mut script, &["STARTTLS"]);
        quit(&mut script);

        let options = ConnectionOptions::builder("smtp.test")
            .client_domain("client.test")
            .security(Security::None)
            .build();
        let mut conn = Connection::handshake(TestTransport::new(script.build()), options)
            .await
            .unwrap();
        assert!(!conn.is_encrypted());
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_plain() {
        let mut script = Builder::new();
        greeted(&mut script, &["AUTH LOGIN PLAIN"]);
        script
            .write(b"AUTH PLAIN AHBvb2gAaG9uZXk=\r\n")
            .read(b"235 ok\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        let used = conn.authenticate(&Credentials::new("pooh", "honey")).await.unwrap();
        assert_eq!(used, AuthMechanism::Plain);
        assert_eq!(conn.state(), ConnectionState::Ready);
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_login_two_prompts() {
        let mut script = Builder::new();
        greeted(&mut script, &["AUTH LOGIN"]);
        script
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"cG9vaA==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"aG9uZXk=\r\n")
            .read(b"235 ok\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        let used = conn.authenticate(&Credentials::new("pooh", "honey")).await.unwrap();
        assert_eq!(used, AuthMechanism::Login);
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_cram_md5() {
        let mut script = Builder::new();
        greeted(&mut script, &["AUTH CRAM-MD5"]);
        script
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"235 ok\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        let used = conn
            .authenticate(&Credentials::new("tim", "tanstaaftanstaaf"))
            .await
            .unwrap();
        assert_eq!(used, AuthMechanism::CramMd5);
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_xoauth2_rejected() {
        let mut script = Builder::new();
        greeted(&mut script, &["AUTH XOAUTH2"]);
        script
            .write(b"AUTH XOAUTH2 dXNlcj1wb29oAWF1dGg9QmVhcmVyIGhvbmV5AQE=\r\n")
            .read(b"334 eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"\r\n")
            .read(b"535 invalid credentials\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        let err = conn.authenticate(&Credentials::new("pooh", "honey")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref msg) if msg.contains("535")));
        assert_eq!(conn.state(), ConnectionState::Greeted);
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_without_common_mechanism_sends_nothing() {
        let mut script = Builder::new();
        greeted(&mut script, &["AUTH CRAM-MD5"]);
        quit(&mut script);

        let options = ConnectionOptions::builder("smtp.test")
            .client_domain("client.test")
            .mechanisms([AuthMechanism::Plain])
            .build();
        let mut conn = Connection::handshake(TestTransport::new(script.build()), options)
            .await
            .unwrap();
        let err = conn.authenticate(&Credentials::new("pooh", "honey")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let mut script = Builder::new();
        greeted(&mut script, &["8BITMIME"]);
        script
            .write(b"MAIL FROM:<piglet@example.com> BODY=8BITMIME\r\n")
            .read(b"250 sender ok\r\n")
            .write(b"RCPT TO:<pooh@example.com>\r\n")
            .read(b"250 recipient ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\n..leading dot\r\nend\r\n.\r\n")
            .read(b"250 queued as 42\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        conn.mail_from(&Address::new("piglet@example.com").unwrap()).await.unwrap();
        conn.rcpt_to(&Address::new("pooh@example.com").unwrap()).await.unwrap();
        let reply = conn
            .data(&b"Subject: hi\r\n\r\n.leading dot\r\nend\r\n"[..])
            .await
            .unwrap();
        assert_eq!(reply.text(), "queued as 42");
        conn.quit().await.unwrap();
    }

    /// Yields `first`, then fails every later read.
    struct FailingBody {
        first: Option<&'static [u8]>,
    }

    impl AsyncRead for FailingBody {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut().first.take() {
                Some(bytes) => {
                    buf.put_slice(bytes);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::other("disk gone"))),
            }
        }
    }

    #[tokio::test]
    async fn test_body_failure_leaves_message_unterminated() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        script
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n");

        let mut conn = open(&mut script).await;
        conn.mail_from(&Address::new("a@example.com").unwrap()).await.unwrap();
        conn.rcpt_to(&Address::new("b@example.com").unwrap()).await.unwrap();
        let err = conn
            .data(FailingBody {
                first: Some(b"Subject: hi\r\n"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.to_string() == "disk gone"));
        assert_eq!(conn.state(), ConnectionState::Errored);

        // No QUIT and no terminating dot reach the server.
        conn.abort().await;
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_implicit_tls_speaks_tls_first() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut first = [0u8; 1];
            socket.read_exact(&mut first).await.unwrap();
            // A plaintext greeting is garbage to a TLS client.
            let _ = socket.write_all(b"220 plain.test ESMTP\r\n").await;
            first[0]
        });

        let options = ConnectionOptions::builder("127.0.0.1")
            .port(port)
            .security(Security::Implicit)
            .client_domain("client.test")
            .timeout(Duration::from_secs(1))
            .build();
        let err = Connection::open(options).await.unwrap_err();
        assert!(matches!(err, Error::Io(_) | Error::Tls(_)), "{err:?}");

        // 0x16 opens a TLS handshake record.
        assert_eq!(server.await.unwrap(), 0x16);
    }

    #[tokio::test]
    async fn test_rcpt_greylisted_once_then_accepted() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        script
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"450 greylisted, try again\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 ok\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        conn.mail_from(&Address::new("a@example.com").unwrap()).await.unwrap();
        conn.rcpt_to(&Address::new("b@example.com").unwrap()).await.unwrap();
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rcpt_greylisted_twice_fails_once() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        script
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"450 greylisted\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"450 still greylisted\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        conn.mail_from(&Address::new("a@example.com").unwrap()).await.unwrap();
        let err = conn
            .rcpt_to(&Address::new("b@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.code(), Some(450));
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rcpt_permanent_is_not_retried() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        script
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<nobody@example.com>\r\n")
            .read(b"550 no such user\r\n");
        quit(&mut script);

        let mut conn = open(&mut script).await;
        conn.mail_from(&Address::new("a@example.com").unwrap()).await.unwrap();
        let err = conn
            .rcpt_to(&Address::new("nobody@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_commands_are_rejected_locally() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        quit(&mut script);

        let mut conn = open(&mut script).await;
        let err = conn
            .rcpt_to(&Address::new("b@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let err = conn.data(&b"body"[..]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        conn.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_hangup_makes_connection_unusable() {
        let mut script = Builder::new();
        greeted(&mut script, &[]);
        script.write(b"MAIL FROM:<a@example.com>\r\n");

        let mut conn = open(&mut script).await;
        let err = conn
            .mail_from(&Address::new("a@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionEnded));
        assert_eq!(conn.state(), ConnectionState::Errored);

        let err = conn.quit().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    /// Answers each command line with the next scripted reply; `None`
    /// means read the command and never answer.
    async fn serve(server: DuplexStream, greeting: &'static str, replies: Vec<Option<&'static str>>) {
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();
        write.write_all(greeting.as_bytes()).await.unwrap();
        for reply in replies {
            if lines.next_line().await.unwrap().is_none() {
                return;
            }
            match reply {
                Some(reply) => write.write_all(reply.as_bytes()).await.unwrap(),
                None => {
                    // Hold the line open until the client gives up.
                    let _ = lines.next_line().await;
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_errors_and_blocks_further_use() {
        let (client, server) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve(server, "220 ready\r\n", vec![Some("250 ok\r\n"), None]));

        let options = ConnectionOptions::builder("smtp.test")
            .client_domain("client.test")
            .timeout(Duration::from_millis(100))
            .build();
        let mut conn = Connection::handshake(TestTransport::new(client), options)
            .await
            .unwrap();

        let err = conn
            .mail_from(&Address::new("a@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimedOut(d) if d == Duration::from_millis(100)));
        assert_eq!(conn.state(), ConnectionState::Errored);

        let err = conn
            .rcpt_to(&Address::new("b@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        conn.abort().await;
        assert_eq!(conn.state(), ConnectionState::Errored);
        server.await.unwrap();
    }
}
