//! High-level SMTP session.
//!
//! A [`Session`] owns one connection for its whole life. Opening it runs
//! the greeting, EHLO (falling back to HELO), STARTTLS and AUTH; after that
//! any number of transactions can be sent. A rejected transaction is reset
//! with RSET so the next one starts clean; connection failures, timeouts
//! and authentication failures close the session for good.

use bytes::BytesMut;
use postwire_mime::Message;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::buffer::SmtpBuffer;
use super::config::{Config, Security};
use super::data::DotStuffer;
use super::stream::{Connection, Transport};
use crate::command::{BodyType, Command};
use crate::error::RecipientRejected;
use crate::types::{Address, Extensions, Reply, ReplyCode};
use crate::{Error, Result};

/// Size of the chunks read from a DATA source.
const DATA_CHUNK_SIZE: usize = 16 * 1024;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected.
    Initial,
    /// Transport open, greeting not read.
    Connected,
    /// Server greeting accepted.
    Greeted,
    /// EHLO/HELO accepted.
    Extended,
    /// Encryption active and EHLO repeated.
    TlsActive,
    /// AUTH succeeded.
    Authenticated,
    /// Inside MAIL/RCPT/DATA.
    MailTransaction,
    /// Connection gone; the session cannot be reused.
    Closed,
}

/// Outcome of an accepted transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients the server accepted.
    pub accepted: Vec<Address>,
    /// Recipients the server refused.
    pub rejected: Vec<RecipientRejected>,
}

impl Delivery {
    /// Number of accepted recipients.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    /// Returns true if no recipient was refused.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MailOptions {
    size: Option<usize>,
    eight_bit: bool,
}

/// SMTP session over a [`Connection`].
#[derive(Debug)]
pub struct Session<S: Connection = Transport> {
    buffer: Option<SmtpBuffer<S>>,
    config: Config,
    state: SessionState,
    /// State to return to when a transaction ends.
    ready_state: SessionState,
    extensions: Extensions,
    greeting: Option<Reply>,
}

impl Session<Transport> {
    /// Opens the configured transport and runs the session handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, greeting, EHLO, STARTTLS or
    /// AUTH fails.
    pub async fn connect(config: Config) -> Result<Self> {
        let transport = Transport::open(&config).await?;
        Self::with_stream(transport, config).await
    }
}

impl<S: Connection> Session<S> {
    /// Runs the session handshake over an already-open stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting, EHLO, STARTTLS or AUTH fails.
    pub async fn with_stream(stream: S, config: Config) -> Result<Self> {
        let buffer = SmtpBuffer::new(stream, config.io_timeout);
        let mut session = Self {
            buffer: Some(buffer),
            config,
            state: SessionState::Connected,
            ready_state: SessionState::Initial,
            extensions: Extensions::default(),
            greeting: None,
        };

        match session.establish().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close_transport().await;
                Err(e)
            }
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the extensions from the most recent EHLO.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns the server greeting.
    #[must_use]
    pub const fn greeting(&self) -> Option<&Reply> {
        self.greeting.as_ref()
    }

    /// Returns true if the connection is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.buffer.as_ref().is_some_and(SmtpBuffer::is_encrypted)
    }

    /// Sends one message: MAIL FROM, RCPT TO for each recipient, DATA.
    ///
    /// `data` must already be a complete RFC 5322 message; dot-stuffing and
    /// the end-of-data marker are added here. Refused recipients are
    /// reported in the returned [`Delivery`] as long as one was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an unexpected reply and
    /// [`Error::AllRecipientsRejected`] if nobody was accepted; the
    /// transaction is reset first. Connection errors close the session.
    pub async fn send_envelope<R>(
        &mut self,
        from: &Address,
        recipients: &[Address],
        data: R,
    ) -> Result<Delivery>
    where
        R: AsyncRead + Unpin,
    {
        self.transaction(from, recipients, data, MailOptions::default())
            .await
    }

    /// Serializes `message` and sends it with [`Self::send_envelope`].
    ///
    /// The message size is announced with SIZE, and 8bit bodies with
    /// `BODY=8BITMIME`, when the server supports them.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the message cannot be serialized, or
    /// [`Error::MessageTooLarge`] if it exceeds the server's SIZE limit;
    /// otherwise as [`Self::send_envelope`].
    pub async fn send_message(
        &mut self,
        from: &Address,
        recipients: &[Address],
        message: &Message,
    ) -> Result<Delivery> {
        let bytes = message.to_bytes()?;
        let options = MailOptions {
            size: Some(bytes.len()),
            eight_bit: message.transfer_encoding().is_eight_bit(),
        };
        self.transaction(from, recipients, bytes.as_slice(), options)
            .await
    }

    /// Sends NOOP.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer 250.
    pub async fn noop(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.expect_reply(&Command::Noop, &[ReplyCode::OK]).await?;
        Ok(())
    }

    /// Sends RSET, abandoning any transaction in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer 250.
    pub async fn reset(&mut self) -> Result<()> {
        self.buffer_mut()?;
        self.expect_reply(&Command::Rset, &[ReplyCode::OK]).await?;
        self.state = self.ready_state;
        Ok(())
    }

    /// Sends QUIT and closes the connection.
    ///
    /// The connection is closed even if QUIT is not answered with 221.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already closed or QUIT fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.buffer_mut()?;
        let result = self.expect_reply(&Command::Quit, &[ReplyCode::CLOSING]).await;
        self.close_transport().await;
        result.map(drop)
    }

    async fn establish(&mut self) -> Result<()> {
        let greeting = self.buffer_mut()?.read_reply().await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(Error::protocol(
                "connection greeting",
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }
        tracing::debug!(greeting = greeting.first_line(), "Connected");
        self.greeting = Some(greeting);
        self.state = SessionState::Greeted;

        self.hello().await?;
        self.state = if self.is_encrypted() {
            SessionState::TlsActive
        } else {
            SessionState::Extended
        };

        let offers_tls = self.extensions.supports("STARTTLS");
        match self.config.security {
            Security::StartTls if !offers_tls => {
                return Err(Error::NotSupported("STARTTLS".into()));
            }
            Security::StartTls | Security::Opportunistic if offers_tls && !self.is_encrypted() => {
                self.starttls().await?;
            }
            _ => {}
        }

        if self.config.credentials.is_some() {
            if self.extensions.supports("AUTH") {
                self.authenticate().await?;
            } else {
                tracing::debug!("Server does not offer AUTH; continuing unauthenticated");
            }
        }

        self.ready_state = self.state;
        Ok(())
    }

    /// EHLO, or HELO if the server rejects EHLO permanently.
    async fn hello(&mut self) -> Result<()> {
        let hostname = self.config.local_hostname.clone();
        let reply = self
            .command(&Command::Ehlo {
                hostname: hostname.clone(),
            })
            .await?;

        if reply.is_success() {
            self.extensions = Extensions::from_ehlo(&reply);
            tracing::debug!(
                extensions = ?self.extensions.iter().map(|(k, _)| k).collect::<Vec<_>>(),
                "EHLO accepted"
            );
            return Ok(());
        }

        if !reply.is_permanent_error() {
            return Err(Error::protocol(
                "EHLO",
                reply.code.as_u16(),
                reply.message_text(),
            ));
        }

        tracing::debug!(code = reply.code.as_u16(), "EHLO rejected, falling back to HELO");
        self.expect_reply(&Command::Helo { hostname }, &[ReplyCode::OK])
            .await?;
        self.extensions = Extensions::default();
        Ok(())
    }

    async fn starttls(&mut self) -> Result<()> {
        self.expect_reply(&Command::StartTls, &[ReplyCode::SERVICE_READY])
            .await?;

        let host = self
            .config
            .server_name()
            .ok_or_else(|| Error::NotSupported("STARTTLS without a server name".into()))?
            .to_string();
        let buffer = self.buffer.take().ok_or(Error::ConnectionClosed)?;
        self.buffer = Some(buffer.upgrade_to_encrypted(&host).await?);

        // Anything learned before the handshake may have been forged.
        self.extensions = Extensions::default();
        self.state = SessionState::TlsActive;
        tracing::debug!(host = %host, "TLS established");

        self.hello().await
    }

    async fn authenticate(&mut self) -> Result<()> {
        let Some(credentials) = self.config.credentials.clone() else {
            return Ok(());
        };
        let offered = self.extensions.auth_mechanisms();
        let mechanism = self
            .config
            .mechanisms
            .iter()
            .copied()
            .find(|m| offered.contains(m))
            .ok_or_else(|| {
                Error::NotSupported(format!(
                    "no common AUTH mechanism (server offers {:?})",
                    self.extensions.params("AUTH").unwrap_or_default()
                ))
            })?;
        tracing::debug!(%mechanism, "Authenticating");

        let buffer = self.buffer_mut()?;
        let outcome = mechanism
            .exchange(buffer, &credentials.username, &credentials.password)
            .await;

        match outcome {
            Ok(None) => {
                self.state = SessionState::Authenticated;
                Ok(())
            }
            Ok(Some(reply)) => {
                tracing::warn!(%mechanism, code = reply.code.as_u16(), "Authentication failed");
                self.reset_best_effort().await;
                Err(Error::AuthenticationFailed {
                    mechanism: mechanism.to_string(),
                    code: reply.code.as_u16(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn transaction<R>(
        &mut self,
        from: &Address,
        recipients: &[Address],
        data: R,
        options: MailOptions,
    ) -> Result<Delivery>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_ready()?;
        if recipients.is_empty() {
            return Err(Error::InvalidState("no recipients".into()));
        }
        if let (Some(size), Some(limit)) = (options.size, self.extensions.max_size())
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        let mail = Command::MailFrom {
            from: from.clone(),
            body: (options.eight_bit && self.extensions.supports("8BITMIME"))
                .then_some(BodyType::EightBitMime),
            size: options.size.filter(|_| self.extensions.supports("SIZE")),
        };

        self.state = SessionState::MailTransaction;
        let pipelined = self.config.pipelining && self.extensions.supports("PIPELINING");
        let envelope = if pipelined {
            self.envelope_pipelined(&mail, recipients).await
        } else {
            self.envelope_lockstep(&mail, recipients).await
        };

        let result = match envelope {
            Ok(delivery) => self.transmit(data).await.map(|()| delivery),
            Err(e) => Err(e),
        };

        match result {
            Ok(delivery) => {
                self.state = self.ready_state;
                tracing::info!(
                    accepted = delivery.accepted.len(),
                    rejected = delivery.rejected.len(),
                    "Message delivered"
                );
                Ok(delivery)
            }
            Err(e) if e.is_terminal() => {
                self.close_transport().await;
                Err(e)
            }
            Err(e) => {
                self.reset_best_effort().await;
                Err(e)
            }
        }
    }

    async fn envelope_lockstep(
        &mut self,
        mail: &Command,
        recipients: &[Address],
    ) -> Result<Delivery> {
        self.expect_reply(mail, &[ReplyCode::OK]).await?;

        let mut delivery = Delivery::default();
        for to in recipients {
            let reply = self.command(&Command::RcptTo { to: to.clone() }).await?;
            record_recipient(&mut delivery, to, &reply);
        }

        if delivery.accepted.is_empty() {
            return Err(Error::AllRecipientsRejected(delivery.rejected));
        }

        self.expect_reply(&Command::Data, &[ReplyCode::START_DATA])
            .await?;
        Ok(delivery)
    }

    /// MAIL, RCPT and DATA in one write (RFC 2920); replies read in order.
    async fn envelope_pipelined(
        &mut self,
        mail: &Command,
        recipients: &[Address],
    ) -> Result<Delivery> {
        let mut batch = Vec::with_capacity(recipients.len() + 2);
        batch.push(mail.clone());
        batch.extend(recipients.iter().map(|to| Command::RcptTo { to: to.clone() }));
        batch.push(Command::Data);

        let buffer = self.buffer_mut()?;
        buffer.send_batch(&batch).await?;

        let mail_reply = buffer.read_reply().await?;
        let mut delivery = Delivery::default();
        for to in recipients {
            let reply = buffer.read_reply().await?;
            record_recipient(&mut delivery, to, &reply);
        }
        let data_reply = buffer.read_reply().await?;

        let failure = if mail_reply.code != ReplyCode::OK {
            Some(reply_error(mail, &mail_reply))
        } else if delivery.accepted.is_empty() {
            Some(Error::AllRecipientsRejected(std::mem::take(
                &mut delivery.rejected,
            )))
        } else if data_reply.code != ReplyCode::START_DATA {
            Some(reply_error(&Command::Data, &data_reply))
        } else {
            None
        };

        let Some(failure) = failure else {
            return Ok(delivery);
        };

        if data_reply.code == ReplyCode::START_DATA {
            // The server is waiting for a body; send an empty one so the
            // transaction can be reset.
            buffer.write_raw(b".\r\n").await?;
            let _ = buffer.read_reply().await?;
        }
        Err(failure)
    }

    async fn transmit<R>(&mut self, mut data: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let buffer = self.buffer_mut()?;
        let mut stuffer = DotStuffer::new();
        let mut chunk = vec![0u8; DATA_CHUNK_SIZE];
        let mut out = BytesMut::with_capacity(DATA_CHUNK_SIZE + DATA_CHUNK_SIZE / 8);
        let mut total = 0usize;

        loop {
            let n = data.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            total += n;
            stuffer.stuff(&chunk[..n], &mut out);
            buffer.write_raw(&out).await?;
            out.clear();
        }

        stuffer.finish(&mut out);
        buffer.write_raw(&out).await?;
        tracing::trace!(bytes = total, "C: <message data>");

        let reply = buffer.read_reply().await?;
        if reply.code == ReplyCode::OK {
            Ok(())
        } else {
            Err(reply_error(&Command::Data, &reply))
        }
    }

    /// Sends `command` and fails unless the reply code is in `accepted`.
    async fn expect_reply(&mut self, command: &Command, accepted: &[ReplyCode]) -> Result<Reply> {
        let reply = self.command(command).await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply_error(command, &reply))
        }
    }

    /// Sends `command`, closing the session on connection-level failure.
    async fn command(&mut self, command: &Command) -> Result<Reply> {
        let result = self.buffer_mut()?.command(command).await;
        if let Err(e) = &result
            && e.is_terminal()
        {
            self.close_transport().await;
        }
        result
    }

    /// RSET whose failure is logged, not returned.
    async fn reset_best_effort(&mut self) {
        match self.command(&Command::Rset).await {
            Ok(reply) if reply.code == ReplyCode::OK => {}
            Ok(reply) => {
                tracing::warn!(code = reply.code.as_u16(), "RSET rejected");
            }
            Err(e) => tracing::warn!(?e, "RSET failed"),
        }
        if self.state == SessionState::MailTransaction {
            self.state = self.ready_state;
        }
    }

    async fn close_transport(&mut self) {
        if let Some(buffer) = self.buffer.take()
            && let Err(e) = buffer.close().await
        {
            tracing::debug!(?e, "Error while closing connection");
        }
        self.state = SessionState::Closed;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Extended | SessionState::TlsActive | SessionState::Authenticated
                if self.buffer.is_some() =>
            {
                Ok(())
            }
            state => Err(Error::InvalidState(format!(
                "cannot start a transaction in state {state:?}"
            ))),
        }
    }

    fn buffer_mut(&mut self) -> Result<&mut SmtpBuffer<S>> {
        self.buffer
            .as_mut()
            .ok_or_else(|| Error::InvalidState("session is closed".into()))
    }
}

fn record_recipient(delivery: &mut Delivery, to: &Address, reply: &Reply) {
    if reply.code == ReplyCode::OK || reply.code == ReplyCode::FORWARD {
        delivery.accepted.push(to.clone());
    } else {
        tracing::warn!(recipient = %to, code = reply.code.as_u16(), "Recipient rejected");
        delivery.rejected.push(RecipientRejected {
            address: to.to_string(),
            code: reply.code.as_u16(),
            message: reply.message_text(),
        });
    }
}

fn reply_error(command: &Command, reply: &Reply) -> Error {
    Error::protocol(command.redacted(), reply.code.as_u16(), reply.message_text())
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
    use crate::types::AuthMechanism;
    use std::time::Duration;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWrite, ReadBuf};
    use tokio_test::io::{Builder, Mock};

    /// Scripted stream whose TLS upgrade only flips a flag.
    #[derive(Debug)]
    struct UpgradableMock {
        inner: Mock,
        encrypted: bool,
    }

    impl AsyncRead for UpgradableMock {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for UpgradableMock {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    impl Connection for UpgradableMock {
        async fn upgrade_to_tls(mut self, _host: &str) -> Result<Self> {
            self.encrypted = true;
            Ok(self)
        }

        fn is_encrypted(&self) -> bool {
            self.encrypted
        }
    }

    fn config() -> Config {
        Config::builder("smtp.example.com")
            .security(Security::None)
            .local_hostname("client.example.org")
            .io_timeout(Duration::from_secs(5))
            .build()
    }

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    /// Greeting plus a plain EHLO exchange.
    fn handshake(builder: &mut Builder, ehlo_reply: &[u8]) {
        builder
            .read(b"220 smtp.example.com ESMTP\r\n")
            .write(b"EHLO client.example.org\r\n")
            .read(ehlo_reply);
    }

    async fn open(mock: Mock, config: Config) -> Session<Mock> {
        Session::with_stream(mock, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_handshake_captures_extensions() {
        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250-SIZE 1000\r\n250 8BITMIME\r\n",
        );
        let session = open(builder.build(), config()).await;

        assert_eq!(session.state(), SessionState::Extended);
        assert_eq!(session.extensions().max_size(), Some(1000));
        assert!(session.extensions().supports("8BITMIME"));
        assert_eq!(
            session.greeting().unwrap().first_line(),
            "smtp.example.com ESMTP"
        );
        assert!(!session.is_encrypted());
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let mock = Builder::new()
            .read(b"220 old.example.com\r\n")
            .write(b"EHLO client.example.org\r\n")
            .read(b"502 Command not implemented\r\n")
            .write(b"HELO client.example.org\r\n")
            .read(b"250 old.example.com\r\n")
            .build();
        let session = open(mock, config()).await;
        assert_eq!(session.state(), SessionState::Extended);
        assert!(session.extensions().is_empty());
    }

    #[tokio::test]
    async fn test_bad_greeting() {
        let mock = Builder::new().read(b"554 No service\r\n").build();
        let err = Session::with_stream(mock, config()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 554, .. }));
    }

    #[tokio::test]
    async fn test_greeting_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).build();
        let config = Config::builder("smtp.example.com")
            .security(Security::None)
            .io_timeout(Duration::from_millis(20))
            .build();
        let err = Session::with_stream(mock, config).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_starttls_required_but_missing() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        let config = Config::builder("smtp.example.com")
            .local_hostname("client.example.org")
            .security(Security::StartTls)
            .build();
        let err = Session::with_stream(builder.build(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_starttls_rejects_injected_data() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250-smtp.example.com\r\n250 STARTTLS\r\n");
        builder
            .write(b"STARTTLS\r\n")
            .read(b"220 Ready\r\n250-smtp.example.com\r\n250 AUTH PLAIN\r\n");
        let config = Config::builder("smtp.example.com")
            .local_hostname("client.example.org")
            .security(Security::Opportunistic)
            .build();
        let err = Session::with_stream(builder.build(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_starttls_renegotiates_extensions() {
        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250-STARTTLS\r\n250 AUTH PLAIN\r\n",
        );
        builder
            .write(b"STARTTLS\r\n")
            .read(b"220 Ready to start TLS\r\n")
            .write(b"EHLO client.example.org\r\n")
            .read(b"250-smtp.example.com\r\n250 AUTH LOGIN\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 OK\r\n");
        let stream = UpgradableMock {
            inner: builder.build(),
            encrypted: false,
        };
        let config = Config::builder("smtp.example.com")
            .security(Security::StartTls)
            .local_hostname("client.example.org")
            .credentials("user", "pass")
            .mechanisms([AuthMechanism::Plain, AuthMechanism::Login])
            .build();

        let session = Session::with_stream(stream, config).await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.is_encrypted());
        assert!(!session.extensions().supports("STARTTLS"));
        assert_eq!(
            session.extensions().auth_mechanisms(),
            vec![AuthMechanism::Login]
        );
    }

    #[tokio::test]
    async fn test_auth_failure_resets_and_closes() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250-smtp.example.com\r\n250 AUTH PLAIN\r\n");
        builder
            .write(b"AUTH PLAIN AHVzZXIAd3Jvbmc=\r\n")
            .read(b"535 5.7.8 Bad credentials\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n");
        let config = Config::builder("smtp.example.com")
            .security(Security::None)
            .local_hostname("client.example.org")
            .credentials("user", "wrong")
            .build();
        let err = Session::with_stream(builder.build(), config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AuthenticationFailed { ref mechanism, code: 535 } if mechanism == "PLAIN"
        ));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_mechanism_preference_order() {
        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250 AUTH PLAIN LOGIN\r\n",
        );
        builder
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 OK\r\n");
        let config = Config::builder("smtp.example.com")
            .security(Security::None)
            .local_hostname("client.example.org")
            .credentials("user", "pass")
            .mechanisms([AuthMechanism::Login, AuthMechanism::Plain])
            .build();
        let session = open(builder.build(), config).await;
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_no_common_mechanism() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250-smtp.example.com\r\n250 AUTH GSSAPI\r\n");
        let config = Config::builder("smtp.example.com")
            .security(Security::None)
            .local_hostname("client.example.org")
            .credentials("user", "pass")
            .build();
        let err = Session::with_stream(builder.build(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_partial_rejection() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        builder
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"550 No such user\r\n")
            .write(b"RCPT TO:<c@example.com>\r\n")
            .read(b"251 Will forward\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(b"Subject: x\r\n\r\n..dot\r\n")
            .write(b".\r\n")
            .read(b"250 Queued\r\n");
        let mut session = open(builder.build(), config()).await;

        let delivery = session
            .send_envelope(
                &addr("a@example.com"),
                &[addr("b@example.com"), addr("c@example.com")],
                &b"Subject: x\r\n\r\n.dot\r\n"[..],
            )
            .await
            .unwrap();

        assert_eq!(delivery.accepted, vec![addr("c@example.com")]);
        assert_eq!(delivery.rejected.len(), 1);
        assert_eq!(delivery.rejected[0].code, 550);
        assert!(!delivery.is_complete());
        assert_eq!(session.state(), SessionState::Extended);
    }

    #[tokio::test]
    async fn test_all_recipients_rejected() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        builder
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"550 No such user\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n");
        let mut session = open(builder.build(), config()).await;

        let err = session
            .send_envelope(&addr("a@example.com"), &[addr("b@example.com")], &b""[..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRecipientsRejected(ref r) if r.len() == 1));
        assert_eq!(session.state(), SessionState::Extended);
    }

    #[tokio::test]
    async fn test_mail_from_rejected_then_next_send_works() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        builder
            .write(b"MAIL FROM:<spam@example.com>\r\n")
            .read(b"553 Sender refused\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n")
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(b"hi\r\n.\r\n")
            .read(b"250 Queued\r\n");
        let mut session = open(builder.build(), config()).await;

        let err = session
            .send_envelope(&addr("spam@example.com"), &[addr("b@example.com")], &b"hi"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol { ref command, code: 553, .. }
                if command == "MAIL FROM:<spam@example.com>"
        ));

        let delivery = session
            .send_envelope(&addr("a@example.com"), &[addr("b@example.com")], &b"hi"[..])
            .await
            .unwrap();
        assert_eq!(delivery.accepted_count(), 1);
    }

    #[tokio::test]
    async fn test_pipelined_envelope() {
        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250 PIPELINING\r\n",
        );
        builder
            .write(
                b"MAIL FROM:<a@example.com>\r\n\
RCPT TO:<b@example.com>\r\n\
RCPT TO:<c@example.com>\r\n\
DATA\r\n",
            )
            .read(b"250 OK\r\n250 OK\r\n550 Unknown\r\n354 Go ahead\r\n")
            .write(b"body\r\n.\r\n")
            .read(b"250 Queued\r\n");
        let mut session = open(builder.build(), config()).await;

        let delivery = session
            .send_envelope(
                &addr("a@example.com"),
                &[addr("b@example.com"), addr("c@example.com")],
                &b"body\r\n"[..],
            )
            .await
            .unwrap();
        assert_eq!(delivery.accepted, vec![addr("b@example.com")]);
        assert_eq!(delivery.rejected[0].address, "c@example.com");
    }

    #[tokio::test]
    async fn test_pipelined_all_rejected_with_354() {
        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250 PIPELINING\r\n",
        );
        builder
            .write(b"MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .read(b"250 OK\r\n550 Unknown\r\n354 Go ahead\r\n")
            .write(b".\r\n")
            .read(b"554 No valid recipients\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n");
        let mut session = open(builder.build(), config()).await;

        let err = session
            .send_envelope(&addr("a@example.com"), &[addr("b@example.com")], &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRecipientsRejected(_)));
    }

    #[tokio::test]
    async fn test_send_message_with_size_and_8bitmime() {
        let message = Message::new()
            .header("Date", "Mon, 1 Jan 2024 00:00:00 +0000")
            .subject("Hi")
            .text_body("Grüße")
            .with_transfer_encoding(postwire_mime::TransferEncoding::EightBit);
        let wire = message.to_bytes().unwrap();
        let mail = format!(
            "MAIL FROM:<a@example.com> BODY=8BITMIME SIZE={}\r\n",
            wire.len()
        );
        let mut payload = wire.clone();
        payload.extend_from_slice(b".\r\n");

        let mut builder = Builder::new();
        handshake(
            &mut builder,
            b"250-smtp.example.com\r\n250-SIZE 100000\r\n250 8BITMIME\r\n",
        );
        builder
            .write(mail.as_bytes())
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(&payload)
            .read(b"250 Queued\r\n");
        let mut session = open(builder.build(), config()).await;

        let delivery = session
            .send_message(&addr("a@example.com"), &[addr("b@example.com")], &message)
            .await
            .unwrap();
        assert_eq!(delivery.accepted_count(), 1);
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250-smtp.example.com\r\n250 SIZE 10\r\n");
        let mut session = open(builder.build(), config()).await;

        let message = Message::new().subject("big").text_body("x".repeat(100));
        let err = session
            .send_message(&addr("a@example.com"), &[addr("b@example.com")], &message)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { limit: 10, .. }));
        assert_eq!(session.state(), SessionState::Extended);
    }

    #[tokio::test]
    async fn test_encoding_error_sends_nothing() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        let mut session = open(builder.build(), config()).await;

        let message = Message::new().body(vec![0xFF, 0xFE], postwire_mime::Charset::utf8());
        let err = session
            .send_message(&addr("a@example.com"), &[addr("b@example.com")], &message)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(ref e) if e.is_charset_error()));
    }

    #[tokio::test]
    async fn test_connection_drop_closes_session() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        builder.write(b"MAIL FROM:<a@example.com>\r\n");
        let mut session = open(builder.build(), config()).await;

        let err = session
            .send_envelope(&addr("a@example.com"), &[addr("b@example.com")], &b""[..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.noop().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_noop_reset_disconnect() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        builder
            .write(b"NOOP\r\n")
            .read(b"250 OK\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 Bye\r\n");
        let mut session = open(builder.build(), config()).await;

        session.noop().await.unwrap();
        session.reset().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.disconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let mut builder = Builder::new();
        handshake(&mut builder, b"250 smtp.example.com\r\n");
        let mut session = open(builder.build(), config()).await;
        assert!(matches!(
            session
                .send_envelope(&addr("a@example.com"), &[], &b""[..])
                .await
                .unwrap_err(),
            Error::InvalidState(_)
        ));
    }
}
