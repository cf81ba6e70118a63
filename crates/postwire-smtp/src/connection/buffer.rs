//! Line-oriented buffered I/O over a [`Connection`].
//!
//! SMTP speaks CRLF-terminated lines in both directions, except for the
//! message payload after `DATA`, which is written raw. Every read and
//! write runs under the configured timeout.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::stream::{Connection, with_timeout};
use crate::command::Command;
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::Reply;
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum number of lines in one reply.
const MAX_REPLY_LINES: usize = 1000;

/// Buffered SMTP stream.
#[derive(Debug)]
pub struct SmtpBuffer<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    timeout: Duration,
}

impl<S: Connection> SmtpBuffer<S> {
    /// Wraps `stream`, applying `timeout` to each read and write.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            timeout,
        }
    }

    /// Changes the per-operation timeout.
    pub const fn set_read_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns the per-operation timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if the underlying connection is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.reader.get_ref().is_encrypted()
    }

    /// Returns true if bytes have been received but not yet consumed.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Writes `line` followed by CRLF and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(line);
        self.write_buffer.extend_from_slice(b"\r\n");
        self.flush_write_buffer().await
    }

    /// Writes `data` as-is and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.reader.get_mut();
        with_timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    /// Sends one command.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.send_batch(std::slice::from_ref(command)).await
    }

    /// Sends several commands with a single flush.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or timeout.
    pub async fn send_batch(&mut self, commands: &[Command]) -> Result<()> {
        self.write_buffer.clear();
        for command in commands {
            tracing::trace!("C: {}", command.redacted());
            self.write_buffer.extend_from_slice(&command.serialize());
        }
        self.flush_write_buffer().await
    }

    /// Sends a command and reads its reply.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, timeout, or a malformed reply.
    pub async fn command(&mut self, command: &Command) -> Result<Reply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Reads one line without its terminator; `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, timeout, an over-long line, or a
    /// stream that ends mid-line.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let timeout = self.timeout;
        with_timeout(timeout, self.read_line_inner()).await
    }

    async fn read_line_inner(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                )));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..pos]);
                self.reader.consume(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::MalformedReply("line too long".to_string()));
            }
        }
    }

    /// Reads a complete, possibly multi-line, reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the stream ends first, or an
    /// error if the reply is malformed.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?.ok_or(Error::ConnectionClosed)?;
            let line = String::from_utf8_lossy(&line).into_owned();
            tracing::trace!("S: {line}");

            let is_last = is_last_reply_line(&line);
            lines.push(line);
            if is_last {
                break;
            }
            if lines.len() > MAX_REPLY_LINES {
                return Err(Error::MalformedReply("too many reply lines".to_string()));
            }
        }

        parse_reply(&lines)
    }

    /// Switches the connection to TLS.
    ///
    /// Fails if the server sent anything after its STARTTLS reply: such
    /// bytes arrived in plaintext and must not be read as post-TLS replies.
    ///
    /// # Errors
    ///
    /// Returns an error if data is pending, the transport cannot be
    /// upgraded, or the handshake fails or times out.
    pub async fn upgrade_to_encrypted(self, host: &str) -> Result<Self> {
        if self.has_buffered_data() {
            return Err(Error::InvalidState(
                "unexpected data received before TLS handshake".to_string(),
            ));
        }

        let timeout = self.timeout;
        let stream = with_timeout(timeout, self.reader.into_inner().upgrade_to_tls(host)).await?;
        Ok(Self::new(stream, timeout))
    }

    /// Closes the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails or times out.
    pub async fn close(mut self) -> Result<()> {
        let timeout = self.timeout;
        with_timeout(timeout, self.reader.get_mut().close()).await
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    async fn flush_write_buffer(&mut self) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.reader.get_mut();
        let data = &self.write_buffer;
        with_timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
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
    use crate::types::ReplyCode;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_line_across_reads() {
        let mock = Builder::new().read(b"250 O").read(b"K\r").read(b"\n").build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        assert_eq!(buffer.read_line().await.unwrap().unwrap(), b"250 OK");
        assert!(buffer.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_eof_mid_line() {
        let mock = Builder::new().read(b"250 partial").build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        assert!(matches!(
            buffer.read_line().await.unwrap_err(),
            Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_read_multiline_reply() {
        let mock = Builder::new()
            .read(b"250-smtp.example.com\r\n250-SIZE 1000\r\n")
            .read(b"250 HELP\r\n")
            .build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        let reply = buffer.read_reply().await.unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.message, vec!["smtp.example.com", "SIZE 1000", "HELP"]);
    }

    #[tokio::test]
    async fn test_reply_after_eof_is_connection_closed() {
        let mock = Builder::new().build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        assert!(matches!(
            buffer.read_reply().await.unwrap_err(),
            Error::ConnectionClosed
        ));
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let mock = Builder::new()
            .write(b"NOOP\r\n")
            .read(b"250 2.0.0 OK\r\n")
            .build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        let reply = buffer.command(&Command::Noop).await.unwrap();
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn test_send_batch_single_write() {
        let mock = Builder::new().write(b"RSET\r\nNOOP\r\n").build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        buffer
            .send_batch(&[Command::Rset, Command::Noop])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_line_and_raw() {
        let mock = Builder::new().write(b"hello\r\n").write(b"raw.").build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        buffer.write_line(b"hello").await.unwrap();
        buffer.write_raw(b"raw.").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        buffer.set_read_timeout(Duration::from_millis(20));
        assert_eq!(buffer.timeout(), Duration::from_millis(20));
        assert!(matches!(
            buffer.read_line().await.unwrap_err(),
            Error::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_upgrade_refuses_buffered_data() {
        let mock = Builder::new()
            .read(b"220 Go ahead\r\n250 injected\r\n")
            .build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        buffer.read_reply().await.unwrap();
        assert!(buffer.has_buffered_data());

        let err = buffer.upgrade_to_encrypted("smtp.example.com").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let mock = Builder::new().read(b"hello there\r\n").build();
        let mut buffer = SmtpBuffer::new(mock, TIMEOUT);
        assert!(matches!(
            buffer.read_reply().await.unwrap_err(),
            Error::MalformedReply(_)
        ));
    }
}
