//! Integration tests for the SMTP session.
//!
//! These tests use a mock stream to simulate SMTP server replies
//! without requiring a real server connection.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use postwire_mime::Message;
use postwire_smtp::connection::SmtpBuffer;
use postwire_smtp::{
    Address, AuthMechanism, Config, Connection, Error, Security, Session, SessionState,
};

/// Mock stream that returns predefined replies.
#[derive(Debug)]
struct MockStream {
    /// Replies to return (in order).
    replies: Cursor<Vec<u8>>,
    /// Captured bytes sent by the client.
    sent: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    fn new(replies: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            replies: Cursor::new(replies.to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.replies.get_ref();
        let pos = self.replies.position() as usize;

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.replies.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Connection for MockStream {}

fn sent_lines(sent: &Arc<Mutex<Vec<u8>>>) -> Vec<String> {
    String::from_utf8(sent.lock().unwrap().clone())
        .unwrap()
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn config() -> Config {
    Config::builder("smtp.example.com")
        .security(Security::None)
        .local_hostname("client.example.org")
        .credentials("user", "pass")
        .mechanisms([AuthMechanism::Plain, AuthMechanism::Login])
        .io_timeout(Duration::from_secs(5))
        .build()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

const HANDSHAKE: &[u8] = b"220 smtp.example.com ESMTP ready\r\n\
250-smtp.example.com Hello\r\n\
250-AUTH PLAIN LOGIN\r\n\
250 8BITMIME\r\n\
235 2.7.0 Authentication successful\r\n";

#[tokio::test]
async fn test_send_to_one_recipient() {
    init_tracing();
    let mut replies = HANDSHAKE.to_vec();
    replies.extend_from_slice(b"250 OK\r\n250 OK\r\n354 Go ahead\r\n250 Queued as 1234\r\n");
    let (stream, sent) = MockStream::new(&replies);

    let mut session = Session::with_stream(stream, config()).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);

    let delivery = session
        .send_envelope(
            &addr("sender@example.com"),
            &[addr("rcpt@example.org")],
            &b"Subject: Test\r\n\r\nHello\r\n"[..],
        )
        .await
        .unwrap();

    assert_eq!(delivery.accepted_count(), 1);
    assert!(delivery.is_complete());
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(
        sent_lines(&sent),
        vec![
            "EHLO client.example.org",
            "AUTH PLAIN AHVzZXIAcGFzcw==",
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<rcpt@example.org>",
            "DATA",
            "Subject: Test",
            "Hello",
            ".",
        ]
    );
}

#[tokio::test]
async fn test_rejected_data_is_reset() {
    init_tracing();
    let mut replies = HANDSHAKE.to_vec();
    replies.extend_from_slice(
        b"250 OK\r\n250 OK\r\n354 Go ahead\r\n554 5.6.0 Message rejected\r\n250 Flushed\r\n",
    );
    let (stream, sent) = MockStream::new(&replies);

    let mut session = Session::with_stream(stream, config()).await.unwrap();
    let err = session
        .send_envelope(
            &addr("sender@example.com"),
            &[addr("rcpt@example.org")],
            &b"Subject: Test\r\n\r\nHello\r\n"[..],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol { ref command, code: 554, .. } if command == "DATA"
    ));
    assert!(err.is_permanent());
    assert_eq!(sent_lines(&sent).last().unwrap(), "RSET");
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_login_exchange() {
    let (stream, sent) = MockStream::new(b"334 VXNlcm5hbWU6\r\n334 UGFzc3dvcmQ6\r\n235 OK\r\n");
    let mut buffer = SmtpBuffer::new(stream, Duration::from_secs(5));

    let ok = AuthMechanism::Login
        .authenticate(&mut buffer, "user", "pass")
        .await
        .unwrap();

    assert!(ok);
    assert_eq!(sent_lines(&sent), vec!["AUTH LOGIN", "dXNlcg==", "cGFzcw=="]);
}

#[tokio::test]
async fn test_login_failure_issues_rset() {
    let replies = b"220 smtp.example.com ESMTP\r\n\
250-smtp.example.com\r\n\
250 AUTH LOGIN\r\n\
334 VXNlcm5hbWU6\r\n\
334 UGFzc3dvcmQ6\r\n\
535 5.7.8 Authentication failed\r\n\
250 OK\r\n";
    let (stream, sent) = MockStream::new(replies);

    let err = Session::with_stream(stream, config()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::AuthenticationFailed { ref mechanism, code: 535 } if mechanism == "LOGIN"
    ));
    assert_eq!(
        sent_lines(&sent),
        vec![
            "EHLO client.example.org",
            "AUTH LOGIN",
            "dXNlcg==",
            "cGFzcw==",
            "RSET",
        ]
    );
}

#[tokio::test]
async fn test_session_reuse_after_partial_rejection() {
    let mut replies = HANDSHAKE.to_vec();
    replies.extend_from_slice(
        b"250 OK\r\n550 5.1.1 No such user\r\n250 OK\r\n354 Go\r\n250 Queued\r\n\
250 OK\r\n250 OK\r\n354 Go\r\n250 Queued\r\n\
221 Bye\r\n",
    );
    let (stream, sent) = MockStream::new(&replies);
    let mut session = Session::with_stream(stream, config()).await.unwrap();

    let first = session
        .send_envelope(
            &addr("sender@example.com"),
            &[addr("ghost@example.org"), addr("rcpt@example.org")],
            &b"one"[..],
        )
        .await
        .unwrap();
    assert_eq!(first.accepted, vec![addr("rcpt@example.org")]);
    assert_eq!(first.rejected[0].address, "ghost@example.org");
    assert_eq!(first.rejected[0].code, 550);

    let second = session
        .send_envelope(&Address::null(), &[addr("rcpt@example.org")], &b"two"[..])
        .await
        .unwrap();
    assert!(second.is_complete());

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    let lines = sent_lines(&sent);
    assert!(lines.contains(&"MAIL FROM:<>".to_string()));
    assert_eq!(lines.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_send_message_dot_stuffs_body() {
    let mut replies = HANDSHAKE.to_vec();
    replies.extend_from_slice(b"250 OK\r\n250 OK\r\n354 Go ahead\r\n250 Queued\r\n");
    let (stream, sent) = MockStream::new(&replies);
    let mut session = Session::with_stream(stream, config()).await.unwrap();

    let message = Message::new()
        .from("sender@example.com")
        .to("rcpt@example.org")
        .subject("Dots")
        .text_body("first\n.second\n");

    session
        .send_message(&addr("sender@example.com"), &[addr("rcpt@example.org")], &message)
        .await
        .unwrap();

    let lines = sent_lines(&sent);
    assert!(lines.contains(&"..second".to_string()));
    assert!(lines.contains(&"Content-Transfer-Encoding: quoted-printable".to_string()));
    assert_eq!(lines.last().unwrap(), ".");
}

#[tokio::test]
async fn test_server_hangs_up_mid_transaction() {
    let mut replies = HANDSHAKE.to_vec();
    replies.extend_from_slice(b"250 OK\r\n");
    let (stream, _sent) = MockStream::new(&replies);
    let mut session = Session::with_stream(stream, config()).await.unwrap();

    let err = session
        .send_envelope(&addr("sender@example.com"), &[addr("rcpt@example.org")], &b"x"[..])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConnectionClosed));
    assert!(err.is_terminal());
    assert_eq!(session.state(), SessionState::Closed);
}
