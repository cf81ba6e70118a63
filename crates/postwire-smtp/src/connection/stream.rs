//! Transports an SMTP session can run over.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::{Config, Endpoint, Security};
use crate::{Error, Result};

/// Byte channel carrying an SMTP session.
///
/// Everything the session engine needs from a transport: ordered reads and
/// writes, an optional in-place TLS upgrade, and an orderly close.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + Sized {
    /// Performs a TLS handshake over this channel.
    fn upgrade_to_tls(self, host: &str) -> impl Future<Output = Result<Self>> + Send {
        let _ = host;
        async { Err(Error::NotSupported("TLS upgrade on this transport".into())) }
    }

    /// Returns true if traffic is encrypted.
    fn is_encrypted(&self) -> bool {
        false
    }

    /// Shuts the channel down.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send {
        async move { self.shutdown().await.map_err(Error::from) }
    }
}

/// Pipes to a local MTA speaking SMTP on stdin/stdout.
#[derive(Debug)]
pub struct ProcessPipe {
    child: Child,
    /// Taken on close so the child sees end of input.
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ProcessPipe {
    /// Spawns `program` with piped stdin/stdout.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(Error::ConnectionClosed)?;
        let stdout = child.stdout.take().ok_or(Error::ConnectionClosed)?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
        })
    }
}

/// A transport that can be plaintext TCP, TLS, or a local process.
#[derive(Debug)]
pub enum Transport {
    /// Plaintext TCP stream.
    Tcp(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
    /// Local process.
    Process(Box<ProcessPipe>),
}

impl Transport {
    /// Opens the transport described by `config`.
    ///
    /// Implicit TLS is negotiated here; STARTTLS is left to the session.
    pub async fn open(config: &Config) -> Result<Self> {
        match &config.endpoint {
            Endpoint::Tcp { host, port } => {
                let tcp = with_timeout(config.connect_timeout, async {
                    Ok(TcpStream::connect((host.as_str(), *port)).await?)
                })
                .await?;
                tcp.set_nodelay(true)?;

                if config.security == Security::Implicit {
                    let tls = with_timeout(config.connect_timeout, tls_handshake(tcp, host)).await?;
                    Ok(Self::Tls(Box::new(tls)))
                } else {
                    Ok(Self::Tcp(tcp))
                }
            }
            Endpoint::Process { program, args } => {
                if config.security == Security::Implicit {
                    return Err(Error::NotSupported("TLS over a process pipe".into()));
                }
                Ok(Self::Process(Box::new(ProcessPipe::spawn(program, args)?)))
            }
        }
    }
}

impl Connection for Transport {
    async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Tcp(tcp) => Ok(Self::Tls(Box::new(tls_handshake(tcp, host).await?))),
            Self::Tls(_) => Err(Error::InvalidState("stream is already TLS".to_string())),
            Self::Process(_) => Err(Error::NotSupported("TLS over a process pipe".into())),
        }
    }

    fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown().await?,
            Self::Tls(stream) => stream.shutdown().await?,
            Self::Process(pipe) => {
                if let Some(mut stdin) = pipe.stdin.take() {
                    stdin.flush().await?;
                }
                pipe.child.wait().await?;
            }
        }
        Ok(())
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Process(pipe) => Pin::new(&mut pipe.stdout).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Process(pipe) => match pipe.stdin.as_mut() {
                Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
                None => Poll::Ready(Err(stdin_closed())),
            },
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
            Self::Process(pipe) => pipe
                .stdin
                .as_mut()
                .map_or(Poll::Ready(Ok(())), |stdin| Pin::new(stdin).poll_flush(cx)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Process(pipe) => {
                drop(pipe.stdin.take());
                Poll::Ready(Ok(()))
            }
        }
    }
}

fn stdin_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "process stdin is closed")
}

/// Creates a TLS connector with the webpki root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

async fn tls_handshake(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::InvalidHostname(host.to_string()))?;
    Ok(create_tls_connector().connect(server_name, tcp).await?)
}

/// Runs `future`, failing with [`Error::Timeout`] once `duration` elapses.
pub(crate) async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout(duration))?
}

#[cfg(test)]
impl Connection for tokio_test::io::Mock {}

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

    #[tokio::test]
    async fn test_mock_cannot_upgrade() {
        let mock = tokio_test::io::Builder::new().build();
        assert!(!mock.is_encrypted());
        let err = mock.upgrade_to_tls("smtp.example.com").await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let err = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_process_transport_round_trip() {
        let config = Config::builder_process("cat", Vec::new()).build();
        let mut transport = Transport::open(&config).await.unwrap();
        assert!(!transport.is_encrypted());

        transport.write_all(b"220 echo\r\n").await.unwrap();
        transport.flush().await.unwrap();
        let mut buf = [0u8; 10];
        tokio::io::AsyncReadExt::read_exact(&mut transport, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"220 echo\r\n");

        tokio::time::timeout(Duration::from_secs(5), transport.close())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_process_close_ends_child_input() {
        let config = Config::builder_process("cat", Vec::new()).build();
        let transport = Transport::open(&config).await.unwrap();
        let buffer = crate::connection::SmtpBuffer::new(transport, Duration::from_secs(5));

        let started = std::time::Instant::now();
        buffer.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_process_write_after_close_fails() {
        let config = Config::builder_process("cat", Vec::new()).build();
        let mut transport = Transport::open(&config).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.write_all(b"NOOP\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_process_rejects_implicit_tls() {
        let config = Config::builder_process("cat", Vec::new())
            .security(Security::Implicit)
            .build();
        assert!(matches!(
            Transport::open(&config).await.unwrap_err(),
            Error::NotSupported(_)
        ));
    }

    #[test]
    fn test_tls_connector_builds() {
        let _connector = create_tls_connector();
    }
}
