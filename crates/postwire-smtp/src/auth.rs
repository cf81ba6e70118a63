//! SASL mechanisms for SMTP AUTH (RFC 4954).
//!
//! Implements:
//! - PLAIN (RFC 4616) - credentials in the initial response
//! - LOGIN - username and password answered to two challenges
//! - CRAM-MD5 (RFC 2195) - keyed digest of a server challenge
//! - XOAUTH2 - `OAuth2` bearer token (Google/Microsoft)
//!
//! Each exchange reports rejection as `Ok(false)`; only transport failures
//! are errors, so the caller decides how to recover.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::command::Command;
use crate::connection::{Connection, SmtpBuffer};
use crate::types::{AuthMechanism, Reply, ReplyCode};
use crate::{Error, Result};

type HmacMd5 = Hmac<Md5>;

impl AuthMechanism {
    /// Runs this mechanism's exchange over `buffer`.
    ///
    /// Returns `true` once the server answers 235.
    ///
    /// # Errors
    ///
    /// Returns an error only if the connection fails.
    pub async fn authenticate<S: Connection>(
        self,
        buffer: &mut SmtpBuffer<S>,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        Ok(self.exchange(buffer, username, password).await?.is_none())
    }

    /// Runs the exchange, returning the reply that ended it unsuccessfully.
    pub(crate) async fn exchange<S: Connection>(
        self,
        buffer: &mut SmtpBuffer<S>,
        username: &str,
        password: &str,
    ) -> Result<Option<Reply>> {
        match self {
            Self::Plain => {
                let reply = buffer
                    .command(&Command::Auth {
                        mechanism: self,
                        initial_response: Some(plain_response(username, password)),
                    })
                    .await?;
                Ok(rejection(reply, ReplyCode::AUTH_SUCCESS))
            }
            Self::Login => {
                let reply = buffer.command(&self.start()).await?;
                if reply.code != ReplyCode::AUTH_CONTINUE {
                    return Ok(Some(reply));
                }
                let reply = buffer.command(&respond(username.as_bytes())).await?;
                if reply.code != ReplyCode::AUTH_CONTINUE {
                    return Ok(Some(reply));
                }
                let reply = buffer.command(&respond(password.as_bytes())).await?;
                Ok(rejection(reply, ReplyCode::AUTH_SUCCESS))
            }
            Self::CramMd5 => {
                let reply = buffer.command(&self.start()).await?;
                if reply.code != ReplyCode::AUTH_CONTINUE {
                    return Ok(Some(reply));
                }
                let Ok(challenge) = STANDARD.decode(reply.first_line().trim()) else {
                    // Cancel the exchange (RFC 4954 §4).
                    let reply = buffer.command(&Command::AuthResponse("*".into())).await?;
                    return Ok(Some(reply));
                };
                let response = cram_md5_response(username, password, &challenge)?;
                let reply = buffer.command(&Command::AuthResponse(response)).await?;
                Ok(rejection(reply, ReplyCode::AUTH_SUCCESS))
            }
            Self::XOAuth2 => {
                let reply = buffer
                    .command(&Command::Auth {
                        mechanism: self,
                        initial_response: Some(xoauth2_response(username, password)),
                    })
                    .await?;
                if reply.code == ReplyCode::AUTH_CONTINUE {
                    // The challenge carries a JSON error; an empty line
                    // makes the server send the final failure reply.
                    let reply = buffer.command(&Command::AuthResponse(String::new())).await?;
                    return Ok(Some(reply));
                }
                Ok(rejection(reply, ReplyCode::AUTH_SUCCESS))
            }
        }
    }

    const fn start(self) -> Command {
        Command::Auth {
            mechanism: self,
            initial_response: None,
        }
    }
}

fn rejection(reply: Reply, success: ReplyCode) -> Option<Reply> {
    (reply.code != success).then_some(reply)
}

fn respond(value: &[u8]) -> Command {
    Command::AuthResponse(STANDARD.encode(value))
}

/// Generates the PLAIN initial response: `base64("\0" user "\0" password)`.
///
/// The authorization identity is left empty (same as the user).
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// Generates the CRAM-MD5 response: `base64(user SP hex(hmac_md5(password, challenge)))`.
///
/// # Errors
///
/// Returns an error if the digest cannot be keyed.
pub fn cram_md5_response(username: &str, password: &str, challenge: &[u8]) -> Result<String> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes())
        .map_err(|e| Error::InvalidState(format!("CRAM-MD5 key: {e}")))?;
    mac.update(challenge);
    let digest = mac.finalize().into_bytes();

    let mut line = String::with_capacity(username.len() + 33);
    line.push_str(username);
    line.push(' ');
    for byte in digest {
        let _ = write!(line, "{byte:02x}");
    }
    Ok(STANDARD.encode(line))
}

/// Generates the XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01` (base64 encoded)
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("user={user}\x01auth=Bearer {token}\x01\x01"))
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
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn buffer(mock: tokio_test::io::Mock) -> SmtpBuffer<tokio_test::io::Mock> {
        SmtpBuffer::new(mock, Duration::from_secs(5))
    }

    #[test]
    fn test_plain_response() {
        assert_eq!(plain_response("user", "pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_cram_md5_rfc2195_vector() {
        let response = cram_md5_response(
            "tim",
            "tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        )
        .unwrap();
        assert_eq!(response, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    }

    #[test]
    fn test_xoauth2_response() {
        let decoded = STANDARD
            .decode(xoauth2_response("someone@example.com", "ya29.token"))
            .unwrap();
        assert_eq!(
            decoded,
            b"user=someone@example.com\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[tokio::test]
    async fn test_plain_success() {
        let mock = Builder::new()
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(b"235 2.7.0 Authentication successful\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            AuthMechanism::Plain
                .authenticate(&mut buffer, "user", "pass")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_plain_rejected() {
        let mock = Builder::new()
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(b"535 5.7.8 Bad credentials\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            !AuthMechanism::Plain
                .authenticate(&mut buffer, "user", "pass")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 OK\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            AuthMechanism::Login
                .authenticate(&mut buffer, "user", "pass")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"d3Jvbmc=\r\n")
            .read(b"535 Authentication failed\r\n")
            .build();
        let mut buffer = buffer(mock);
        let failed = AuthMechanism::Login
            .exchange(&mut buffer, "user", "wrong")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.code, ReplyCode::AUTH_FAILED);
    }

    #[tokio::test]
    async fn test_login_not_offered() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"504 Unrecognized mechanism\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            !AuthMechanism::Login
                .authenticate(&mut buffer, "user", "pass")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cram_md5_exchange() {
        let challenge = STANDARD.encode("<1896.697170952@postoffice.reston.mci.net>");
        let greeting = format!("334 {challenge}\r\n");
        let mock = Builder::new()
            .write(b"AUTH CRAM-MD5\r\n")
            .read(greeting.as_bytes())
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"235 Authentication successful\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            AuthMechanism::CramMd5
                .authenticate(&mut buffer, "tim", "tanstaaftanstaaf")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cram_md5_bad_challenge_cancels() {
        let mock = Builder::new()
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"334 !!!not-base64!!!\r\n")
            .write(b"*\r\n")
            .read(b"501 Authentication cancelled\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            !AuthMechanism::CramMd5
                .authenticate(&mut buffer, "tim", "secret")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_xoauth2_error_challenge() {
        let initial = xoauth2_response("user@example.com", "expired");
        let command = format!("AUTH XOAUTH2 {initial}\r\n");
        let mock = Builder::new()
            .write(command.as_bytes())
            .read(b"334 eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"\r\n")
            .read(b"535 5.7.8 Username and Password not accepted\r\n")
            .build();
        let mut buffer = buffer(mock);
        assert!(
            !AuthMechanism::XOAuth2
                .authenticate(&mut buffer, "user@example.com", "expired")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_connection_drop_is_error() {
        let mock = Builder::new().write(b"AUTH LOGIN\r\n").build();
        let mut buffer = buffer(mock);
        assert!(matches!(
            AuthMechanism::Login
                .authenticate(&mut buffer, "user", "pass")
                .await
                .unwrap_err(),
            Error::ConnectionClosed
        ));
    }
}
