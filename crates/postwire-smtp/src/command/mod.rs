//! SMTP command builder.

use crate::types::{Address, AuthMechanism};
use std::fmt::Write as _;

/// `BODY` parameter of `MAIL FROM` (RFC 6152).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    /// 7-bit content.
    SevenBit,
    /// 8-bit MIME content.
    EightBitMime,
}

impl BodyType {
    /// Returns the parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7BIT",
            Self::EightBitMime => "8BITMIME",
        }
    }
}

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// A line answering a 334 challenge.
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
        /// BODY parameter
        body: Option<BodyType>,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.render(false).into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command line with credentials replaced, for logs and errors.
    #[must_use]
    pub fn redacted(&self) -> String {
        self.render(true)
    }

    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } | Self::AuthResponse(_) => "AUTH",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }

    fn render(&self, redact: bool) -> String {
        match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(_) if redact => format!("AUTH {mechanism} <redacted>"),
                Some(response) => format!("AUTH {mechanism} {response}"),
                None => format!("AUTH {mechanism}"),
            },
            Self::AuthResponse(_) if redact => "<redacted>".to_string(),
            Self::AuthResponse(response) => response.clone(),
            Self::MailFrom { from, body, size } => {
                let mut line = format!("MAIL FROM:<{from}>");
                if let Some(body) = body {
                    line.push_str(" BODY=");
                    line.push_str(body.as_str());
                }
                if let Some(size) = size {
                    let _ = write!(line, " SIZE={size}");
                }
                line
            }
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::StartTls | Self::Data | Self::Rset | Self::Noop | Self::Quit => {
                self.verb().to_string()
            }
        }
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

    #[test]
    fn test_greetings() {
        let ehlo = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(ehlo.serialize(), b"EHLO client.example.com\r\n");

        let helo = Command::Helo {
            hostname: "[127.0.0.1]".to_string(),
        };
        assert_eq!(helo.serialize(), b"HELO [127.0.0.1]\r\n");
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Rset.serialize(), b"RSET\r\n");
        assert_eq!(Command::Noop.serialize(), b"NOOP\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.redacted(), "AUTH PLAIN <redacted>");
    }

    #[test]
    fn test_auth_without_initial_response() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTH LOGIN\r\n");
        assert_eq!(cmd.redacted(), "AUTH LOGIN");
    }

    #[test]
    fn test_auth_response_redacted() {
        let cmd = Command::AuthResponse("c2VjcmV0".to_string());
        assert_eq!(cmd.serialize(), b"c2VjcmV0\r\n");
        assert_eq!(cmd.redacted(), "<redacted>");
    }

    #[test]
    fn test_mail_from() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            body: None,
            size: None,
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<sender@example.com>\r\n");
    }

    #[test]
    fn test_mail_from_with_params() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
            body: Some(BodyType::EightBitMime),
            size: Some(12345),
        };
        assert_eq!(
            cmd.serialize(),
            b"MAIL FROM:<sender@example.com> BODY=8BITMIME SIZE=12345\r\n"
        );
    }

    #[test]
    fn test_null_reverse_path() {
        let cmd = Command::MailFrom {
            from: Address::null(),
            body: None,
            size: None,
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<>\r\n");
    }

    #[test]
    fn test_rcpt_to() {
        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
        assert_eq!(cmd.verb(), "RCPT");
    }
}
