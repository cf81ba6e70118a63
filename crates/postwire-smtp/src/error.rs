//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A recipient refused by `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRejected {
    /// The refused address.
    pub address: String,
    /// Reply code (e.g., 550).
    pub code: u16,
    /// Reply text from the server.
    pub message: String,
}

impl std::fmt::Display for RecipientRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>: {} {}", self.address, self.code, self.message)
    }
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// An exchange did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered a command with an unexpected reply code.
    #[error("{command} failed with {code}: {message}")]
    Protocol {
        /// The command that was rejected, credentials removed.
        command: String,
        /// Reply code (e.g., 554).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Server sent something that is not a valid reply.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Authentication exchange did not reach its success code.
    #[error("{mechanism} authentication failed ({code})")]
    AuthenticationFailed {
        /// Mechanism keyword.
        mechanism: String,
        /// Reply code that ended the exchange.
        code: u16,
    },

    /// Every recipient of a transaction was refused.
    #[error("All {} recipients rejected", .0.len())]
    AllRecipientsRejected(Vec<RecipientRejected>),

    /// Message content could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] postwire_mime::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid server name for TLS.
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    /// Message larger than the server's advertised SIZE.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Advertised limit.
        limit: usize,
    },

    /// Feature not supported by server or transport.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a protocol error for `command` from the rejecting reply.
    #[must_use]
    pub fn protocol(command: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            code,
            message: message.into(),
        }
    }

    /// Returns the reply code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } | Self::AuthenticationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500 && code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 400 && code < 500)
    }

    /// Returns true if the session cannot be used after this error.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ConnectionClosed
                | Self::Tls(_)
                | Self::Timeout(_)
                | Self::MalformedReply(_)
                | Self::AuthenticationFailed { .. }
        )
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
    fn test_classification() {
        let err = Error::protocol("DATA", 554, "Transaction failed");
        assert!(err.is_permanent());
        assert!(!err.is_transient());
        assert!(!err.is_terminal());
        assert_eq!(err.to_string(), "DATA failed with 554: Transaction failed");

        let err = Error::protocol("RCPT TO:<a@example.com>", 451, "Try later");
        assert!(err.is_transient());

        assert!(Error::Timeout(Duration::from_secs(1)).is_terminal());
        assert!(Error::ConnectionClosed.is_terminal());
        assert!(Error::ConnectionClosed.code().is_none());
    }

    #[test]
    fn test_all_rejected_display() {
        let err = Error::AllRecipientsRejected(vec![RecipientRejected {
            address: "a@example.com".into(),
            code: 550,
            message: "No such user".into(),
        }]);
        assert_eq!(err.to_string(), "All 1 recipients rejected");
    }
}
