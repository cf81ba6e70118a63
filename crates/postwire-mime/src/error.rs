//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A byte that cannot start (or continue) a character in the active charset.
    #[error("Invalid byte 0x{byte:02X} at offset {offset} for charset {charset}")]
    InvalidSequence {
        /// Offset of the offending byte in the input.
        offset: usize,
        /// The offending byte.
        byte: u8,
        /// Charset the input was read with.
        charset: String,
    },

    /// Input ended in the middle of a multi-byte character.
    #[error("Truncated character at offset {offset}: {needed} more byte(s) expected")]
    IncompleteSequence {
        /// Offset where the incomplete character starts.
        offset: usize,
        /// Number of bytes missing.
        needed: usize,
    },

    /// A line exceeds the RFC 5322 limit for unencoded content.
    #[error("Line {line} is {length} octets long (limit 998)")]
    LineTooLong {
        /// One-based line number.
        line: usize,
        /// Length of the line without its CRLF.
        length: usize,
    },

    /// 7bit content contains 8-bit or NUL bytes.
    #[error("Byte 0x{byte:02X} at offset {offset} is not allowed in 7bit content")]
    NonAsciiInSevenBit {
        /// Offset of the offending byte.
        offset: usize,
        /// The offending byte.
        byte: u8,
    },

    /// Malformed transfer-encoded input.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Invalid header name or value.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Returns true if the error was raised while segmenting characters.
    #[must_use]
    pub const fn is_charset_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSequence { .. } | Self::IncompleteSequence { .. }
        )
    }
}
