//! MIME transfer encoders and their inverse decoders.
//!
//! Encoders take raw bytes in a declared charset and produce output folded
//! to a maximum line length. Lines are separated by CRLF; the final line is
//! not terminated, so callers decide how the encoded block ends.

mod base64;
mod plain;
mod quoted_printable;

pub use self::base64::Base64Encoder;
pub use plain::PlainEncoder;
pub use quoted_printable::QuotedPrintableEncoder;

use crate::charset::Charset;
use crate::error::{Error, Result};
use ::base64::Engine;
use ::base64::engine::general_purpose::STANDARD;
use std::fmt;

/// Default maximum encoded line length (RFC 2045 §6.7).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 76;

/// Smallest line length an encoder will fold to.
///
/// Large enough for the widest character (six UTF-8 bytes, `=XX` each)
/// plus a soft line break.
pub const MIN_LINE_LENGTH: usize = 20;

/// A content-transfer-encoding.
pub trait Encoder {
    /// Encodes `input` (text in `charset`), assuming the first output line
    /// already holds `first_line_offset` characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid in `charset`, or violates
    /// the constraints of the encoding.
    fn encode(&self, input: &[u8], charset: &Charset, first_line_offset: usize)
    -> Result<Vec<u8>>;
}

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    #[default]
    QuotedPrintable,
    /// Binary (no encoding, no line checks).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Returns true if the encoded output may contain 8-bit bytes.
    #[must_use]
    pub const fn is_eight_bit(self) -> bool {
        matches!(self, Self::EightBit | Self::Binary)
    }

    /// Encodes `input` with this transfer encoding.
    ///
    /// # Errors
    ///
    /// See [`Encoder::encode`].
    pub fn encode(
        self,
        input: &[u8],
        charset: &Charset,
        max_line_length: usize,
    ) -> Result<Vec<u8>> {
        match self {
            Self::QuotedPrintable => QuotedPrintableEncoder::new()
                .with_max_line_length(max_line_length)
                .encode(input, charset, 0),
            Self::Base64 => Base64Encoder::new()
                .with_max_line_length(max_line_length)
                .encode(input, charset, 0),
            Self::SevenBit => PlainEncoder::seven_bit().encode(input, charset, 0),
            Self::EightBit => PlainEncoder::eight_bit().encode(input, charset, 0),
            Self::Binary => Ok(input.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Decodes Base64 data, ignoring embedded line breaks and whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable text (RFC 2045), removing soft line breaks.
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1..i + 3) {
            Some(b"\r\n") => i += 3,
            _ if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            Some(&[hi, lo]) => {
                let byte = hex_value(hi)
                    .zip(hex_value(lo))
                    .map(|(hi, lo)| (hi << 4) | lo)
                    .ok_or_else(|| {
                        Error::InvalidEncoding(format!(
                            "Invalid hex escape at offset {i}: ={}{}",
                            char::from(hi),
                            char::from(lo)
                        ))
                    })?;
                result.push(byte);
                i += 3;
            }
            _ => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(result)
}

/// Decodes RFC 2047 "Q" encoded text (underscore stands for space).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_q(text: &str) -> Result<Vec<u8>> {
    decode_quoted_printable(&text.replace('_', " "))
}

/// Decodes every RFC 2047 encoded-word in a header value.
///
/// Whitespace between adjacent encoded-words is dropped (RFC 2047 §6.2).
/// The declared charset is interpreted with `encoding_rs`; unknown charsets
/// are read as UTF-8.
///
/// # Errors
///
/// Returns an error if an encoded-word has an unknown encoding or an
/// undecodable payload.
pub fn decode_encoded_words(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = parse_encoded_word(candidate)? {
            if !(after_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Parses one `=?charset?enc?text?=` token at the start of `s`.
///
/// Returns `None` if `s` does not start with a well-formed encoded-word.
fn parse_encoded_word(s: &str) -> Result<Option<(String, usize)>> {
    let Some(inner) = s.strip_prefix("=?") else {
        return Ok(None);
    };
    let Some(charset_end) = inner.find('?') else {
        return Ok(None);
    };
    let charset = &inner[..charset_end];
    let after = &inner[charset_end + 1..];
    let after_bytes = after.as_bytes();
    if charset.is_empty()
        || charset.contains(char::is_whitespace)
        || after_bytes.len() < 2
        || !after_bytes[0].is_ascii()
        || after_bytes[1] != b'?'
    {
        return Ok(None);
    }

    let payload_region = &after[2..];
    let Some(end) = payload_region.find("?=") else {
        return Ok(None);
    };
    let payload = &payload_region[..end];
    if payload.contains(char::is_whitespace) {
        return Ok(None);
    }

    let bytes = match after_bytes[0].to_ascii_uppercase() {
        b'B' => decode_base64(payload)?,
        b'Q' => decode_q(payload)?,
        other => {
            return Err(Error::InvalidEncoding(format!(
                "Unknown encoded-word encoding: {}",
                char::from(other)
            )));
        }
    };

    // RFC 2231 allows a language suffix: charset*lang
    let label = charset.split('*').next().unwrap_or(charset);
    let encoding =
        encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
    let (decoded, _) = encoding.decode_without_bom_handling(&bytes);

    let consumed = 2 + charset_end + 1 + 2 + end + 2;
    Ok(Some((decoded.into_owned(), consumed)))
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
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
    fn test_transfer_encoding_parse_display() {
        assert_eq!(
            TransferEncoding::parse("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::EightBit.to_string(), "8bit");
        assert!(TransferEncoding::EightBit.is_eight_bit());
        assert!(!TransferEncoding::Base64.is_eight_bit());
    }

    #[test]
    fn test_base64_decode_ignores_line_breaks() {
        let decoded = decode_base64("SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable("Hello").unwrap(), b"Hello");
        assert_eq!(
            decode_quoted_printable("H=C3=A9llo").unwrap(),
            "Héllo".as_bytes()
        );
        assert_eq!(decode_quoted_printable("h=c3=a9").unwrap(), "hé".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(
            decode_quoted_printable("Hello=\r\nWorld").unwrap(),
            b"HelloWorld"
        );
        assert_eq!(
            decode_quoted_printable("Hello=\nWorld").unwrap(),
            b"HelloWorld"
        );
    }

    #[test]
    fn test_quoted_printable_decode_errors() {
        assert!(decode_quoted_printable("bad=G1").is_err());
        assert!(decode_quoted_printable("cut=4").is_err());
        assert!(decode_quoted_printable("cut=").is_err());
    }

    #[test]
    fn test_decode_q_underscore() {
        assert_eq!(decode_q("a_b=5F").unwrap(), b"a b_");
    }

    #[test]
    fn test_decode_encoded_words() {
        assert_eq!(decode_encoded_words("Hello").unwrap(), "Hello");
        assert_eq!(
            decode_encoded_words("=?utf-8?B?SMOpbGxv?=").unwrap(),
            "Héllo"
        );
        assert_eq!(
            decode_encoded_words("=?UTF-8?Q?H=C3=A9llo_world?=").unwrap(),
            "Héllo world"
        );
    }

    #[test]
    fn test_decode_adjacent_words_drop_whitespace() {
        let value = "=?utf-8?Q?Caf=C3=A9?=\r\n =?utf-8?Q?_au_lait?= tonight";
        assert_eq!(decode_encoded_words(value).unwrap(), "Café au lait tonight");
    }

    #[test]
    fn test_decode_latin1_word() {
        assert_eq!(
            decode_encoded_words("=?iso-8859-1?Q?caf=E9?=").unwrap(),
            "café"
        );
    }

    #[test]
    fn test_decode_not_an_encoded_word() {
        assert_eq!(decode_encoded_words("a =? b").unwrap(), "a =? b");
        assert_eq!(decode_encoded_words("=?x?=").unwrap(), "=?x?=");
    }

    #[test]
    fn test_decode_unknown_encoding() {
        assert!(decode_encoded_words("=?utf-8?X?abc?=").is_err());
    }
}
