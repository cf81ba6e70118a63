//! 7bit and 8bit passthrough encodings.

use super::Encoder;
use crate::charset::Charset;
use crate::error::{Error, Result};

/// Longest line allowed in unencoded content, excluding CRLF (RFC 5322 §2.1.1).
const MAX_UNENCODED_LINE: usize = 998;

/// Passes content through unchanged after checking it is legal as-is.
#[derive(Debug, Clone, Copy)]
pub struct PlainEncoder {
    eight_bit: bool,
}

impl PlainEncoder {
    /// Encoder for `7bit` content: ASCII only, no NUL.
    #[must_use]
    pub const fn seven_bit() -> Self {
        Self { eight_bit: false }
    }

    /// Encoder for `8bit` content.
    #[must_use]
    pub const fn eight_bit() -> Self {
        Self { eight_bit: true }
    }

    fn check(&self, input: &[u8]) -> Result<()> {
        if !self.eight_bit
            && let Some(offset) = input.iter().position(|&b| b == 0 || b >= 0x80)
        {
            return Err(Error::NonAsciiInSevenBit {
                offset,
                byte: input[offset],
            });
        }

        for (index, line) in input.split(|&b| b == b'\n').enumerate() {
            let length = line.strip_suffix(b"\r").unwrap_or(line).len();
            if length > MAX_UNENCODED_LINE {
                return Err(Error::LineTooLong {
                    line: index + 1,
                    length,
                });
            }
        }

        Ok(())
    }
}

impl Encoder for PlainEncoder {
    fn encode(
        &self,
        input: &[u8],
        charset: &Charset,
        _first_line_offset: usize,
    ) -> Result<Vec<u8>> {
        self.check(input)?;
        if self.eight_bit {
            // 8bit text must still be well-formed in its declared charset.
            crate::stream::CharacterStream::new(input, charset)
                .try_for_each(|c| c.map(drop))?;
        }
        Ok(input.to_vec())
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
    fn test_seven_bit_passthrough() {
        let out = PlainEncoder::seven_bit()
            .encode(b"Hello\r\nWorld", &Charset::us_ascii(), 0)
            .unwrap();
        assert_eq!(out, b"Hello\r\nWorld");
    }

    #[test]
    fn test_seven_bit_rejects_high_bytes() {
        let err = PlainEncoder::seven_bit()
            .encode("Héllo".as_bytes(), &Charset::utf8(), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NonAsciiInSevenBit {
                offset: 1,
                byte: 0xC3
            }
        ));
    }

    #[test]
    fn test_eight_bit_validates_charset() {
        assert!(
            PlainEncoder::eight_bit()
                .encode("Héllo".as_bytes(), &Charset::utf8(), 0)
                .is_ok()
        );
        let err = PlainEncoder::eight_bit()
            .encode(&[0xFF], &Charset::utf8(), 0)
            .unwrap_err();
        assert!(err.is_charset_error());
    }

    #[test]
    fn test_line_too_long() {
        let mut input = b"short\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'a', 999));
        let err = PlainEncoder::eight_bit()
            .encode(&input, &Charset::utf8(), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LineTooLong {
                line: 2,
                length: 999
            }
        ));
    }
}
