//! Base64 content-transfer-encoding with quantum-aligned folding.

use super::{DEFAULT_MAX_LINE_LENGTH, Encoder, MIN_LINE_LENGTH};
use crate::charset::Charset;
use crate::error::Result;
use ::base64::Engine;
use ::base64::engine::general_purpose::STANDARD;

/// Base64 encoder.
///
/// Output lines always hold a whole number of 4-character quanta, so a
/// quantum is never split across a line break.
#[derive(Debug, Clone, Copy)]
pub struct Base64Encoder {
    max_line_length: usize,
}

impl Default for Base64Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Base64Encoder {
    /// Creates an encoder folding at 76 characters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Sets the maximum output line length.
    #[must_use]
    pub const fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = if max_line_length < MIN_LINE_LENGTH {
            MIN_LINE_LENGTH
        } else {
            max_line_length
        };
        self
    }

    /// Returns the number of encoded characters produced for `len` input bytes.
    #[must_use]
    pub const fn encoded_len(len: usize) -> usize {
        len.div_ceil(3) * 4
    }

    /// Encodes bytes, folding at the configured line length.
    ///
    /// If the first line has no room for a single quantum the output starts
    /// with a line break.
    #[must_use]
    pub fn encode_str(&self, input: &[u8], first_line_offset: usize) -> String {
        let encoded = STANDARD.encode(input);
        let full_line = self.max_line_length / 4 * 4;
        let first_line = self.max_line_length.saturating_sub(first_line_offset) / 4 * 4;

        let mut out = String::with_capacity(encoded.len() + encoded.len() / full_line * 2 + 2);
        let mut rest = encoded.as_str();

        if first_line == 0 && !rest.is_empty() {
            out.push_str("\r\n");
        } else {
            let (head, tail) = rest.split_at(first_line.min(rest.len()));
            out.push_str(head);
            rest = tail;
        }

        while !rest.is_empty() {
            let (line, tail) = rest.split_at(full_line.min(rest.len()));
            if !out.is_empty() && !out.ends_with("\r\n") {
                out.push_str("\r\n");
            }
            out.push_str(line);
            rest = tail;
        }

        out
    }
}

impl Encoder for Base64Encoder {
    fn encode(
        &self,
        input: &[u8],
        _charset: &Charset,
        first_line_offset: usize,
    ) -> Result<Vec<u8>> {
        Ok(self.encode_str(input, first_line_offset).into_bytes())
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
    use crate::encoding::decode_base64;
    use proptest::prelude::*;

    #[test]
    fn test_known_value() {
        assert_eq!(
            Base64Encoder::new().encode_str(b"Hello, World!", 0),
            "SGVsbG8sIFdvcmxkIQ=="
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(Base64Encoder::new().encode_str(b"", 0), "");
        assert_eq!(Base64Encoder::new().encode_str(b"", 80), "");
    }

    #[test]
    fn test_folds_at_76() {
        let encoded = Base64Encoder::new().encode_str(&[0u8; 120], 0);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 76);
        assert_eq!(lines[2].len(), 8);
    }

    #[test]
    fn test_first_line_offset_rounds_to_quantum() {
        let encoded = Base64Encoder::new().encode_str(&[0xAB; 30], 10);
        let first = encoded.split("\r\n").next().unwrap();
        assert_eq!(first.len(), 40);
    }

    #[test]
    fn test_no_room_on_first_line() {
        let encoded = Base64Encoder::new().encode_str(b"abc", 75);
        assert_eq!(encoded, "\r\nYWJj");
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Base64Encoder::encoded_len(0), 0);
        assert_eq!(Base64Encoder::encoded_len(1), 4);
        assert_eq!(Base64Encoder::encoded_len(3), 4);
        assert_eq!(Base64Encoder::encoded_len(4), 8);
    }

    proptest! {
        #[test]
        fn round_trip(bytes in prop::collection::vec(any::<u8>(), 0..600)) {
            let encoded = Base64Encoder::new().encode_str(&bytes, 0);
            prop_assert_eq!(decode_base64(&encoded).unwrap(), bytes);
        }

        #[test]
        fn lines_hold_whole_quanta(
            len in 0usize..700,
            max in 20usize..=100,
            offset in 0usize..60,
        ) {
            let bytes = vec![0x5Au8; len];
            let encoded = Base64Encoder::new()
                .with_max_line_length(max)
                .encode_str(&bytes, offset);
            for (index, line) in encoded.split("\r\n").enumerate() {
                let limit = if index == 0 { max.saturating_sub(offset) } else { max };
                prop_assert!(line.len() <= limit);
                prop_assert_eq!(line.len() % 4, 0);
            }
        }
    }
}
