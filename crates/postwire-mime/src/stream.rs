//! Character segmentation over raw bytes.

use crate::charset::{CharacterReader, Charset, Validation};
use crate::error::{Error, Result};

/// Yields one complete character (as its raw bytes) at a time.
///
/// The stream never emits a partial character: each item is either a
/// complete character or an [`Error`] describing the offending bytes,
/// after which the stream is exhausted.
#[derive(Debug, Clone)]
pub struct CharacterStream<'a> {
    bytes: &'a [u8],
    position: usize,
    reader: CharacterReader,
    charset: &'a str,
    failed: bool,
}

impl<'a> CharacterStream<'a> {
    /// Creates a stream over `bytes` using the reader for `charset`.
    #[must_use]
    pub fn new(bytes: &'a [u8], charset: &'a Charset) -> Self {
        Self {
            bytes,
            position: 0,
            reader: charset.reader(),
            charset: charset.name(),
            failed: false,
        }
    }

    /// Returns the byte offset of the next character.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Restarts the stream at a byte offset.
    ///
    /// The offset must be a character boundary; otherwise the next item
    /// reports an encoding error.
    pub fn seek(&mut self, offset: usize) {
        self.position = offset.min(self.bytes.len());
        self.failed = false;
    }

    /// Returns the unread bytes.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.position..]
    }

    /// Collects every character, failing on the first invalid sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid in the stream's charset.
    pub fn collect_chars(self) -> Result<Vec<&'a [u8]>> {
        self.collect()
    }

    fn read_char(&mut self) -> Result<&'a [u8]> {
        let start = self.position;
        let rest = &self.bytes[start..];
        let mut len = 1;

        loop {
            let window = &rest[..len.min(rest.len())];
            match self.reader.validate(window) {
                Validation::Complete(width) => {
                    self.position = start + width;
                    return Ok(&rest[..width]);
                }
                Validation::Invalid => {
                    let offset = start + window.len() - 1;
                    return Err(Error::InvalidSequence {
                        offset,
                        byte: self.bytes[offset],
                        charset: self.charset.to_string(),
                    });
                }
                Validation::NeedMoreBytes(needed) => {
                    if len >= rest.len() {
                        return Err(Error::IncompleteSequence {
                            offset: start,
                            needed,
                        });
                    }
                    len += 1;
                }
            }
        }
    }
}

impl<'a> Iterator for CharacterStream<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.bytes.len() {
            return None;
        }

        let result = self.read_char();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
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
    use proptest::prelude::*;

    #[test]
    fn test_ascii_characters() {
        let charset = Charset::us_ascii();
        let chars = CharacterStream::new(b"abc", &charset)
            .collect_chars()
            .unwrap();
        assert_eq!(chars, vec![&b"a"[..], b"b", b"c"]);
    }

    #[test]
    fn test_utf8_multibyte_not_split() {
        let charset = Charset::utf8();
        let text = "aé€𝄞";
        let chars = CharacterStream::new(text.as_bytes(), &charset)
            .collect_chars()
            .unwrap();
        let widths: Vec<usize> = chars.iter().map(|c| c.len()).collect();
        assert_eq!(widths, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_leading_byte_is_error() {
        let charset = Charset::utf8();
        let mut stream = CharacterStream::new(&[b'a', 0xFF, b'b'], &charset);
        assert_eq!(stream.next().unwrap().unwrap(), b"a");

        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSequence {
                offset: 1,
                byte: 0xFF,
                ..
            }
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_invalid_continuation_reports_offending_byte() {
        let charset = Charset::utf8();
        let err = CharacterStream::new(&[0xE2, 0x82, 0x41], &charset)
            .collect_chars()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSequence {
                offset: 2,
                byte: 0x41,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_tail_is_error() {
        let charset = Charset::utf8();
        let err = CharacterStream::new(&[b'a', 0xE2, 0x82], &charset)
            .collect_chars()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IncompleteSequence {
                offset: 1,
                needed: 1
            }
        ));
    }

    #[test]
    fn test_utf16_pairs() {
        let charset = Charset::new("UTF-16BE");
        let chars = CharacterStream::new(&[0x00, 0x41, 0x00, 0x42], &charset)
            .collect_chars()
            .unwrap();
        assert_eq!(chars, vec![&[0x00, 0x41][..], &[0x00, 0x42][..]]);

        let err = CharacterStream::new(&[0x00, 0x41, 0x00], &charset)
            .collect_chars()
            .unwrap_err();
        assert!(err.is_charset_error());
    }

    #[test]
    fn test_seek_restarts() {
        let charset = Charset::utf8();
        let text = "héllo";
        let mut stream = CharacterStream::new(text.as_bytes(), &charset);
        stream.next();
        stream.next();
        assert_eq!(stream.position(), 3);

        stream.seek(1);
        assert_eq!(stream.next().unwrap().unwrap(), "é".as_bytes());
        assert_eq!(stream.remaining(), b"llo");
    }

    #[test]
    fn test_empty_input() {
        let charset = Charset::utf8();
        assert!(CharacterStream::new(b"", &charset).next().is_none());
    }

    proptest! {
        #[test]
        fn utf8_stream_reassembles_input(text in "\\PC*") {
            let charset = Charset::utf8();
            let chars = CharacterStream::new(text.as_bytes(), &charset)
                .collect_chars()
                .unwrap();
            prop_assert_eq!(chars.len(), text.chars().count());
            prop_assert_eq!(chars.concat(), text.as_bytes().to_vec());
        }
    }
}
