//! Quoted-Printable body encoding (RFC 2045 §6.7) and the RFC 2047 "Q"
//! variant used inside header encoded-words.

use super::{DEFAULT_MAX_LINE_LENGTH, Encoder, MIN_LINE_LENGTH};
use crate::charset::Charset;
use crate::error::Result;
use crate::stream::CharacterStream;
use std::fmt::Write as _;

/// Quoted-Printable encoder.
///
/// Works one character at a time so that the `=XX` escapes of a multi-byte
/// character always land on the same line.
#[derive(Debug, Clone, Copy)]
pub struct QuotedPrintableEncoder {
    max_line_length: usize,
}

impl Default for QuotedPrintableEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotedPrintableEncoder {
    /// Creates an encoder folding at 76 characters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Sets the maximum output line length, soft break included.
    #[must_use]
    pub const fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = if max_line_length < MIN_LINE_LENGTH {
            MIN_LINE_LENGTH
        } else {
            max_line_length
        };
        self
    }

    /// Returns the configured maximum line length.
    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Encodes text, returning the folded output as a string.
    ///
    /// A CRLF pair in the input is a hard line break and is written through;
    /// a lone CR or LF is escaped. Whitespace before a hard break (or at the
    /// very end) is escaped so transports cannot strip it.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid in `charset`.
    pub fn encode_str(
        &self,
        input: &[u8],
        charset: &Charset,
        first_line_offset: usize,
    ) -> Result<String> {
        let chars = CharacterStream::new(input, charset).collect_chars()?;
        let ascii = charset.family().is_ascii_compatible();
        let is_crlf = |at: usize| {
            ascii && chars.get(at) == Some(&&b"\r"[..]) && chars.get(at + 1) == Some(&&b"\n"[..])
        };

        let mut out = String::with_capacity(input.len() + input.len() / 2);
        let mut line_len = first_line_offset;
        let mut i = 0;

        while i < chars.len() {
            if is_crlf(i) {
                out.push_str("\r\n");
                line_len = 0;
                i += 2;
                continue;
            }

            let at_line_end = i + 1 == chars.len() || is_crlf(i + 1);
            let token = body_token(chars[i], at_line_end);

            // Every line except the last one of a hard-broken segment needs
            // room for the trailing '=' of a soft break.
            let budget = if at_line_end {
                self.max_line_length
            } else {
                self.max_line_length - 1
            };
            if line_len > 0 && line_len + token.len() > budget {
                out.push_str("=\r\n");
                line_len = 0;
            }

            out.push_str(&token);
            line_len += token.len();
            i += 1;
        }

        Ok(out)
    }

    /// Returns the RFC 2047 "Q" form of one character.
    ///
    /// Only letters, digits and `! * + - /` pass through; a space becomes
    /// `_`; every other byte is escaped.
    #[must_use]
    pub fn q_token(character: &[u8]) -> String {
        let mut token = String::with_capacity(character.len() * 3);
        for &byte in character {
            match byte {
                b' ' if character.len() == 1 => token.push('_'),
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                    token.push(char::from(byte));
                }
                _ => push_escape(&mut token, byte),
            }
        }
        token
    }

    /// Q-encodes text without folding; splitting into encoded-words is the
    /// header encoder's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid in `charset`.
    pub fn encode_q(input: &[u8], charset: &Charset) -> Result<String> {
        CharacterStream::new(input, charset)
            .map(|c| c.map(Self::q_token))
            .collect()
    }
}

impl Encoder for QuotedPrintableEncoder {
    fn encode(
        &self,
        input: &[u8],
        charset: &Charset,
        first_line_offset: usize,
    ) -> Result<Vec<u8>> {
        self.encode_str(input, charset, first_line_offset)
            .map(String::into_bytes)
    }
}

fn body_token(character: &[u8], at_line_end: bool) -> String {
    let mut token = String::with_capacity(character.len() * 3);
    if let [byte] = character {
        match byte {
            b' ' | b'\t' if !at_line_end => token.push(char::from(*byte)),
            b'!'..=b'<' | b'>'..=b'~' => token.push(char::from(*byte)),
            _ => push_escape(&mut token, *byte),
        }
        return token;
    }

    // Bytes of wider units are never whitespace-sensitive on their own, so
    // escape anything outside the printable set, spaces included.
    for &byte in character {
        match byte {
            b'!'..=b'<' | b'>'..=b'~' => token.push(char::from(byte)),
            _ => push_escape(&mut token, byte),
        }
    }
    token
}

fn push_escape(out: &mut String, byte: u8) {
    let _ = write!(out, "={byte:02X}");
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
    use crate::encoding::{decode_q, decode_quoted_printable};
    use proptest::prelude::*;

    fn encode(text: &str) -> String {
        QuotedPrintableEncoder::new()
            .encode_str(text.as_bytes(), &Charset::utf8(), 0)
            .unwrap()
    }

    #[test]
    fn test_plain_ascii_unchanged() {
        assert_eq!(encode("Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_non_ascii_uppercase_hex() {
        assert_eq!(encode("Héllo"), "H=C3=A9llo");
        assert_eq!(encode("a=b"), "a=3Db");
    }

    #[test]
    fn test_trailing_whitespace_escaped() {
        assert_eq!(encode("end "), "end=20");
        assert_eq!(encode("tab\t\r\nnext"), "tab=09\r\nnext");
        assert_eq!(encode("a b"), "a b");
    }

    #[test]
    fn test_lone_line_feed_escaped() {
        assert_eq!(encode("a\nb"), "a=0Ab");
        assert_eq!(encode("a\rb"), "a=0Db");
    }

    #[test]
    fn test_soft_break_at_limit() {
        let text = "x".repeat(100);
        let encoded = encode(&text);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert_eq!(lines[0].len(), 76);
        assert!(lines[0].ends_with('='));
        assert_eq!(lines[1], "x".repeat(25));
    }

    #[test]
    fn test_exact_fit_needs_no_soft_break() {
        let text = "y".repeat(76);
        assert_eq!(encode(&text), text);
    }

    #[test]
    fn test_escape_not_split_across_lines() {
        let text = format!("{}é", "z".repeat(73));
        let encoded = encode(&text);
        assert_eq!(encoded, format!("{}=\r\n=C3=A9", "z".repeat(73)));
    }

    #[test]
    fn test_first_line_offset() {
        let encoded = QuotedPrintableEncoder::new()
            .encode_str("a".repeat(20).as_bytes(), &Charset::utf8(), 70)
            .unwrap();
        let first = encoded.split("\r\n").next().unwrap();
        assert_eq!(first, "aaaaa=");
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let result = QuotedPrintableEncoder::new().encode_str(&[b'a', 0xFF], &Charset::utf8(), 0);
        assert!(result.unwrap_err().is_charset_error());
    }

    #[test]
    fn test_q_tokens() {
        assert_eq!(QuotedPrintableEncoder::q_token(b" "), "_");
        assert_eq!(QuotedPrintableEncoder::q_token(b"_"), "=5F");
        assert_eq!(QuotedPrintableEncoder::q_token(b"?"), "=3F");
        assert_eq!(QuotedPrintableEncoder::q_token(b"="), "=3D");
        assert_eq!(QuotedPrintableEncoder::q_token("é".as_bytes()), "=C3=A9");
        assert_eq!(
            QuotedPrintableEncoder::encode_q("Café au lait".as_bytes(), &Charset::utf8())
                .unwrap(),
            "Caf=C3=A9_au_lait"
        );
    }

    #[test]
    fn test_utf16_units_escape_whitespace() {
        let charset = Charset::new("UTF-16BE");
        let encoded = QuotedPrintableEncoder::new()
            .encode_str(&[0x00, 0x41, 0x00, 0x20], &charset, 0)
            .unwrap();
        assert_eq!(encoded, "=00A=00=20");
    }

    proptest! {
        #[test]
        fn latin1_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
            let encoded = QuotedPrintableEncoder::new()
                .encode_str(&bytes, &Charset::new("iso-8859-1"), 0)
                .unwrap();
            prop_assert_eq!(decode_quoted_printable(&encoded).unwrap(), bytes);
        }

        #[test]
        fn utf8_round_trip(text in "\\PC{0,300}") {
            prop_assert_eq!(decode_quoted_printable(&encode(&text)).unwrap(), text.as_bytes());
        }

        #[test]
        fn utf16_round_trip(units in prop::collection::vec(any::<u16>(), 0..150)) {
            let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_be_bytes()).collect();
            let encoded = QuotedPrintableEncoder::new()
                .encode_str(&bytes, &Charset::new("utf-16be"), 0)
                .unwrap();
            prop_assert_eq!(decode_quoted_printable(&encoded).unwrap(), bytes);
        }

        #[test]
        fn lines_never_exceed_limit(
            text in "[a-z \\r\\n\u{e9}\u{20ac}=]{0,400}",
            (max, offset) in (20usize..=100).prop_flat_map(|max| (Just(max), 0..max)),
        ) {
            let encoded = QuotedPrintableEncoder::new()
                .with_max_line_length(max)
                .encode_str(text.as_bytes(), &Charset::utf8(), offset)
                .unwrap();
            for (index, line) in encoded.split("\r\n").enumerate() {
                let limit = if index == 0 { max - offset } else { max };
                prop_assert!(line.len() <= limit, "line {:?} longer than {}", line, limit);
                // A soft break only ever follows a complete escape.
                let body = line.strip_suffix('=').unwrap_or(line);
                let tail = body.rfind('=').map_or(0, |p| body.len() - p);
                prop_assert!(tail == 0 || tail >= 3);
                prop_assert!(!line.ends_with(' ') && !line.ends_with('\t'));
            }
        }

        #[test]
        fn q_round_trip(text in "\\PC{0,100}") {
            let encoded =
                QuotedPrintableEncoder::encode_q(text.as_bytes(), &Charset::utf8()).unwrap();
            prop_assert_eq!(decode_q(&encoded).unwrap(), text.as_bytes());
        }
    }
}
