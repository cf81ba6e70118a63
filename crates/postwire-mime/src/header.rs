//! MIME header handling and the RFC 2047 header codec.

use crate::charset::{Charset, CharsetFamily};
use crate::encoding::{
    Base64Encoder, DEFAULT_MAX_LINE_LENGTH, QuotedPrintableEncoder, decode_encoded_words,
};
use crate::error::{Error, Result};
use crate::stream::CharacterStream;

/// Collection of email headers.
///
/// Names are matched case-insensitively; insertion order is preserved so
/// messages serialize their fields in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.headers[index].1.push(value),
            None => self.headers.push((name, vec![value])),
        }
    }

    /// Sets a header value, replacing any existing values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.headers[index].1 = vec![value],
            None => self.headers.push((name, vec![value])),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|index| self.headers[index].1.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.position(name)
            .map(|index| self.headers[index].1.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Gets the first value for a header with encoded-words decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if an encoded-word is malformed.
    pub fn get_decoded(&self, name: &str) -> Result<Option<String>> {
        self.get(name).map(decode_encoded_words).transpose()
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            self.headers.remove(index);
        }
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses headers from raw text, unfolding continuation lines.
    ///
    /// # Errors
    ///
    /// Returns an error if a field has no colon.
    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHeader(format!("missing colon: {line}")))?;
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        Ok(headers)
    }

    /// Serializes every field through `encoder`, each terminated by CRLF.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or a value cannot be encoded.
    pub fn to_wire(&self, encoder: &HeaderEncoder) -> Result<String> {
        let mut out = String::new();
        for (name, value) in self.iter() {
            out.push_str(&encoder.encode_field(name, value)?);
            out.push_str("\r\n");
        }
        Ok(out)
    }
}

/// Encoding used inside RFC 2047 encoded-words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordEncoding {
    /// "Q": Quoted-Printable variant, best for mostly-Latin text.
    #[default]
    Q,
    /// "B": Base64.
    B,
}

impl WordEncoding {
    const fn letter(self) -> char {
        match self {
            Self::Q => 'Q',
            Self::B => 'B',
        }
    }
}

/// Folds header fields and wraps non-ASCII content in encoded-words.
#[derive(Debug, Clone)]
pub struct HeaderEncoder {
    charset: Charset,
    encoding: WordEncoding,
    max_line_length: usize,
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new(Charset::utf8())
    }
}

impl HeaderEncoder {
    /// Creates a Q encoder for `charset` folding at 76 characters.
    #[must_use]
    pub const fn new(charset: Charset) -> Self {
        Self {
            charset,
            encoding: WordEncoding::Q,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Sets the encoded-word encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: WordEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the maximum folded line length.
    #[must_use]
    pub const fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Returns the charset used for encoded-words.
    #[must_use]
    pub const fn charset(&self) -> &Charset {
        &self.charset
    }

    /// Encodes a complete `Name: value` field without the trailing CRLF.
    ///
    /// The value is transcoded from UTF-8 into the encoder's charset. When
    /// the charset cannot be produced from Unicode text (UTF-16/32, unknown
    /// labels), the value is encoded as UTF-8 and labelled accordingly.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid field name or a value containing
    /// characters the charset cannot represent.
    pub fn encode_field(&self, name: &str, value: &str) -> Result<String> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
            return Err(Error::InvalidHeader(format!("invalid field name: {name:?}")));
        }

        let offset = name.len() + 2;
        let encoded = if needs_encoding(value.as_bytes()) {
            let (bytes, charset) = self.transcode(value)?;
            self.encode_words(&bytes, &charset, offset)?
        } else {
            fold_plain(value, offset, self.max_line_length)
        };

        Ok(format!("{name}: {encoded}"))
    }

    /// Encodes raw value bytes (already in the encoder's charset), assuming
    /// `first_line_offset` columns are used on the first line.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid in the charset.
    pub fn encode_value(&self, value: &[u8], first_line_offset: usize) -> Result<String> {
        if needs_encoding(value) {
            self.encode_words(value, &self.charset, first_line_offset)
        } else {
            let text = std::str::from_utf8(value)
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            Ok(fold_plain(text, first_line_offset, self.max_line_length))
        }
    }

    fn transcode(&self, value: &str) -> Result<(Vec<u8>, Charset)> {
        if self.charset.family() == CharsetFamily::Utf8 {
            return Ok((value.as_bytes().to_vec(), self.charset.clone()));
        }

        let encoding = encoding_rs::Encoding::for_label(self.charset.name().as_bytes())
            .filter(|e| e.output_encoding() == *e);
        let Some(encoding) = encoding else {
            return Ok((value.as_bytes().to_vec(), Charset::utf8()));
        };

        let (bytes, _, unmappable) = encoding.encode(value);
        if unmappable {
            return Err(Error::InvalidHeader(format!(
                "value cannot be represented in {}",
                self.charset
            )));
        }
        Ok((bytes.into_owned(), self.charset.clone()))
    }

    /// Splits `value` into as many encoded-words as needed, one per line.
    fn encode_words(
        &self,
        value: &[u8],
        charset: &Charset,
        first_line_offset: usize,
    ) -> Result<String> {
        let chars = CharacterStream::new(value, charset).collect_chars()?;
        let prefix = format!("=?{}?{}?", charset.name(), self.encoding.letter());
        let overhead = prefix.len() + 2;
        let available = |column: usize| self.max_line_length.saturating_sub(column + overhead);

        let mut out = String::new();
        let mut column = first_line_offset;
        let mut payload = String::new();
        let mut raw: Vec<u8> = Vec::new();

        for ch in chars {
            let (token, grown) = match self.encoding {
                WordEncoding::Q => {
                    let token = QuotedPrintableEncoder::q_token(ch);
                    let grown = payload.len() + token.len();
                    (token, grown)
                }
                WordEncoding::B => (
                    String::new(),
                    Base64Encoder::encoded_len(raw.len() + ch.len()),
                ),
            };

            let word_is_empty = payload.is_empty() && raw.is_empty();
            if grown > available(column) && (!word_is_empty || column > 1) {
                if !word_is_empty {
                    self.close_word(&mut out, &prefix, &mut payload, &mut raw);
                }
                out.push_str("\r\n ");
                column = 1;
            }

            payload.push_str(&token);
            raw.extend_from_slice(ch);
        }

        if !(payload.is_empty() && raw.is_empty()) {
            self.close_word(&mut out, &prefix, &mut payload, &mut raw);
        }

        Ok(out)
    }

    fn close_word(&self, out: &mut String, prefix: &str, payload: &mut String, raw: &mut Vec<u8>) {
        out.push_str(prefix);
        match self.encoding {
            WordEncoding::Q => out.push_str(payload),
            WordEncoding::B => out.push_str(
                &Base64Encoder::new()
                    .with_max_line_length(usize::MAX)
                    .encode_str(raw, 0),
            ),
        }
        out.push_str("?=");
        payload.clear();
        raw.clear();
    }
}

/// Returns true if the value cannot appear in a header as-is.
fn needs_encoding(value: &[u8]) -> bool {
    value
        .iter()
        .any(|&b| b >= 0x7F || (b < 0x20 && b != b'\t'))
        || value.windows(2).any(|w| w == b"=?")
}

/// Folds an ASCII value at spaces so lines stay within `max` where possible.
fn fold_plain(value: &str, first_line_offset: usize, max: usize) -> String {
    let mut out = String::with_capacity(value.len());
    let mut column = first_line_offset;

    for (index, word) in value.split(' ').enumerate() {
        if index > 0 {
            if column + 1 + word.len() > max && !word.is_empty() && column > 1 {
                out.push_str("\r\n ");
                column = 1;
            } else {
                out.push(' ');
                column += 1;
            }
        }
        out.push_str(word);
        column += word.len();
    }

    out
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
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
    }

    #[test]
    fn test_headers_preserve_order() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com");
        headers.add("To", "b@example.com");
        headers.add("Subject", "Hi");
        let names: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["From", "To", "Subject"]);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "body: not a header\r\n"
        );

        let headers = Headers::parse(text).unwrap();
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("body").is_none());
    }

    #[test]
    fn test_headers_parse_missing_colon() {
        assert!(Headers::parse("garbage line\r\n").is_err());
    }

    #[test]
    fn test_ascii_field_unchanged() {
        let encoder = HeaderEncoder::default();
        assert_eq!(
            encoder.encode_field("Subject", "Hello there").unwrap(),
            "Subject: Hello there"
        );
    }

    #[test]
    fn test_long_ascii_field_folds_at_spaces() {
        let encoder = HeaderEncoder::default();
        let value = "word ".repeat(30);
        let field = encoder.encode_field("Subject", value.trim_end()).unwrap();
        for line in field.split("\r\n") {
            assert!(line.len() <= 76);
        }
        assert!(field.contains("\r\n word"));
    }

    #[test]
    fn test_q_encoded_word() {
        let encoder = HeaderEncoder::default();
        assert_eq!(
            encoder.encode_field("Subject", "Café au lait").unwrap(),
            "Subject: =?utf-8?Q?Caf=C3=A9_au_lait?="
        );
    }

    #[test]
    fn test_b_encoded_word() {
        let encoder = HeaderEncoder::default().with_encoding(WordEncoding::B);
        assert_eq!(
            encoder.encode_field("Subject", "Héllo").unwrap(),
            "Subject: =?utf-8?B?SMOpbGxv?="
        );
    }

    #[test]
    fn test_encoded_word_marker_forces_encoding() {
        let encoder = HeaderEncoder::default();
        let field = encoder.encode_field("Subject", "a =?b").unwrap();
        assert_eq!(field, "Subject: =?utf-8?Q?a_=3D=3Fb?=");
    }

    #[test]
    fn test_latin1_transcoding() {
        let encoder = HeaderEncoder::new(Charset::new("iso-8859-1"));
        assert_eq!(
            encoder.encode_field("Subject", "café").unwrap(),
            "Subject: =?iso-8859-1?Q?caf=E9?="
        );
        assert!(encoder.encode_field("Subject", "€ and 日本").is_err());
    }

    #[test]
    fn test_utf16_charset_falls_back_to_utf8() {
        let encoder = HeaderEncoder::new(Charset::new("utf-16"));
        assert_eq!(
            encoder.encode_field("Subject", "é").unwrap(),
            "Subject: =?utf-8?Q?=C3=A9?="
        );
    }

    #[test]
    fn test_invalid_field_name() {
        let encoder = HeaderEncoder::default();
        assert!(encoder.encode_field("Bad Name", "x").is_err());
        assert!(encoder.encode_field("", "x").is_err());
    }

    #[test]
    fn test_encode_value_invalid_bytes() {
        let encoder = HeaderEncoder::default();
        let err = encoder.encode_value(&[b'a', 0xFF], 0).unwrap_err();
        assert!(err.is_charset_error());
    }

    #[test]
    fn test_to_wire_and_back() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("Subject", "Grüße aus Köln, schöne Stadt am Rhein mit vielen Brücken");
        let wire = headers.to_wire(&HeaderEncoder::default()).unwrap();
        assert!(wire.ends_with("\r\n"));

        let parsed = Headers::parse(&wire).unwrap();
        assert_eq!(
            parsed.get_decoded("Subject").unwrap().as_deref(),
            Some("Grüße aus Köln, schöne Stadt am Rhein mit vielen Brücken")
        );
    }

    proptest! {
        #[test]
        fn encoded_fields_fit_and_decode(
            text in "[a-zA-Z0-9 äöüéß€日本]{1,200}",
            max in 40usize..=100,
            b in any::<bool>(),
        ) {
            let encoding = if b { WordEncoding::B } else { WordEncoding::Q };
            let encoder = HeaderEncoder::default()
                .with_encoding(encoding)
                .with_max_line_length(max);
            let field = encoder.encode_field("Subject", &text).unwrap();

            if needs_encoding(text.as_bytes()) {
                for line in field.split("\r\n") {
                    prop_assert!(line.len() <= max, "{:?} exceeds {}", line, max);
                }
                let value = field.strip_prefix("Subject: ").unwrap().replace("\r\n", "");
                prop_assert_eq!(decode_encoded_words(&value).unwrap(), text);
            }
        }
    }
}
