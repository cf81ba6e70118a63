//! Outgoing message serialization.

use crate::charset::Charset;
use crate::encoding::{DEFAULT_MAX_LINE_LENGTH, TransferEncoding};
use crate::error::Result;
use crate::header::{HeaderEncoder, Headers, WordEncoding};

/// A single-part message ready to be turned into wire bytes.
#[derive(Debug, Clone)]
pub struct Message {
    headers: Headers,
    body: Vec<u8>,
    charset: Charset,
    transfer_encoding: TransferEncoding,
    header_encoding: WordEncoding,
    max_line_length: usize,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Creates an empty UTF-8 message with Quoted-Printable body encoding.
    #[must_use]
    pub fn new() -> Self {
        Self {
            headers: Headers::new(),
            body: Vec::new(),
            charset: Charset::utf8(),
            transfer_encoding: TransferEncoding::QuotedPrintable,
            header_encoding: WordEncoding::Q,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Adds a header field.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Sets the `From` field.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.headers.set("From", from);
        self
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.headers.add("To", to);
        self
    }

    /// Sets the `Subject` field.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.headers.set("Subject", subject);
        self
    }

    /// Sets a UTF-8 text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.body = text.into().into_bytes();
        self.charset = Charset::utf8();
        self
    }

    /// Sets a body already encoded in `charset`.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>, charset: Charset) -> Self {
        self.body = body.into();
        self.charset = charset;
        self
    }

    /// Sets the body's Content-Transfer-Encoding.
    #[must_use]
    pub const fn with_transfer_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.transfer_encoding = encoding;
        self
    }

    /// Sets the encoded-word encoding used for non-ASCII headers.
    #[must_use]
    pub const fn with_header_encoding(mut self, encoding: WordEncoding) -> Self {
        self.header_encoding = encoding;
        self
    }

    /// Sets the line length used for folding headers and encoding the body.
    #[must_use]
    pub const fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Returns the header fields set so far.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a mutable reference to the header fields.
    pub const fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the unencoded body.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body charset.
    #[must_use]
    pub const fn charset(&self) -> &Charset {
        &self.charset
    }

    /// Returns the body transfer encoding.
    #[must_use]
    pub const fn transfer_encoding(&self) -> TransferEncoding {
        self.transfer_encoding
    }

    /// Serializes the message: header block, blank line, encoded body.
    ///
    /// `MIME-Version`, `Content-Type` and `Date` are filled in when absent;
    /// `Content-Transfer-Encoding` always reflects the configured encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a header cannot be encoded or the body is not
    /// representable in the chosen transfer encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut headers = self.headers.clone();
        if !headers.contains("Date") {
            headers.add("Date", chrono::Local::now().to_rfc2822());
        }
        if !headers.contains("MIME-Version") {
            headers.add("MIME-Version", "1.0");
        }
        if !headers.contains("Content-Type") {
            headers.add(
                "Content-Type",
                format!("text/plain; charset={}", self.charset.name()),
            );
        }
        headers.set("Content-Transfer-Encoding", self.transfer_encoding.to_string());

        let is_text = headers
            .get("Content-Type")
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/"));
        let body = if is_text && self.charset.family().is_ascii_compatible() {
            canonicalize_line_endings(&self.body)
        } else {
            self.body.clone()
        };

        let encoder = HeaderEncoder::new(self.charset.clone())
            .with_encoding(self.header_encoding)
            .with_max_line_length(self.max_line_length);
        let encoded = self
            .transfer_encoding
            .encode(&body, &self.charset, self.max_line_length)?;

        let mut out = headers.to_wire(&encoder)?.into_bytes();
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&encoded);
        if !encoded.is_empty() && !encoded.ends_with(b"\r\n") {
            out.extend_from_slice(b"\r\n");
        }
        Ok(out)
    }
}

/// Rewrites every LF not already preceded by CR as CRLF.
fn canonicalize_line_endings(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 32);
    let mut previous = 0u8;
    for &byte in body {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
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
    use crate::encoding::{decode_base64, decode_quoted_printable};

    fn split(wire: &[u8]) -> (Headers, String) {
        let text = String::from_utf8(wire.to_vec()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        (Headers::parse(head).unwrap(), body.to_string())
    }

    #[test]
    fn test_default_headers_added() {
        let wire = Message::new()
            .from("a@example.com")
            .to("b@example.com")
            .subject("Hi")
            .text_body("Hello")
            .to_bytes()
            .unwrap();
        let (headers, body) = split(&wire);

        assert_eq!(headers.get("MIME-Version"), Some("1.0"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(
            headers.get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        assert!(chrono::DateTime::parse_from_rfc2822(headers.get("Date").unwrap()).is_ok());
        assert_eq!(body, "Hello\r\n");
    }

    #[test]
    fn test_existing_headers_kept() {
        let wire = Message::new()
            .header("Date", "Mon, 1 Jan 2024 00:00:00 +0000")
            .header("Content-Type", "text/html; charset=utf-8")
            .header("Content-Transfer-Encoding", "7bit")
            .text_body("<p>x</p>")
            .with_transfer_encoding(TransferEncoding::Base64)
            .to_bytes()
            .unwrap();
        let (headers, body) = split(&wire);

        assert_eq!(headers.get("Date"), Some("Mon, 1 Jan 2024 00:00:00 +0000"));
        assert_eq!(headers.get("Content-Type"), Some("text/html; charset=utf-8"));
        assert_eq!(headers.get_all("Content-Transfer-Encoding"), vec!["base64"]);
        assert_eq!(decode_base64(&body).unwrap(), b"<p>x</p>");
    }

    #[test]
    fn test_bare_line_feeds_become_crlf() {
        let wire = Message::new()
            .text_body("one\ntwo\r\nthree")
            .with_transfer_encoding(TransferEncoding::SevenBit)
            .to_bytes()
            .unwrap();
        let (_, body) = split(&wire);
        assert_eq!(body, "one\r\ntwo\r\nthree\r\n");
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let wire = Message::new()
            .subject("Grüße")
            .text_body("Schöne Grüße")
            .to_bytes()
            .unwrap();
        let (headers, body) = split(&wire);

        assert_eq!(headers.get("Subject"), Some("=?utf-8?Q?Gr=C3=BC=C3=9Fe?="));
        assert_eq!(headers.get_decoded("Subject").unwrap().as_deref(), Some("Grüße"));
        assert_eq!(
            decode_quoted_printable(body.trim_end()).unwrap(),
            "Schöne Grüße".as_bytes()
        );
    }

    #[test]
    fn test_latin1_body() {
        let wire = Message::new()
            .subject("café")
            .body(vec![b'c', b'a', b'f', 0xE9], Charset::new("iso-8859-1"))
            .to_bytes()
            .unwrap();
        let (headers, body) = split(&wire);

        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=iso-8859-1")
        );
        assert_eq!(headers.get("Subject"), Some("=?iso-8859-1?Q?caf=E9?="));
        assert_eq!(body, "caf=E9\r\n");
    }

    #[test]
    fn test_seven_bit_rejects_non_ascii_body() {
        let result = Message::new()
            .text_body("naïve")
            .with_transfer_encoding(TransferEncoding::SevenBit)
            .to_bytes();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_body_bytes_rejected() {
        let result = Message::new().body(vec![0xC3], Charset::utf8()).to_bytes();
        assert!(result.unwrap_err().is_charset_error());
    }

    #[test]
    fn test_empty_body() {
        let wire = Message::new().subject("x").to_bytes().unwrap();
        assert!(wire.ends_with(b"\r\n\r\n"));
    }
}
