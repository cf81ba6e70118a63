//! # postwire-mime
//!
//! Charset-aware content encoding for outgoing email.
//!
//! ## Features
//!
//! - **Character streams**: split bytes into whole characters for any
//!   declared charset, so no encoder ever splits a multi-byte sequence
//! - **Transfer encodings**: Quoted-Printable and Base64 with line folding,
//!   plus checked 7bit/8bit passthrough
//! - **Header codec**: RFC 2047 encoded-words (Q and B) with folding
//! - **Messages**: serialize a single-part message to wire bytes
//!
//! ## Quick Start
//!
//! ```
//! use postwire_mime::Message;
//!
//! let wire = Message::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Grüße")
//!     .text_body("Hello, World!")
//!     .to_bytes()?;
//!
//! assert!(wire.starts_with(b"From: sender@example.com\r\n"));
//! # Ok::<(), postwire_mime::Error>(())
//! ```
//!
//! ### Encoding
//!
//! ```
//! use postwire_mime::Charset;
//! use postwire_mime::encoding::{QuotedPrintableEncoder, decode_quoted_printable};
//!
//! let encoded = QuotedPrintableEncoder::new()
//!     .encode_str("Héllo".as_bytes(), &Charset::utf8(), 0)?;
//! assert_eq!(encoded, "H=C3=A9llo");
//! assert_eq!(decode_quoted_printable(&encoded)?, "Héllo".as_bytes());
//! # Ok::<(), postwire_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;
mod message;

pub mod charset;
pub mod encoding;
pub mod stream;

pub use charset::Charset;
pub use encoding::{Encoder, TransferEncoding};
pub use error::{Error, Result};
pub use header::{HeaderEncoder, Headers, WordEncoding};
pub use message::Message;
pub use stream::CharacterStream;
