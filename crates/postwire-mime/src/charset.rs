//! Charset resolution and character width classification.
//!
//! A [`CharacterReader`] answers one question: given the bytes seen so far,
//! is there a complete character, do we need more bytes, or is the input
//! invalid? Readers are resolved from charset labels through a static table
//! of charset families.

use std::fmt;

/// Outcome of validating a byte window against a charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// The window cannot start or continue a character.
    Invalid,
    /// The window is a prefix of a character; this many more bytes are needed.
    NeedMoreBytes(usize),
    /// The first character of the window is complete and this many bytes long.
    Complete(usize),
}

/// Classifies how many bytes make up the next character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterReader {
    /// Every character is exactly this many bytes.
    Fixed(usize),
    /// Variable-width UTF-8 (1 to 6 bytes, classified by the leading byte).
    Utf8,
}

impl CharacterReader {
    /// Validates a window of bytes starting at a character boundary.
    #[must_use]
    pub fn validate(self, window: &[u8]) -> Validation {
        match self {
            Self::Fixed(width) => {
                if window.len() >= width {
                    Validation::Complete(width)
                } else {
                    Validation::NeedMoreBytes(width - window.len())
                }
            }
            Self::Utf8 => validate_utf8(window),
        }
    }

    /// Returns the width implied by a leading byte, if it can start a character.
    #[must_use]
    pub const fn width_of(self, lead: u8) -> Option<usize> {
        match self {
            Self::Fixed(width) => Some(width),
            Self::Utf8 => utf8_width(lead),
        }
    }

    /// Returns the widest character this reader can produce.
    #[must_use]
    pub const fn max_width(self) -> usize {
        match self {
            Self::Fixed(width) => width,
            Self::Utf8 => 6,
        }
    }
}

const fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC0..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF7 => Some(4),
        0xF8..=0xFB => Some(5),
        0xFC..=0xFD => Some(6),
        // Continuation bytes and 0xFE/0xFF never start a character.
        _ => None,
    }
}

fn validate_utf8(window: &[u8]) -> Validation {
    let Some(&lead) = window.first() else {
        return Validation::NeedMoreBytes(1);
    };
    let Some(width) = utf8_width(lead) else {
        return Validation::Invalid;
    };

    let available = window.len().min(width);
    if window[1..available].iter().any(|b| b & 0xC0 != 0x80) {
        return Validation::Invalid;
    }

    if window.len() < width {
        Validation::NeedMoreBytes(width - window.len())
    } else {
        Validation::Complete(width)
    }
}

/// Charset families the encoders know how to segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharsetFamily {
    /// UTF-8.
    Utf8,
    /// US-ASCII.
    Ascii,
    /// ISO-8859-* single-byte charsets.
    Iso8859,
    /// windows-125x single-byte charsets.
    Windows,
    /// UCS-2 / UTF-16 (two-byte units).
    Utf16,
    /// UCS-4 / UTF-32 (four-byte units).
    Utf32,
    /// Anything unrecognized; treated as one byte per character.
    SingleByte,
}

/// Reader configuration for each family, resolved once per encode call.
static READERS: [(CharsetFamily, CharacterReader); 7] = [
    (CharsetFamily::Utf8, CharacterReader::Utf8),
    (CharsetFamily::Ascii, CharacterReader::Fixed(1)),
    (CharsetFamily::Iso8859, CharacterReader::Fixed(1)),
    (CharsetFamily::Windows, CharacterReader::Fixed(1)),
    (CharsetFamily::Utf16, CharacterReader::Fixed(2)),
    (CharsetFamily::Utf32, CharacterReader::Fixed(4)),
    (CharsetFamily::SingleByte, CharacterReader::Fixed(1)),
];

impl CharsetFamily {
    /// Classifies a charset label, matching common aliases.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase().replace('_', "-");
        let label = label.as_str();

        match label {
            "utf-8" | "utf8" => Self::Utf8,
            "ascii" | "us-ascii" | "usascii" | "ansi-x3.4-1968" => Self::Ascii,
            "ucs-2" | "ucs2" | "utf-16" | "utf16" | "utf-16le" | "utf-16be" | "utf16le"
            | "utf16be" => Self::Utf16,
            "ucs-4" | "ucs4" | "utf-32" | "utf32" | "utf-32le" | "utf-32be" | "utf32le"
            | "utf32be" => Self::Utf32,
            _ if label.starts_with("iso-8859-") || label.starts_with("iso8859-") => {
                Self::Iso8859
            }
            _ if is_windows_125x(label) => Self::Windows,
            _ => Self::SingleByte,
        }
    }

    /// Returns the character reader configured for this family.
    #[must_use]
    pub fn reader(self) -> CharacterReader {
        READERS
            .iter()
            .find(|(family, _)| *family == self)
            .map_or(CharacterReader::Fixed(1), |(_, reader)| *reader)
    }

    /// Returns true if CR, LF and printable ASCII are encoded as single bytes.
    #[must_use]
    pub const fn is_ascii_compatible(self) -> bool {
        !matches!(self, Self::Utf16 | Self::Utf32)
    }
}

fn is_windows_125x(label: &str) -> bool {
    let digits = label
        .strip_prefix("windows-")
        .or_else(|| label.strip_prefix("cp"));
    digits.is_some_and(|d| d.len() == 4 && d.starts_with("125") && d.as_bytes()[3].is_ascii_digit())
}

/// A named charset together with its family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Charset {
    name: String,
    family: CharsetFamily,
}

impl Charset {
    /// Creates a charset from a label such as `"UTF-8"` or `"iso-8859-15"`.
    ///
    /// Unrecognized labels fall back to single-byte segmentation.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        let name = label.into();
        let family = CharsetFamily::from_label(&name);
        Self { name, family }
    }

    /// UTF-8.
    #[must_use]
    pub fn utf8() -> Self {
        Self {
            name: "utf-8".to_string(),
            family: CharsetFamily::Utf8,
        }
    }

    /// US-ASCII.
    #[must_use]
    pub fn us_ascii() -> Self {
        Self {
            name: "us-ascii".to_string(),
            family: CharsetFamily::Ascii,
        }
    }

    /// Returns the label as given.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the charset family.
    #[must_use]
    pub const fn family(&self) -> CharsetFamily {
        self.family
    }

    /// Returns the reader used to segment text in this charset.
    #[must_use]
    pub fn reader(&self) -> CharacterReader {
        self.family.reader()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
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
    fn test_family_aliases() {
        assert_eq!(CharsetFamily::from_label("UTF-8"), CharsetFamily::Utf8);
        assert_eq!(CharsetFamily::from_label("utf8"), CharsetFamily::Utf8);
        assert_eq!(CharsetFamily::from_label("US-ASCII"), CharsetFamily::Ascii);
        assert_eq!(CharsetFamily::from_label("ascii"), CharsetFamily::Ascii);
        assert_eq!(
            CharsetFamily::from_label("ISO-8859-15"),
            CharsetFamily::Iso8859
        );
        assert_eq!(
            CharsetFamily::from_label("iso_8859-1"),
            CharsetFamily::Iso8859
        );
        assert_eq!(
            CharsetFamily::from_label("windows-1252"),
            CharsetFamily::Windows
        );
        assert_eq!(CharsetFamily::from_label("cp1251"), CharsetFamily::Windows);
        assert_eq!(CharsetFamily::from_label("UCS-2"), CharsetFamily::Utf16);
        assert_eq!(CharsetFamily::from_label("utf-16le"), CharsetFamily::Utf16);
        assert_eq!(CharsetFamily::from_label("UTF-32"), CharsetFamily::Utf32);
        assert_eq!(CharsetFamily::from_label("ucs-4"), CharsetFamily::Utf32);
    }

    #[test]
    fn test_unknown_charset_falls_back_to_single_byte() {
        assert_eq!(
            CharsetFamily::from_label("koi8-r"),
            CharsetFamily::SingleByte
        );
        assert_eq!(
            CharsetFamily::from_label("windows-874"),
            CharsetFamily::SingleByte
        );
        assert_eq!(Charset::new("koi8-r").reader(), CharacterReader::Fixed(1));
    }

    #[test]
    fn test_family_readers() {
        assert_eq!(CharsetFamily::Utf8.reader(), CharacterReader::Utf8);
        assert_eq!(CharsetFamily::Utf16.reader(), CharacterReader::Fixed(2));
        assert_eq!(CharsetFamily::Utf32.reader(), CharacterReader::Fixed(4));
        assert_eq!(CharsetFamily::Iso8859.reader(), CharacterReader::Fixed(1));
    }

    #[test]
    fn test_utf8_widths() {
        let reader = CharacterReader::Utf8;
        assert_eq!(reader.validate(b"a"), Validation::Complete(1));
        assert_eq!(reader.validate("é".as_bytes()), Validation::Complete(2));
        assert_eq!(reader.validate("€".as_bytes()), Validation::Complete(3));
        assert_eq!(reader.validate("𝄞".as_bytes()), Validation::Complete(4));
        assert_eq!(
            reader.validate(&[0xF8, 0x80, 0x80, 0x80, 0x80]),
            Validation::Complete(5)
        );
        assert_eq!(
            reader.validate(&[0xFC, 0x80, 0x80, 0x80, 0x80, 0x80]),
            Validation::Complete(6)
        );
    }

    #[test]
    fn test_utf8_truncated_prefix() {
        let reader = CharacterReader::Utf8;
        assert_eq!(reader.validate(&[]), Validation::NeedMoreBytes(1));
        assert_eq!(reader.validate(&[0xE2]), Validation::NeedMoreBytes(2));
        assert_eq!(reader.validate(&[0xE2, 0x82]), Validation::NeedMoreBytes(1));
    }

    #[test]
    fn test_utf8_invalid() {
        let reader = CharacterReader::Utf8;
        assert_eq!(reader.validate(&[0xFF]), Validation::Invalid);
        assert_eq!(reader.validate(&[0xFE]), Validation::Invalid);
        assert_eq!(reader.validate(&[0x80]), Validation::Invalid);
        assert_eq!(reader.validate(&[0xC3, 0x41]), Validation::Invalid);
    }

    #[test]
    fn test_fixed_width() {
        let reader = CharacterReader::Fixed(2);
        assert_eq!(reader.validate(&[0x00]), Validation::NeedMoreBytes(1));
        assert_eq!(reader.validate(&[0x00, 0x41]), Validation::Complete(2));
    }

    #[test]
    fn test_charset_display() {
        let charset = Charset::new("ISO-8859-1");
        assert_eq!(charset.to_string(), "ISO-8859-1");
        assert_eq!(charset.family(), CharsetFamily::Iso8859);
        assert_eq!(Charset::default(), Charset::utf8());
    }

    fn continuation() -> impl Strategy<Value = u8> {
        0x80u8..=0xBF
    }

    proptest! {
        #[test]
        fn utf8_complete_exactly_at_width(
            lead in prop_oneof![0x00u8..=0x7F, 0xC0u8..=0xFD],
            tail in prop::collection::vec(continuation(), 5),
        ) {
            let reader = CharacterReader::Utf8;
            let width = reader.width_of(lead).unwrap();
            let mut window = vec![lead];
            window.extend_from_slice(&tail[..width - 1]);

            for len in 1..width {
                prop_assert_eq!(
                    reader.validate(&window[..len]),
                    Validation::NeedMoreBytes(width - len)
                );
            }
            prop_assert_eq!(reader.validate(&window), Validation::Complete(width));
        }

        #[test]
        fn fixed_complete_exactly_at_width(
            width in 1usize..=4,
            bytes in prop::collection::vec(any::<u8>(), 4),
        ) {
            let reader = CharacterReader::Fixed(width);
            for len in 0..width {
                prop_assert_eq!(
                    reader.validate(&bytes[..len]),
                    Validation::NeedMoreBytes(width - len)
                );
            }
            prop_assert_eq!(reader.validate(&bytes[..width]), Validation::Complete(width));
        }
    }
}
