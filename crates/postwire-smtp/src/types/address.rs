//! Envelope address types.

use crate::error::{Error, Result};

/// Address used in `MAIL FROM` and `RCPT TO`.
///
/// The empty address is only valid as a null reverse-path (bounces).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// The null reverse-path, `<>`.
    #[must_use]
    pub const fn null() -> Self {
        Self(String::new())
    }

    /// Returns true for the null reverse-path.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress(format!("missing @: {addr:?}")));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "empty local or domain part: {addr:?}"
            )));
        }

        // Anything that could break out of the angle brackets or the line.
        if addr
            .bytes()
            .any(|b| b.is_ascii_control() || matches!(b, b'<' | b'>' | b' '))
        {
            return Err(Error::InvalidAddress(format!(
                "forbidden character in {addr:?}"
            )));
        }

        Ok(())
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert!(!addr.is_null());
    }

    #[test]
    fn test_quoted_local_part_with_at() {
        assert!(Address::new("\"a@b\"@example.com").is_ok());
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(Address::new("userexample.com").is_err());
        assert!(Address::new("").is_err());
        assert!(Address::new("@example.com").is_err());
        assert!(Address::new("user@").is_err());
    }

    #[test]
    fn test_rejects_command_injection() {
        assert!(Address::new("a@example.com>\r\nRSET").is_err());
        assert!(Address::new("a@example.com> SIZE=1").is_err());
    }

    #[test]
    fn test_null_sender() {
        assert!(Address::null().is_null());
        assert_eq!(Address::null().as_str(), "");
    }

    #[test]
    fn test_from_str() {
        let addr: Address = "x@example.org".parse().unwrap();
        assert_eq!(addr.to_string(), "x@example.org");
    }
}
