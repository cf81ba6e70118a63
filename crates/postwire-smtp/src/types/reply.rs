//! Server replies (RFC 5321 §4.2).

use std::fmt;

/// First digit of a reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 2xx: the command was accepted.
    Completion,
    /// 3xx: more input is expected (DATA, AUTH challenges).
    Intermediate,
    /// 4xx: try again later.
    Transient,
    /// 5xx: do not retry as is.
    Permanent,
}

/// Three-digit reply code.
///
/// The parser only builds codes whose first digit is 2 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220, greeting and STARTTLS go-ahead.
    pub const SERVICE_READY: Self = Self(220);
    /// 221, answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// 235, AUTH succeeded.
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250.
    pub const OK: Self = Self(250);
    /// 251, recipient not local but will be forwarded.
    pub const FORWARD: Self = Self(251);
    /// 334, SASL challenge.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354, send the message body.
    pub const START_DATA: Self = Self(354);
    /// 421, server is shutting the channel.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 535, credentials rejected.
    pub const AUTH_FAILED: Self = Self(535);
    /// 550, mailbox unavailable.
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 554, transaction failed.
    pub const TRANSACTION_FAILED: Self = Self(554);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Classifies the code by its first digit.
    #[must_use]
    pub const fn class(self) -> Option<ReplyClass> {
        match self.0 / 100 {
            2 => Some(ReplyClass::Completion),
            3 => Some(ReplyClass::Intermediate),
            4 => Some(ReplyClass::Transient),
            5 => Some(ReplyClass::Permanent),
            _ => None,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Enhanced mail system status code (RFC 3463), e.g. `5.7.8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedStatus {
    /// Class: 2, 4 or 5.
    pub class: u8,
    /// Subject.
    pub subject: u16,
    /// Detail.
    pub detail: u16,
}

impl EnhancedStatus {
    /// Parses the status token at the start of `text`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_ascii_whitespace().next()?;
        let mut parts = token.splitn(3, '.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        matches!(class, 2 | 4 | 5).then_some(Self {
            class,
            subject,
            detail,
        })
    }
}

impl fmt::Display for EnhancedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// A complete reply: code plus one text entry per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: ReplyCode,
    /// Text of each line, code and separator removed.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true for 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.class() == Some(ReplyClass::Completion)
    }

    /// Returns true for 4xx.
    #[must_use]
    pub fn is_transient_error(&self) -> bool {
        self.code.class() == Some(ReplyClass::Transient)
    }

    /// Returns true for 5xx.
    #[must_use]
    pub fn is_permanent_error(&self) -> bool {
        self.code.class() == Some(ReplyClass::Permanent)
    }

    /// Joins all lines with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Returns the first line, or "" for a bare code.
    #[must_use]
    pub fn first_line(&self) -> &str {
        self.message.first().map_or("", String::as_str)
    }

    /// Returns the enhanced status code leading the first line, if any.
    #[must_use]
    pub fn enhanced_status(&self) -> Option<EnhancedStatus> {
        EnhancedStatus::parse(self.first_line())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message.join(" / "))
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

    fn reply(code: u16, lines: &[&str]) -> Reply {
        Reply::new(
            ReplyCode::new(code),
            lines.iter().map(|l| (*l).to_string()).collect(),
        )
    }

    #[test]
    fn test_classes() {
        assert_eq!(ReplyCode::OK.class(), Some(ReplyClass::Completion));
        assert_eq!(
            ReplyCode::AUTH_CONTINUE.class(),
            Some(ReplyClass::Intermediate)
        );
        assert_eq!(
            ReplyCode::SERVICE_UNAVAILABLE.class(),
            Some(ReplyClass::Transient)
        );
        assert_eq!(
            ReplyCode::TRANSACTION_FAILED.class(),
            Some(ReplyClass::Permanent)
        );
        assert_eq!(ReplyCode::new(199).class(), None);
    }

    #[test]
    fn test_predicates() {
        let busy = reply(450, &["Mailbox busy"]);
        assert!(!busy.is_success());
        assert!(busy.is_transient_error());
        assert!(!busy.is_permanent_error());
        assert!(reply(251, &[]).is_success());
        assert!(reply(550, &[]).is_permanent_error());
    }

    #[test]
    fn test_text_accessors() {
        let greeting = reply(220, &["smtp.example.com ESMTP", "Ready"]);
        assert_eq!(greeting.first_line(), "smtp.example.com ESMTP");
        assert_eq!(greeting.message_text(), "smtp.example.com ESMTP\nReady");
        assert_eq!(greeting.to_string(), "220 smtp.example.com ESMTP / Ready");

        let bare = reply(250, &[]);
        assert_eq!(bare.first_line(), "");
        assert_eq!(bare.message_text(), "");
    }

    #[test]
    fn test_enhanced_status() {
        let rejected = reply(535, &["5.7.8 Username and Password not accepted"]);
        let status = rejected.enhanced_status().unwrap();
        assert_eq!(
            status,
            EnhancedStatus {
                class: 5,
                subject: 7,
                detail: 8
            }
        );
        assert_eq!(status.to_string(), "5.7.8");

        assert!(reply(250, &["OK"]).enhanced_status().is_none());
        assert!(reply(250, &["3.1.1 odd"]).enhanced_status().is_none());
        assert!(reply(250, &["2.1"]).enhanced_status().is_none());
    }

    #[test]
    fn test_code_display_is_three_digits() {
        assert_eq!(ReplyCode::START_DATA.to_string(), "354");
        assert_eq!(ReplyCode::new(354).as_u16(), 354);
    }
}
