//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from response lines (without CRLF).
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK`
/// - Bare: `250`
/// - Multi: `250-First line`, `250-Second line`, `250 Last line`
///
/// # Errors
///
/// Returns [`Error::MalformedReply`] if a line has no valid code, the codes
/// of a multi-line reply differ, or a continuation marker is misplaced.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some((last, rest)) = lines.split_last() else {
        return Err(Error::MalformedReply("empty reply".into()));
    };

    let code = line_code(&lines[0])?;
    let mut message = Vec::with_capacity(lines.len());

    for line in rest {
        if line_code(line)? != code || line.as_bytes().get(3) != Some(&b'-') {
            return Err(Error::MalformedReply(format!("bad continuation: {line}")));
        }
        message.push(line[4..].to_string());
    }

    if line_code(last)? != code {
        return Err(Error::MalformedReply(format!("code changed: {last}")));
    }
    match last.as_bytes().get(3) {
        None => message.push(String::new()),
        Some(b' ') => message.push(last[4..].to_string()),
        Some(_) => return Err(Error::MalformedReply(format!("unterminated reply: {last}"))),
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

/// Checks if a line ends a reply.
///
/// Any line without the `-` continuation marker ends the reply, so a
/// malformed line never leaves the reader waiting for more input.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.as_bytes().get(3) != Some(&b'-')
}

fn line_code(line: &str) -> Result<u16> {
    let digits = line
        .as_bytes()
        .get(..3)
        .filter(|d| d.iter().all(u8::is_ascii_digit) && (b'2'..=b'5').contains(&d[0]))
        .ok_or_else(|| Error::MalformedReply(format!("invalid reply code: {line}")))?;

    Ok(digits
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0')))
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

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply = parse_reply(&lines(&[
            "250-smtp.example.com",
            "250-PIPELINING",
            "250 AUTH PLAIN",
        ]))
        .unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(
            reply.message,
            vec!["smtp.example.com", "PIPELINING", "AUTH PLAIN"]
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.message, vec![""]);
    }

    #[test]
    fn test_parse_empty_text_after_space() {
        let reply = parse_reply(&lines(&["250 "])).unwrap();
        assert_eq!(reply.message, vec![""]);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250OK"])).is_err());
        assert!(parse_reply(&lines(&["999 out of range"])).is_err());
    }

    #[test]
    fn test_mismatched_codes() {
        let err = parse_reply(&lines(&["250-first", "251 second"])).unwrap_err();
        assert!(matches!(err, Error::MalformedReply(_)));
    }

    #[test]
    fn test_continuation_marker_on_last_line() {
        assert!(parse_reply(&lines(&["250-first", "250-second"])).is_err());
    }
}
