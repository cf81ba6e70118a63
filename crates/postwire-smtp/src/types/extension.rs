//! ESMTP extension types.

use super::Reply;
use std::collections::BTreeMap;

/// Extensions advertised in an EHLO reply.
///
/// Maps the uppercased keyword to its parameter tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    entries: BTreeMap<String, Vec<String>>,
}

impl Extensions {
    /// Parses the extension lines of an EHLO reply.
    ///
    /// The first line is the server's greeting and carries no extension.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut extensions = Self::default();
        let mut legacy_auth: Option<Vec<String>> = None;

        for line in reply.message.iter().skip(1) {
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();
            let params: Vec<String> = parts.map(str::to_string).collect();

            // Pre-RFC 4954 servers announce "AUTH=LOGIN PLAIN".
            if let Some(first) = keyword.strip_prefix("AUTH=") {
                let mechanisms = legacy_auth.get_or_insert_with(Vec::new);
                if !first.is_empty() {
                    mechanisms.push(first.to_string());
                }
                mechanisms.extend(params);
                continue;
            }

            extensions.entries.insert(keyword, params);
        }

        if let Some(mechanisms) = legacy_auth {
            extensions
                .entries
                .entry("AUTH".to_string())
                .or_insert(mechanisms);
        }

        extensions
    }

    /// Returns true if `keyword` was advertised.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.entries.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Returns the parameters advertised with `keyword`.
    #[must_use]
    pub fn params(&self, keyword: &str) -> Option<&[String]> {
        self.entries
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// Returns the advertised message size limit; `SIZE 0` means no limit.
    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.params("SIZE")?
            .first()?
            .parse()
            .ok()
            .filter(|&limit| limit > 0)
    }

    /// Returns the recognized authentication mechanisms, in server order.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.params("AUTH")
            .unwrap_or_default()
            .iter()
            .filter_map(|m| AuthMechanism::parse(m))
            .collect()
    }

    /// Returns true if no extension was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over keywords and their parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(keyword, params)| (keyword.as_str(), params.as_slice()))
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
    /// CRAM-MD5 - challenge-response
    CramMd5,
    /// `XOAUTH2` - `OAuth2` bearer token (Google/Microsoft)
    XOAuth2,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "XOAUTH2" => Some(Self::XOAuth2),
            _ => None,
        }
    }

    /// Returns the keyword used in `AUTH` commands and EHLO replies.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
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
    use crate::types::ReplyCode;

    fn ehlo(lines: &[&str]) -> Extensions {
        let message = lines.iter().map(ToString::to_string).collect();
        Extensions::from_ehlo(&Reply::new(ReplyCode::OK, message))
    }

    mod extensions_tests {
        use super::*;

        #[test]
        fn greeting_line_skipped() {
            let ext = ehlo(&["smtp.example.com Hello", "PIPELINING"]);
            assert!(ext.supports("PIPELINING"));
            assert!(!ext.supports("SMTP.EXAMPLE.COM"));
        }

        #[test]
        fn keywords_case_insensitive() {
            let ext = ehlo(&["mx", "starttls", "8bitmime"]);
            assert!(ext.supports("STARTTLS"));
            assert!(ext.supports("8BITMIME"));
            assert!(ext.supports("StartTLS"));
        }

        #[test]
        fn params_kept() {
            let ext = ehlo(&["mx", "AUTH PLAIN LOGIN CRAM-MD5"]);
            assert_eq!(
                ext.params("auth").unwrap(),
                &["PLAIN".to_string(), "LOGIN".to_string(), "CRAM-MD5".to_string()]
            );
            assert_eq!(
                ext.auth_mechanisms(),
                vec![
                    AuthMechanism::Plain,
                    AuthMechanism::Login,
                    AuthMechanism::CramMd5
                ]
            );
        }

        #[test]
        fn unknown_mechanisms_ignored() {
            let ext = ehlo(&["mx", "AUTH GSSAPI NTLM PLAIN"]);
            assert_eq!(ext.auth_mechanisms(), vec![AuthMechanism::Plain]);
        }

        #[test]
        fn legacy_auth_folded() {
            let ext = ehlo(&["mx", "AUTH=LOGIN PLAIN"]);
            assert_eq!(
                ext.auth_mechanisms(),
                vec![AuthMechanism::Login, AuthMechanism::Plain]
            );
        }

        #[test]
        fn standard_auth_wins_over_legacy() {
            let ext = ehlo(&["mx", "AUTH=LOGIN", "AUTH CRAM-MD5"]);
            assert_eq!(ext.auth_mechanisms(), vec![AuthMechanism::CramMd5]);
        }

        #[test]
        fn size_limit() {
            assert_eq!(ehlo(&["mx", "SIZE 52428800"]).max_size(), Some(52_428_800));
            assert_eq!(ehlo(&["mx", "SIZE 0"]).max_size(), None);
            assert_eq!(ehlo(&["mx", "SIZE"]).max_size(), None);
            assert_eq!(ehlo(&["mx"]).max_size(), None);
        }

        #[test]
        fn helo_only_is_empty() {
            let ext = ehlo(&["mx"]);
            assert!(ext.is_empty());
            assert_eq!(ext.iter().count(), 0);
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn parse() {
            assert_eq!(AuthMechanism::parse("PLAIN"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse("LOGIN"), Some(AuthMechanism::Login));
            assert_eq!(
                AuthMechanism::parse("cram-md5"),
                Some(AuthMechanism::CramMd5)
            );
            assert_eq!(
                AuthMechanism::parse("XOAUTH2"),
                Some(AuthMechanism::XOAuth2)
            );
            assert_eq!(AuthMechanism::parse("UNKNOWN"), None);
        }

        #[test]
        fn keyword() {
            assert_eq!(AuthMechanism::Plain.keyword(), "PLAIN");
            assert_eq!(AuthMechanism::CramMd5.to_string(), "CRAM-MD5");
        }
    }
}
