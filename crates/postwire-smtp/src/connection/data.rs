//! DATA payload transparency (RFC 5321 §4.5.2).

use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the start of a line.
    LineStart,
    /// Inside a line.
    Normal,
    /// Just saw CR.
    SawCr,
}

/// Streaming dot-stuffer.
///
/// Doubles a `.` at the start of every line and terminates the payload
/// with `CRLF.CRLF`. Input may arrive in arbitrary chunks; state carries
/// across calls so a line split between chunks is still handled.
#[derive(Debug, Clone)]
pub struct DotStuffer {
    state: State,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates a stuffer positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::LineStart,
        }
    }

    /// Appends the stuffed form of `input` to `out`.
    pub fn stuff(&mut self, input: &[u8], out: &mut BytesMut) {
        out.reserve(input.len() + 8);
        for &byte in input {
            if byte == b'.' && self.state == State::LineStart {
                out.put_u8(b'.');
            }
            out.put_u8(byte);
            self.state = match byte {
                b'\r' => State::SawCr,
                b'\n' => State::LineStart,
                _ => State::Normal,
            };
        }
    }

    /// Appends the end-of-data marker, completing an unterminated last line.
    pub fn finish(&mut self, out: &mut BytesMut) {
        match self.state {
            State::LineStart => {}
            State::SawCr => out.put_u8(b'\n'),
            State::Normal => out.put_slice(b"\r\n"),
        }
        out.put_slice(b".\r\n");
        self.state = State::LineStart;
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

    fn stuff_all(chunks: &[&[u8]]) -> Vec<u8> {
        let mut stuffer = DotStuffer::new();
        let mut out = BytesMut::new();
        for chunk in chunks {
            stuffer.stuff(chunk, &mut out);
        }
        stuffer.finish(&mut out);
        out.to_vec()
    }

    #[test]
    fn test_leading_dots_doubled() {
        assert_eq!(
            stuff_all(&[b".hidden\r\nok\r\n..two\r\n"]),
            b"..hidden\r\nok\r\n...two\r\n.\r\n"
        );
    }

    #[test]
    fn test_inner_dots_untouched() {
        assert_eq!(stuff_all(&[b"a.b\r\n"]), b"a.b\r\n.\r\n");
    }

    #[test]
    fn test_lone_dot_line_cannot_terminate_early() {
        assert_eq!(stuff_all(&[b"x\r\n.\r\ny\r\n"]), b"x\r\n..\r\ny\r\n.\r\n");
    }

    #[test]
    fn test_split_across_chunks() {
        assert_eq!(stuff_all(&[b"a\r", b"\n", b".b"]), b"a\r\n..b\r\n.\r\n");
    }

    #[test]
    fn test_unterminated_last_line() {
        assert_eq!(stuff_all(&[b"no newline"]), b"no newline\r\n.\r\n");
        assert_eq!(stuff_all(&[b"cr only\r"]), b"cr only\r\n.\r\n");
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(stuff_all(&[]), b".\r\n");
    }

    fn body_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(prop::sample::select(vec![b'.', b'a', b'\r', b'\n']), 0..200)
    }

    proptest! {
        #[test]
        fn chunking_does_not_matter(
            body in body_bytes(),
            split in 0usize..200,
        ) {
            let split = split.min(body.len());
            let (head, tail) = body.split_at(split);
            prop_assert_eq!(stuff_all(&[body.as_slice()]), stuff_all(&[head, tail]));
        }

        #[test]
        fn no_early_terminator(
            body in body_bytes(),
        ) {
            let out = stuff_all(&[body.as_slice()]);
            let terminator = b"\r\n.\r\n";
            let first = out.windows(terminator.len()).position(|w| w == terminator);
            if let Some(pos) = first {
                prop_assert_eq!(pos + terminator.len(), out.len());
            }
        }
    }
}
