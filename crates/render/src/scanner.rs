//! Tokenizer for the escape-sequence grammar.
//!
//! Recognized forms, all introduced by `ESC` (0x1b):
//!
//! * CSI: `ESC [` parameter bytes (0x30-0x3f), intermediate bytes (0x20-0x2f),
//!   one final byte (0x40-0x7e)
//! * string controls: `ESC ]` (OSC), `ESC P`, `ESC X`, `ESC ^`, `ESC _`, terminated
//!   by BEL or `ESC \`; any other `ESC` inside the body aborts the string
//! * nF escapes: `ESC` intermediates (0x20-0x2f) then a final byte (0x30-0x7e)
//! * two-character escapes: `ESC` followed by one byte in 0x30-0x7e
//!
//! Malformed input never produces an error. An `ESC` that cannot start any of
//! the forms above becomes a one-byte [`Token::Malformed`] and scanning resumes
//! right after it. A CSI interrupted by another `ESC` is dropped whole. A
//! sequence cut off by the end of input becomes [`Token::Incomplete`] so a
//! streaming caller can carry it into the next chunk.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Csi {
        params: &'a str,
        intermediates: &'a str,
        final_byte: char,
    },
    /// OSC and the other string controls, terminator included.
    StringControl(&'a str),
    /// nF and two-character escapes.
    Escape(&'a str),
    /// A stray `ESC`, or a CSI abandoned for a new `ESC`.
    Malformed(&'a str),
    /// A sequence truncated by the end of input; always the last token.
    Incomplete(&'a str),
}

impl Token<'_> {
    /// Whether the token is a complete escape sequence.
    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            Token::Csi { .. } | Token::StringControl(_) | Token::Escape(_)
        )
    }
}

pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn take(&mut self, end: usize) -> &'a str {
        let slice = &self.input[self.pos..end];
        self.pos = end;
        slice
    }

    fn incomplete(&mut self) -> Token<'a> {
        Token::Incomplete(self.take(self.input.len()))
    }

    fn malformed(&mut self) -> Token<'a> {
        Token::Malformed(self.take(self.pos + 1))
    }

    fn scan_csi(&mut self) -> Token<'a> {
        let bytes = self.bytes();
        let start = self.pos;
        let params_start = start + 2;
        let mut i = params_start;
        while i < bytes.len() && (0x30..=0x3f).contains(&bytes[i]) {
            i += 1;
        }
        let params_end = i;
        while i < bytes.len() && (0x20..=0x2f).contains(&bytes[i]) {
            i += 1;
        }
        let intermediates_end = i;
        match bytes.get(i) {
            None => self.incomplete(),
            Some(&b) if (0x40..=0x7e).contains(&b) => {
                self.pos = i + 1;
                Token::Csi {
                    params: &self.input[params_start..params_end],
                    intermediates: &self.input[params_end..intermediates_end],
                    final_byte: char::from(b),
                }
            }
            // A new ESC abandons the partial sequence.
            Some(&ESC) => Token::Malformed(self.take(i)),
            Some(_) => self.malformed(),
        }
    }

    fn scan_string_control(&mut self) -> Token<'a> {
        let bytes = self.bytes();
        let mut i = self.pos + 2;
        while i < bytes.len() {
            match bytes[i] {
                BEL => return Token::StringControl(self.take(i + 1)),
                ESC => {
                    return match bytes.get(i + 1) {
                        None => self.incomplete(),
                        Some(b'\\') => Token::StringControl(self.take(i + 2)),
                        Some(_) => Token::StringControl(self.take(i)),
                    }
                }
                _ => i += 1,
            }
        }
        self.incomplete()
    }

    fn scan_nf(&mut self) -> Token<'a> {
        let bytes = self.bytes();
        let mut i = self.pos + 1;
        while i < bytes.len() && (0x20..=0x2f).contains(&bytes[i]) {
            i += 1;
        }
        match bytes.get(i) {
            None => self.incomplete(),
            Some(&b) if (0x30..=0x7e).contains(&b) => Token::Escape(self.take(i + 1)),
            Some(_) => self.malformed(),
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let bytes = self.bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        if bytes[self.pos] != ESC {
            let end = bytes[self.pos..]
                .iter()
                .position(|&b| b == ESC)
                .map_or(bytes.len(), |offset| self.pos + offset);
            return Some(Token::Text(self.take(end)));
        }

        let token = match bytes.get(self.pos + 1) {
            None => self.incomplete(),
            Some(b'[') => self.scan_csi(),
            Some(b']' | b'P' | b'X' | b'^' | b'_') => self.scan_string_control(),
            Some(0x20..=0x2f) => self.scan_nf(),
            Some(0x30..=0x7e) => Token::Escape(self.take(self.pos + 2)),
            Some(_) => self.malformed(),
        };
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        Scanner::new(input).collect()
    }

    #[test]
    fn splits_text_and_csi() {
        assert_eq!(
            tokens("a\x1b[1;31mb"),
            vec![
                Token::Text("a"),
                Token::Csi {
                    params: "1;31",
                    intermediates: "",
                    final_byte: 'm'
                },
                Token::Text("b"),
            ]
        );
    }

    #[test]
    fn private_and_intermediate_csi() {
        assert_eq!(
            tokens("\x1b[?25l\x1b[2 q"),
            vec![
                Token::Csi {
                    params: "?25",
                    intermediates: "",
                    final_byte: 'l'
                },
                Token::Csi {
                    params: "2",
                    intermediates: " ",
                    final_byte: 'q'
                },
            ]
        );
    }

    #[test]
    fn osc_with_both_terminators() {
        assert_eq!(
            tokens("\x1b]0;title\x07x\x1b]8;;http://a\x1b\\y"),
            vec![
                Token::StringControl("\x1b]0;title\x07"),
                Token::Text("x"),
                Token::StringControl("\x1b]8;;http://a\x1b\\"),
                Token::Text("y"),
            ]
        );
    }

    #[test]
    fn osc_aborted_by_new_escape() {
        assert_eq!(
            tokens("\x1b]0;t\x1b[0m"),
            vec![
                Token::StringControl("\x1b]0;t"),
                Token::Csi {
                    params: "0",
                    intermediates: "",
                    final_byte: 'm'
                },
            ]
        );
    }

    #[test]
    fn short_escapes() {
        assert_eq!(
            tokens("\x1b(B\x1b7\x1b="),
            vec![
                Token::Escape("\x1b(B"),
                Token::Escape("\x1b7"),
                Token::Escape("\x1b="),
            ]
        );
    }

    #[test]
    fn truncated_sequences_are_incomplete() {
        assert_eq!(tokens("ab\x1b"), vec![Token::Text("ab"), Token::Incomplete("\x1b")]);
        assert_eq!(tokens("\x1b[38;5"), vec![Token::Incomplete("\x1b[38;5")]);
        assert_eq!(tokens("\x1b]0;ti"), vec![Token::Incomplete("\x1b]0;ti")]);
        assert_eq!(tokens("\x1b]0;ti\x1b"), vec![Token::Incomplete("\x1b]0;ti\x1b")]);
    }

    #[test]
    fn malformed_escape_consumes_only_escape_byte() {
        assert_eq!(
            tokens("\x1b[12\nrest"),
            vec![Token::Malformed("\x1b"), Token::Text("[12\nrest")]
        );
        assert_eq!(
            tokens("\x1b\x1b[m"),
            vec![
                Token::Malformed("\x1b"),
                Token::Csi {
                    params: "",
                    intermediates: "",
                    final_byte: 'm'
                },
            ]
        );
        assert_eq!(tokens("\x1bé"), vec![Token::Malformed("\x1b"), Token::Text("é")]);
        assert_eq!(
            tokens("\x1b[3\x1b[0mx"),
            vec![
                Token::Malformed("\x1b[3"),
                Token::Csi {
                    params: "0",
                    intermediates: "",
                    final_byte: 'm'
                },
                Token::Text("x"),
            ]
        );
    }
}
