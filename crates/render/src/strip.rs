use crate::scanner::{Scanner, Token};

/// Remove every escape sequence from `text` without tracking style.
///
/// Complete sequences and stray `ESC` bytes are dropped. A sequence truncated by
/// the end of `text` is kept verbatim, since it is not yet known to be one.
pub fn strip(text: &str) -> String {
    if !text.contains('\x1b') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for token in Scanner::new(text) {
        match token {
            Token::Text(plain) | Token::Incomplete(plain) => out.push_str(plain),
            Token::Csi { .. }
            | Token::StringControl(_)
            | Token::Escape(_)
            | Token::Malformed(_) => {}
        }
    }
    out
}
