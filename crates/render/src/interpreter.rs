//! Streaming ANSI interpreter.
//!
//! One interpreter serves one logical output stream. Its [`StyleState`] persists
//! across [`AnsiInterpreter::feed`] calls, and so does an escape sequence cut in
//! half by a chunk boundary.

use crate::scanner::{Scanner, Token};
use crate::style::{Color, StyleState, TextRun};
use std::borrow::Cow;

/// Longest truncated sequence carried into the next chunk. Anything longer is
/// treated as text.
pub const MAX_PENDING_ESCAPE: usize = 4096;

#[derive(Debug, Clone)]
pub struct AnsiInterpreter {
    style: StyleState,
    default_fg: Color,
    pending: String,
}

impl AnsiInterpreter {
    pub fn new(default_fg: Color) -> Self {
        Self {
            style: StyleState::reset(default_fg),
            default_fg,
            pending: String::new(),
        }
    }

    pub fn style(&self) -> &StyleState {
        &self.style
    }

    pub fn default_foreground(&self) -> Color {
        self.default_fg
    }

    /// Put the style back to the `SGR 0` state.
    pub fn reset_style(&mut self) {
        self.style = StyleState::reset(self.default_fg);
    }

    /// Whether a truncated escape sequence is waiting for the next chunk.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Interpret `chunk`, returning the styled runs it produces.
    pub fn feed(&mut self, chunk: &str) -> Vec<TextRun> {
        let input: Cow<'_, str> = if self.pending.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.push_str(chunk);
            Cow::Owned(joined)
        };

        let mut runs = RunBuilder::default();
        for token in Scanner::new(&input) {
            match token {
                Token::Text(text) => runs.push(text, &self.style),
                Token::Csi {
                    params,
                    intermediates,
                    final_byte,
                } => {
                    if final_byte == 'm' && intermediates.is_empty() {
                        self.apply_sgr(params);
                    }
                    // Cursor movement and erase sequences have no effect on
                    // an append-only stream.
                }
                Token::StringControl(_) | Token::Escape(_) | Token::Malformed(_) => {}
                Token::Incomplete(rest) => {
                    if rest.len() <= MAX_PENDING_ESCAPE {
                        self.pending = rest.to_string();
                    } else {
                        log::debug!(
                            "dropping unterminated escape sequence of {} bytes",
                            rest.len()
                        );
                        runs.push(&rest[1..], &self.style);
                    }
                }
            }
        }
        runs.finish()
    }

    /// End of stream: discard any truncated sequence still pending.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            log::debug!(
                "discarding {} bytes of unterminated escape sequence",
                self.pending.len()
            );
            self.pending.clear();
        }
    }

    fn apply_sgr(&mut self, params: &str) {
        // Private-marker forms such as `CSI > 4 ; 2 m` are not SGR.
        if params.starts_with(['<', '=', '>', '?']) {
            return;
        }
        let codes: Vec<Option<u32>> = if params.is_empty() {
            vec![Some(0)]
        } else {
            params
                .split([';', ':'])
                .map(|p| if p.is_empty() { Some(0) } else { p.parse().ok() })
                .collect()
        };

        let style = &mut self.style;
        let mut i = 0;
        while i < codes.len() {
            let Some(code) = codes[i] else {
                i += 1;
                continue;
            };
            match code {
                0 => *style = StyleState::reset(self.default_fg),
                1 => style.bold = true,
                2 => style.dim = true,
                3 => style.italic = true,
                4 => style.underline = true,
                5 => style.blink = true,
                7 => style.reverse = true,
                8 => style.hidden = true,
                9 => style.strikethrough = true,
                22 => {
                    style.bold = false;
                    style.dim = false;
                }
                23 => style.italic = false,
                24 => style.underline = false,
                25 => style.blink = false,
                27 => style.reverse = false,
                28 => style.hidden = false,
                29 => style.strikethrough = false,
                30..=37 => style.fg = Some(Color::ansi16((code - 30) as u8)),
                90..=97 => style.fg = Some(Color::ansi16((code - 90) as u8 + 8)),
                40..=47 => style.bg = Some(Color::ansi16((code - 40) as u8)),
                100..=107 => style.bg = Some(Color::ansi16((code - 100) as u8 + 8)),
                38 | 48 => {
                    let (color, consumed) = extended_color(&codes[i + 1..]);
                    i += consumed;
                    if let Some(color) = color {
                        if code == 38 {
                            style.fg = Some(color);
                        } else {
                            style.bg = Some(color);
                        }
                    }
                }
                39 => style.fg = Some(self.default_fg),
                49 => style.bg = None,
                _ => {}
            }
            i += 1;
        }
    }
}

fn channel(value: Option<u32>) -> Option<u8> {
    value.and_then(|v| u8::try_from(v).ok())
}

/// Decode the parameters following 38/48. Returns the colour, if well formed,
/// and how many parameters the mode consumed.
fn extended_color(rest: &[Option<u32>]) -> (Option<Color>, usize) {
    match rest.first() {
        None => (None, 0),
        Some(Some(5)) => match rest.get(1) {
            Some(&index) => (channel(index).map(Color::indexed), 2),
            None => (None, 1),
        },
        Some(Some(2)) => {
            if rest.len() < 4 {
                return (None, rest.len());
            }
            let color = match (channel(rest[1]), channel(rest[2]), channel(rest[3])) {
                (Some(r), Some(g), Some(b)) => Some(Color::rgb(r, g, b)),
                _ => None,
            };
            (color, 4)
        }
        Some(_) => (None, 1),
    }
}

/// Collects runs, merging neighbours with the same style and skipping empty text.
#[derive(Default)]
struct RunBuilder {
    runs: Vec<TextRun>,
}

impl RunBuilder {
    fn push(&mut self, text: &str, style: &StyleState) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.runs.last_mut() {
            if last.style == *style {
                last.text.push_str(text);
                return;
            }
        }
        self.runs.push(TextRun::new(text, *style));
    }

    fn finish(self) -> Vec<TextRun> {
        self.runs
    }
}
