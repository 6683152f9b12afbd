//! Colours, SGR attribute state and styled text runs.

use serde::{Serialize, Serializer};
use std::fmt;

/// A colour normalized to 24-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`.
    pub fn from_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    /// Colour for a 16-colour index (0-7 normal, 8-15 bright).
    pub fn ansi16(index: u8) -> Self {
        XTERM_16[usize::from(index & 0x0f)]
    }

    /// Colour for an 8-bit palette index.
    pub fn indexed(index: u8) -> Self {
        match index {
            0..=15 => Self::ansi16(index),
            16..=231 => {
                let i = index - 16;
                Self::rgb((i / 36) * 51, ((i / 6) % 6) * 51, (i % 6) * 51)
            }
            232..=255 => {
                let gray = 8 + (index - 232) * 10;
                Self::rgb(gray, gray, gray)
            }
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// xterm's default 16-colour table.
pub const XTERM_16: [Color; 16] = [
    Color::rgb(0, 0, 0),
    Color::rgb(205, 0, 0),
    Color::rgb(0, 205, 0),
    Color::rgb(205, 205, 0),
    Color::rgb(0, 0, 238),
    Color::rgb(205, 0, 205),
    Color::rgb(0, 205, 205),
    Color::rgb(229, 229, 229),
    Color::rgb(127, 127, 127),
    Color::rgb(255, 0, 0),
    Color::rgb(0, 255, 0),
    Color::rgb(255, 255, 0),
    Color::rgb(92, 92, 255),
    Color::rgb(255, 0, 255),
    Color::rgb(0, 255, 255),
    Color::rgb(255, 255, 255),
];

/// Foreground used when settings carry no usable value.
pub const DEFAULT_FOREGROUND: Color = Color::rgb(0xe5, 0xe5, 0xe5);

/// SGR attributes in effect at one point of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct StyleState {
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub blink: bool,
    pub reverse: bool,
    pub hidden: bool,
    pub fg: Option<Color>,
    pub bg: Option<Color>,
}

impl StyleState {
    /// State after `SGR 0`: no attributes, default foreground, no background.
    pub fn reset(default_fg: Color) -> Self {
        Self {
            fg: Some(default_fg),
            ..Self::default()
        }
    }

    pub fn is_reset(&self, default_fg: Color) -> bool {
        *self == Self::reset(default_fg)
    }
}

/// A text fragment with the style it was emitted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub style: StyleState,
}

impl TextRun {
    pub fn new(text: impl Into<String>, style: StyleState) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}
