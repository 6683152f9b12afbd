use crate::style::{Color, StyleState, TextRun};
use std::fmt::Write as _;

fn sgr_codes(style: &StyleState, default_fg: Color) -> Vec<String> {
    let mut codes = Vec::new();
    let flags = [
        (style.bold, "1"),
        (style.dim, "2"),
        (style.italic, "3"),
        (style.underline, "4"),
        (style.blink, "5"),
        (style.reverse, "7"),
        (style.hidden, "8"),
        (style.strikethrough, "9"),
    ];
    codes.extend(flags.iter().filter(|(on, _)| *on).map(|(_, code)| code.to_string()));
    if let Some(fg) = style.fg.filter(|fg| *fg != default_fg) {
        codes.push(format!("38;2;{};{};{}", fg.r, fg.g, fg.b));
    }
    if let Some(bg) = style.bg {
        codes.push(format!("48;2;{};{};{}", bg.r, bg.g, bg.b));
    }
    codes
}

/// Render runs back into SGR-annotated text for a real terminal.
///
/// Colours are written as 24-bit values. A run in the default style is written
/// bare, and the output always ends with the attributes reset.
pub fn runs_to_ansi(runs: &[TextRun], default_fg: Color) -> String {
    let mut out = String::new();
    let mut styled = false;
    let mut previous: Option<StyleState> = None;
    for run in runs {
        if previous != Some(run.style) {
            let codes = sgr_codes(&run.style, default_fg);
            if codes.is_empty() {
                if styled {
                    out.push_str("\x1b[0m");
                }
                styled = false;
            } else {
                let _ = write!(out, "\x1b[0;{}m", codes.join(";"));
                styled = true;
            }
            previous = Some(run.style);
        }
        out.push_str(&run.text);
    }
    if styled {
        out.push_str("\x1b[0m");
    }
    out
}
