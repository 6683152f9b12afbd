//! Environment injected into every spawned child to encourage colour and
//! progress output.

pub const TERM_VAR: &str = "TERM";
pub const COLORTERM_VAR: &str = "COLORTERM";
pub const FORCE_COLOR_VAR: &str = "FORCE_COLOR";
pub const CLICOLOR_FORCE_VAR: &str = "CLICOLOR_FORCE";
pub const PYTHONUNBUFFERED_VAR: &str = "PYTHONUNBUFFERED";

/// Debug switch for extra PTY diagnostics.
pub const PTY_DEBUG_VAR: &str = "TERMRUN_PTY_DEBUG";

pub const DEFAULT_TERM: &str = "xterm-256color";

/// Colour-forcing variables for a child, in injection order.
///
/// Caller-supplied variables are applied after these and win on conflict.
pub fn color_env(term: &str) -> Vec<(String, String)> {
    let term = if term.trim().is_empty() {
        DEFAULT_TERM
    } else {
        term.trim()
    };

    let mut vars = vec![
        (TERM_VAR.to_string(), term.to_string()),
        (COLORTERM_VAR.to_string(), "truecolor".to_string()),
        (FORCE_COLOR_VAR.to_string(), "1".to_string()),
        (CLICOLOR_FORCE_VAR.to_string(), "1".to_string()),
        (PYTHONUNBUFFERED_VAR.to_string(), "1".to_string()),
    ];

    if cfg!(windows) {
        vars.push(("PYTHONIOENCODING".to_string(), "utf-8".to_string()));
        vars.push(("PYTHONUTF8".to_string(), "1".to_string()));
        vars.push(("ANSICON".to_string(), "1".to_string()));
    }

    vars
}

pub fn pty_debug_enabled() -> bool {
    std::env::var_os(PTY_DEBUG_VAR).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(String, String)], key: &str) -> Option<&'a str> {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn injects_truecolor_term_and_force_color() {
        let vars = color_env("xterm-256color");
        assert_eq!(lookup(&vars, TERM_VAR), Some("xterm-256color"));
        assert_eq!(lookup(&vars, COLORTERM_VAR), Some("truecolor"));
        assert_eq!(lookup(&vars, FORCE_COLOR_VAR), Some("1"));
    }

    #[test]
    fn blank_term_falls_back_to_default() {
        let vars = color_env("  ");
        assert_eq!(lookup(&vars, TERM_VAR), Some(DEFAULT_TERM));
    }

    #[test]
    fn utf8_variables_only_on_windows() {
        let vars = color_env(DEFAULT_TERM);
        assert_eq!(lookup(&vars, "PYTHONUTF8").is_some(), cfg!(windows));
    }
}
