//! Interpreter detection.

use once_cell::sync::Lazy;
use regex::Regex;

/// Flag that introduces an inline program.
pub const INLINE_CODE_FLAG: &str = "-c";

const EXACT_NAMES: [&str; 4] = ["python", "python3", "pythonw", "py"];

/// `python3.12`, `python2.7`, `python3.11w`, ...
static VERSIONED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pythonw?\d+(\.\d+)*w?$").expect("valid interpreter regex"));

/// Final path component of `program`, lowercased, without a `.exe` suffix.
fn binary_stem(program: &str) -> String {
    let name = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Whether `program` (a bare name or a path) names a supported interpreter.
pub fn is_supported_interpreter(program: &str) -> bool {
    let stem = binary_stem(program);
    if stem.is_empty() {
        return false;
    }
    EXACT_NAMES.contains(&stem.as_str()) || VERSIONED_NAME.is_match(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_names() {
        for name in ["python", "python3", "pythonw", "py"] {
            assert!(is_supported_interpreter(name), "{name}");
        }
    }

    #[test]
    fn matches_paths_and_windows_suffix() {
        assert!(is_supported_interpreter("/opt/venv/bin/python3"));
        assert!(is_supported_interpreter(r"C:\Python311\python.exe"));
        assert!(is_supported_interpreter(r"C:\Python311\PYTHONW.EXE"));
    }

    #[test]
    fn matches_versioned_names() {
        assert!(is_supported_interpreter("python3.12"));
        assert!(is_supported_interpreter("/usr/bin/python2.7"));
    }

    #[test]
    fn rejects_other_programs() {
        for name in ["pip", "ipython", "python-config", "node", "", "/usr/bin/"] {
            assert!(!is_supported_interpreter(name), "{name}");
        }
    }
}
