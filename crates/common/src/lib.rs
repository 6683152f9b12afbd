//! Shared utilities for termrun components

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod env;
pub mod paths;
pub mod settings;
pub mod sink;

pub use settings::{
    BatchSettings, CacheSettings, EngineSettings, PumpSettings, RenderSettings, SettingsError,
    SpawnSettings, StrategyPreference, TtyShimMode,
};
pub use sink::{ChannelSink, OutputSink, SinkEvent};

/// Identifier for one spawned child, unique within the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl HandleId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Parse the usual truthy/falsy spellings used by env overrides.
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match normalize_bool(raw)?.as_ref() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_bool(raw: &str) -> Option<Cow<'_, str>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Cow::Owned(trimmed.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_ids_are_unique_and_increasing() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn handle_id_display_is_prefixed() {
        assert_eq!(HandleId::from_raw(7).to_string(), "proc-7");
    }

    #[test]
    fn parses_bool_flags() {
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag(" 0 "), Some(false));
        assert_eq!(parse_bool_flag(""), None);
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
