//! Engine settings: defaults, YAML file, then `TERMRUN_*` environment overrides.

use crate::{parse_bool_flag, paths};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_ENV_VAR: &str = "TERMRUN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid YAML in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl SettingsError {
    fn invalid(key: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Which spawn strategy the caller wants; `Auto` defers to the capability probe.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyPreference {
    #[default]
    Auto,
    NativePty,
    PtyHelper,
    ConsolePty,
    PlainPipes,
}

impl StrategyPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::NativePty => "native-pty",
            Self::PtyHelper => "pty-helper",
            Self::ConsolePty => "console-pty",
            Self::PlainPipes => "plain-pipes",
        }
    }
}

impl FromStr for StrategyPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(Self::Auto),
            "native-pty" | "pty" => Ok(Self::NativePty),
            "pty-helper" => Ok(Self::PtyHelper),
            "console-pty" => Ok(Self::ConsolePty),
            "plain-pipes" | "pipes" => Ok(Self::PlainPipes),
            other => Err(format!("invalid spawn strategy: {other}")),
        }
    }
}

impl fmt::Display for StrategyPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the interpreter isatty shim is applied to argv.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TtyShimMode {
    /// Only when the child is launched without a real terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl TtyShimMode {
    pub fn parse_insensitive(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            other => parse_bool_flag(other).map(|on| if on { Self::Always } else { Self::Never }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SpawnSettings {
    pub strategy: StrategyPreference,
    pub tty_shim: TtyShimMode,
    pub term: String,
    pub rows: u16,
    pub cols: u16,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyPreference::Auto,
            tty_shim: TtyShimMode::Auto,
            term: crate::env::DEFAULT_TERM.to_string(),
            rows: 40,
            cols: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PumpSettings {
    pub chunk_size: usize,
    pub poll_timeout_ms: u64,
    pub idle_sleep_ms: u64,
    pub drain_reads: u32,
    /// Encoding labels tried after UTF-8; empty means the platform default list.
    pub fallback_encodings: Vec<String>,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            poll_timeout_ms: 10,
            idle_sleep_ms: 10,
            drain_reads: 5,
            fallback_encodings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BatchSettings {
    pub tick_ms: u64,
    pub normal_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub size_threshold_bytes: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            tick_ms: 30,
            normal_interval_ms: 50,
            progress_interval_ms: 200,
            size_threshold_bytes: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSettings {
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RenderSettings {
    pub default_foreground: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            default_foreground: "#e5e5e5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSettings {
    pub spawn: SpawnSettings,
    pub pump: PumpSettings,
    pub batch: BatchSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
}

impl EngineSettings {
    /// Resolve settings from an explicit file, `TERMRUN_CONFIG`, or the default
    /// config location, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Fails when an explicitly named file is unreadable, the YAML is invalid, or
    /// an override carries an invalid value.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match Self::config_path(explicit) {
            Some((path, required)) => match fs::read_to_string(&path) {
                Ok(raw) => Self::from_yaml(&path, &raw)?,
                Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
                    Self::default()
                }
                Err(source) => return Err(SettingsError::Read { path, source }),
            },
            None => Self::default(),
        };

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    fn config_path(explicit: Option<&Path>) -> Option<(PathBuf, bool)> {
        if let Some(path) = explicit {
            return Some((path.to_path_buf(), true));
        }
        if let Ok(raw) = env::var(CONFIG_ENV_VAR) {
            if !raw.trim().is_empty() {
                return Some((PathBuf::from(raw.trim()), true));
            }
        }
        paths::config_file().ok().map(|path| (path, false))
    }

    pub fn from_yaml(path: &Path, raw: &str) -> Result<Self, SettingsError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| SettingsError::Parse {
            path: path.to_path_buf(),
            message: err.to_string().trim().to_string(),
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), SettingsError> {
        if let Ok(raw) = env::var("TERMRUN_SPAWN_STRATEGY") {
            self.spawn.strategy = raw
                .parse()
                .map_err(|_| SettingsError::invalid("TERMRUN_SPAWN_STRATEGY", raw.clone()))?;
        }
        if let Ok(raw) = env::var("TERMRUN_TTY_SHIM") {
            self.spawn.tty_shim = TtyShimMode::parse_insensitive(&raw)
                .ok_or_else(|| SettingsError::invalid("TERMRUN_TTY_SHIM", raw.clone()))?;
        }
        if let Ok(raw) = env::var("TERMRUN_CACHE_CAPACITY") {
            self.cache.capacity = parse_number("TERMRUN_CACHE_CAPACITY", &raw)?;
        }
        if let Ok(raw) = env::var("TERMRUN_BATCH_TICK_MS") {
            self.batch.tick_ms = parse_number("TERMRUN_BATCH_TICK_MS", &raw)?;
        }
        if let Ok(raw) = env::var("TERMRUN_PROGRESS_INTERVAL_MS") {
            self.batch.progress_interval_ms = parse_number("TERMRUN_PROGRESS_INTERVAL_MS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.batch.tick_ms == 0 {
            return Err(SettingsError::invalid("batch.tick_ms", "0"));
        }
        if self.batch.normal_interval_ms == 0 {
            return Err(SettingsError::invalid("batch.normal_interval_ms", "0"));
        }
        if self.batch.progress_interval_ms < self.batch.normal_interval_ms {
            return Err(SettingsError::invalid(
                "batch.progress_interval_ms",
                format!(
                    "{} (must be >= normal_interval_ms {})",
                    self.batch.progress_interval_ms, self.batch.normal_interval_ms
                ),
            ));
        }
        if self.pump.chunk_size == 0 {
            return Err(SettingsError::invalid("pump.chunk_size", "0"));
        }
        if self.spawn.rows == 0 || self.spawn.cols == 0 {
            return Err(SettingsError::invalid(
                "spawn.rows/cols",
                format!("{}x{}", self.spawn.rows, self.spawn.cols),
            ));
        }
        if !is_hex_color(&self.render.default_foreground) {
            return Err(SettingsError::invalid(
                "render.default_foreground",
                self.render.default_foreground.clone(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, SettingsError> {
    raw.trim()
        .parse()
        .map_err(|_| SettingsError::invalid(key, raw))
}

fn is_hex_color(raw: &str) -> bool {
    raw.strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OVERRIDE_VARS: [&str; 6] = [
        "TERMRUN_SPAWN_STRATEGY",
        "TERMRUN_TTY_SHIM",
        "TERMRUN_CACHE_CAPACITY",
        "TERMRUN_BATCH_TICK_MS",
        "TERMRUN_PROGRESS_INTERVAL_MS",
        CONFIG_ENV_VAR,
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = OVERRIDE_VARS
                .iter()
                .map(|key| (*key, env::var(key).ok()))
                .collect();
            for key in OVERRIDE_VARS {
                env::remove_var(key);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.batch.tick_ms, 30);
        assert_eq!(settings.batch.normal_interval_ms, 50);
        assert_eq!(settings.batch.progress_interval_ms, 200);
        assert_eq!(settings.spawn.strategy, StrategyPreference::Auto);
        assert_eq!(settings.spawn.tty_shim, TtyShimMode::Auto);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let raw = "batch:\n  progress_interval_ms: 500\ncache:\n  capacity: 8\n";
        let settings = EngineSettings::from_yaml(Path::new("cfg.yaml"), raw).unwrap();
        assert_eq!(settings.batch.progress_interval_ms, 500);
        assert_eq!(settings.batch.tick_ms, 30);
        assert_eq!(settings.cache.capacity, 8);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineSettings::from_yaml(Path::new("cfg.yaml"), "batch:\n  bogus: 1\n")
            .unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn strategy_names_round_trip() {
        for pref in [
            StrategyPreference::Auto,
            StrategyPreference::NativePty,
            StrategyPreference::PtyHelper,
            StrategyPreference::ConsolePty,
            StrategyPreference::PlainPipes,
        ] {
            assert_eq!(pref.as_str().parse::<StrategyPreference>().unwrap(), pref);
        }
        assert!("telepathy".parse::<StrategyPreference>().is_err());
    }

    #[test]
    fn rejects_progress_interval_below_normal() {
        let mut settings = EngineSettings::default();
        settings.batch.progress_interval_ms = 10;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_malformed_foreground() {
        let mut settings = EngineSettings::default();
        settings.render.default_foreground = "white".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_after_file() {
        let _guard = EnvGuard::clean();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "spawn:\n  strategy: native-pty\ncache:\n  capacity: 4").unwrap();

        env::set_var("TERMRUN_SPAWN_STRATEGY", "plain_pipes");
        env::set_var("TERMRUN_CACHE_CAPACITY", "0");

        let settings = EngineSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.spawn.strategy, StrategyPreference::PlainPipes);
        assert_eq!(settings.cache.capacity, 0);
    }

    #[test]
    #[serial]
    fn invalid_env_override_is_reported() {
        let _guard = EnvGuard::clean();
        env::set_var("TERMRUN_BATCH_TICK_MS", "soon");

        let err = EngineSettings::load(Some(Path::new("/nonexistent/termrun.yaml")));
        assert!(err.is_err());

        let mut settings = EngineSettings::default();
        let err = settings.apply_env_overrides().unwrap_err();
        assert!(err.to_string().contains("TERMRUN_BATCH_TICK_MS"));
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        let _guard = EnvGuard::clean();
        let err = EngineSettings::load(Some(Path::new("/nonexistent/termrun.yaml"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn tty_shim_accepts_bool_spellings() {
        assert_eq!(TtyShimMode::parse_insensitive("on"), Some(TtyShimMode::Always));
        assert_eq!(TtyShimMode::parse_insensitive("0"), Some(TtyShimMode::Never));
        assert_eq!(TtyShimMode::parse_insensitive("Auto"), Some(TtyShimMode::Auto));
        assert_eq!(TtyShimMode::parse_insensitive("sometimes"), None);
    }
}
