//! TTY capability probing.
//!
//! The probe runs once per prober and is cached for its lifetime. A failed
//! check only demotes the result to the next tier; probing never errors.

use std::fmt;
use std::sync::OnceLock;
use termrun_common::StrategyPreference;

/// How a child gets its standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnStrategy {
    /// openpty/forkpty on POSIX.
    NativePty,
    /// The portable PTY library (ConPTY) on Windows.
    PtyHelper,
    /// Pipes in a new process group with ANSI-forcing environment.
    ConsolePty,
    PlainPipes,
}

impl SpawnStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativePty => "native-pty",
            Self::PtyHelper => "pty-helper",
            Self::ConsolePty => "console-pty",
            Self::PlainPipes => "plain-pipes",
        }
    }

    /// Whether the child is attached to a pseudo-terminal.
    pub fn uses_pty(&self) -> bool {
        matches!(self, Self::NativePty | Self::PtyHelper)
    }

    /// Strategies attempted by `start`, beginning with `self`.
    pub fn fallback_chain(self) -> Vec<SpawnStrategy> {
        match self {
            Self::NativePty => vec![Self::NativePty, Self::PlainPipes],
            Self::PtyHelper => vec![Self::PtyHelper, Self::ConsolePty, Self::PlainPipes],
            Self::ConsolePty => vec![Self::ConsolePty, Self::PlainPipes],
            Self::PlainPipes => vec![Self::PlainPipes],
        }
    }

    /// Strategy forced by configuration, or `None` for auto-detection.
    pub fn from_preference(preference: StrategyPreference) -> Option<Self> {
        match preference {
            StrategyPreference::Auto => None,
            StrategyPreference::NativePty => Some(Self::NativePty),
            StrategyPreference::PtyHelper => Some(Self::PtyHelper),
            StrategyPreference::ConsolePty => Some(Self::ConsolePty),
            StrategyPreference::PlainPipes => Some(Self::PlainPipes),
        }
    }
}

impl fmt::Display for SpawnStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability check.
pub type ProbeCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Cached capability probe.
pub struct CapabilityProber {
    tiers: Vec<(SpawnStrategy, ProbeCheck)>,
    cached: OnceLock<SpawnStrategy>,
}

impl CapabilityProber {
    /// Prober using the host platform's checks.
    pub fn new() -> Self {
        Self::with_checks(platform_checks())
    }

    /// Prober over custom tiers, most preferred first. `PlainPipes` is the
    /// implicit last tier.
    pub fn with_checks(tiers: Vec<(SpawnStrategy, ProbeCheck)>) -> Self {
        Self {
            tiers,
            cached: OnceLock::new(),
        }
    }

    pub fn probe(&self) -> SpawnStrategy {
        *self.cached.get_or_init(|| self.evaluate())
    }

    fn evaluate(&self) -> SpawnStrategy {
        for (strategy, check) in &self.tiers {
            if check() {
                log::debug!("tty probe: {strategy} available");
                return *strategy;
            }
            log::debug!("tty probe: {strategy} unavailable, demoting");
        }
        log::debug!("tty probe: falling back to plain pipes");
        SpawnStrategy::PlainPipes
    }
}

impl Default for CapabilityProber {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide probe result, evaluated on first use.
pub fn probe() -> SpawnStrategy {
    static GLOBAL: OnceLock<CapabilityProber> = OnceLock::new();
    GLOBAL.get_or_init(CapabilityProber::new).probe()
}

fn pty_allocates() -> bool {
    let size = portable_pty::PtySize {
        rows: 1,
        cols: 1,
        pixel_width: 0,
        pixel_height: 0,
    };
    match portable_pty::native_pty_system().openpty(size) {
        Ok(_pair) => true,
        Err(err) => {
            log::debug!("tty probe: pty allocation failed: {err}");
            false
        }
    }
}

#[cfg(windows)]
fn pseudo_console_supported() -> bool {
    use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

    unsafe {
        let kernel32 = GetModuleHandleA(b"kernel32.dll\0".as_ptr());
        if kernel32 == 0 {
            return false;
        }
        GetProcAddress(kernel32, b"CreatePseudoConsole\0".as_ptr()).is_some()
    }
}

#[cfg(unix)]
fn platform_checks() -> Vec<(SpawnStrategy, ProbeCheck)> {
    vec![(SpawnStrategy::NativePty, Box::new(pty_allocates) as ProbeCheck)]
}

#[cfg(windows)]
fn platform_checks() -> Vec<(SpawnStrategy, ProbeCheck)> {
    vec![
        (SpawnStrategy::PtyHelper, Box::new(pty_allocates) as ProbeCheck),
        (SpawnStrategy::ConsolePty, Box::new(pseudo_console_supported) as ProbeCheck),
    ]
}

#[cfg(not(any(unix, windows)))]
fn platform_checks() -> Vec<(SpawnStrategy, ProbeCheck)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_passing_tier_wins() {
        let prober = CapabilityProber::with_checks(vec![
            (SpawnStrategy::PtyHelper, Box::new(|| false) as ProbeCheck),
            (SpawnStrategy::ConsolePty, Box::new(|| true) as ProbeCheck),
        ]);
        assert_eq!(prober.probe(), SpawnStrategy::ConsolePty);
    }

    #[test]
    fn all_failing_tiers_demote_to_pipes() {
        let prober = CapabilityProber::with_checks(vec![(
            SpawnStrategy::NativePty,
            Box::new(|| false) as ProbeCheck,
        )]);
        assert_eq!(prober.probe(), SpawnStrategy::PlainPipes);
    }

    #[test]
    fn result_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let prober = CapabilityProber::with_checks(vec![(
            SpawnStrategy::NativePty,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }) as ProbeCheck,
        )]);
        assert_eq!(prober.probe(), SpawnStrategy::NativePty);
        assert_eq!(prober.probe(), SpawnStrategy::NativePty);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fallback_chains_end_in_pipes() {
        for strategy in [
            SpawnStrategy::NativePty,
            SpawnStrategy::PtyHelper,
            SpawnStrategy::ConsolePty,
            SpawnStrategy::PlainPipes,
        ] {
            let chain = strategy.fallback_chain();
            assert_eq!(chain.first(), Some(&strategy));
            assert_eq!(chain.last(), Some(&SpawnStrategy::PlainPipes));
        }
        assert_eq!(
            SpawnStrategy::PtyHelper.fallback_chain(),
            vec![
                SpawnStrategy::PtyHelper,
                SpawnStrategy::ConsolePty,
                SpawnStrategy::PlainPipes
            ]
        );
    }

    #[test]
    fn preference_mapping() {
        assert_eq!(SpawnStrategy::from_preference(StrategyPreference::Auto), None);
        assert_eq!(
            SpawnStrategy::from_preference(StrategyPreference::PlainPipes),
            Some(SpawnStrategy::PlainPipes)
        );
    }

    #[test]
    fn global_probe_is_stable() {
        assert_eq!(probe(), probe());
    }
}
