//! Adaptive output batching.
//!
//! Raw text is buffered per stream and released on a periodic tick. Line-oriented
//! output is released as soon as a newline arrives; progress redraws (`\r`
//! updates, percentages, bars) switch the controller to a wider interval so a
//! fast progress bar does not turn into one UI update per byte.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::time::{Duration, Instant};
use termrun_common::BatchSettings;

static PROGRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\d{1,3}(?:\.\d+)?\s*[%％]",
        r"|\[[=#]+>?[\s.\-]*\]",
        r"|[█▉▊▋▌▍▎▏░▒▓■□━]",
        r"|\r[^\r\n]",
        r"|进度|進度",
    ))
    .expect("valid progress regex")
});

/// Whether `text` looks like a progress indicator redraw.
pub fn looks_like_progress(text: &str) -> bool {
    PROGRESS_PATTERN.is_match(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    Normal,
    Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchConfig {
    pub flush_interval_ms: u64,
    pub size_threshold_bytes: usize,
    pub progress_mode: bool,
}

struct BatchState {
    buffer: String,
    mode: BatchMode,
    config: BatchConfig,
    last_flush: Instant,
}

pub struct BatchingController {
    settings: BatchSettings,
    state: Mutex<BatchState>,
}

impl BatchingController {
    pub fn new(settings: BatchSettings) -> Self {
        Self::starting_at(settings, Instant::now())
    }

    /// Controller whose flush clock starts at `now`.
    pub fn starting_at(settings: BatchSettings, now: Instant) -> Self {
        let config = BatchConfig {
            flush_interval_ms: settings.normal_interval_ms,
            size_threshold_bytes: settings.size_threshold_bytes,
            progress_mode: false,
        };
        Self {
            settings,
            state: Mutex::new(BatchState {
                buffer: String::new(),
                mode: BatchMode::Normal,
                config,
                last_flush: now,
            }),
        }
    }

    /// Append raw text to the buffer.
    pub fn push(&self, text: &str) {
        if !text.is_empty() {
            self.state.lock().buffer.push_str(text);
        }
    }

    /// Re-evaluate the mode and return the buffered text if a flush is due.
    pub fn tick(&self, now: Instant) -> Option<String> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return None;
        }

        if looks_like_progress(&state.buffer) {
            if state.mode == BatchMode::Normal {
                log::debug!(
                    "entering progress mode ({} ms interval)",
                    self.settings.progress_interval_ms
                );
                self.switch_mode(&mut state, BatchMode::Progress);
            }
        } else if state.mode == BatchMode::Progress && state.buffer.contains('\n') {
            log::debug!(
                "leaving progress mode ({} ms interval)",
                self.settings.normal_interval_ms
            );
            self.switch_mode(&mut state, BatchMode::Normal);
        }

        let elapsed = now.saturating_duration_since(state.last_flush);
        let due = elapsed >= Duration::from_millis(state.config.flush_interval_ms)
            || state.buffer.len() >= state.config.size_threshold_bytes
            || (state.mode == BatchMode::Normal && state.buffer.contains('\n'));
        if !due {
            return None;
        }
        state.last_flush = now;
        Some(std::mem::take(&mut state.buffer))
    }

    /// Take whatever is buffered, regardless of timing.
    pub fn drain(&self) -> Option<String> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return None;
        }
        state.last_flush = Instant::now();
        Some(std::mem::take(&mut state.buffer))
    }

    pub fn mode(&self) -> BatchMode {
        self.state.lock().mode
    }

    pub fn config(&self) -> BatchConfig {
        self.state.lock().config
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn switch_mode(&self, state: &mut BatchState, mode: BatchMode) {
        state.mode = mode;
        state.config.progress_mode = mode == BatchMode::Progress;
        state.config.flush_interval_ms = match mode {
            BatchMode::Normal => self.settings.normal_interval_ms,
            BatchMode::Progress => self.settings.progress_interval_ms,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn controller(start: Instant) -> BatchingController {
        BatchingController::starting_at(BatchSettings::default(), start)
    }

    #[test]
    fn progress_heuristics() {
        for text in [
            "\r 67%",
            "downloading 12.5 %",
            "[=====>    ]",
            "[####....]",
            "▕████▏",
            "进度 3/10",
            "50％",
            "\rcounting",
        ] {
            assert!(looks_like_progress(text), "{text:?}");
        }
        for text in ["hello world\n", "line\r\n", "[ok]", "100 items"] {
            assert!(!looks_like_progress(text), "{text:?}");
        }
    }

    #[test]
    fn newline_flushes_immediately_in_normal_mode() {
        let start = Instant::now();
        let batch = controller(start);
        batch.push("partial");
        assert_eq!(batch.tick(start + ms(10)), None);
        batch.push(" line\n");
        assert_eq!(batch.tick(start + ms(20)).as_deref(), Some("partial line\n"));
        assert_eq!(batch.buffered_len(), 0);
    }

    #[test]
    fn interval_flushes_text_without_newline() {
        let start = Instant::now();
        let batch = controller(start);
        batch.push("prompt> ");
        assert_eq!(batch.tick(start + ms(30)), None);
        assert_eq!(batch.tick(start + ms(60)).as_deref(), Some("prompt> "));
    }

    #[test]
    fn size_threshold_forces_flush() {
        let start = Instant::now();
        let batch = controller(start);
        batch.push(&"x".repeat(BatchSettings::default().size_threshold_bytes));
        assert!(batch.tick(start + ms(1)).is_some());
    }

    #[test]
    fn carriage_return_progress_widens_interval() {
        let start = Instant::now();
        let batch = controller(start);
        for _ in 0..5 {
            batch.push("\r 67%");
        }
        assert_eq!(batch.tick(start + ms(30)), None);
        assert_eq!(batch.mode(), BatchMode::Progress);
        assert_eq!(
            batch.config(),
            BatchConfig {
                flush_interval_ms: 200,
                size_threshold_bytes: 8192,
                progress_mode: true,
            }
        );

        assert_eq!(batch.tick(start + ms(120)), None);
        assert!(batch.tick(start + ms(200)).is_some());
    }

    #[test]
    fn newline_without_progress_returns_to_normal() {
        let start = Instant::now();
        let batch = controller(start);
        batch.push("\r 99%");
        batch.tick(start + ms(30));
        batch.tick(start + ms(230));
        assert_eq!(batch.mode(), BatchMode::Progress);

        batch.push("done\n");
        assert_eq!(batch.tick(start + ms(260)).as_deref(), Some("done\n"));
        assert_eq!(batch.mode(), BatchMode::Normal);
        assert_eq!(batch.config().flush_interval_ms, 50);
    }

    #[test]
    fn drain_empties_buffer_in_order() {
        let batch = controller(Instant::now());
        assert_eq!(batch.drain(), None);
        batch.push("a");
        batch.push("b");
        assert_eq!(batch.drain().as_deref(), Some("ab"));
        assert_eq!(batch.drain(), None);
    }
}
