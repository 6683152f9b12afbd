//! Bounded LRU memoization of chunk parses.

use crate::interpreter::AnsiInterpreter;
use crate::style::{Color, TextRun};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;

const RESETS: [&str; 2] = ["\x1b[0m", "\x1b[m"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Runs carry resolved colours, so the default foreground is part of the key.
type CacheKey = (Color, String);

struct Inner {
    entries: Option<LruCache<CacheKey, Vec<TextRun>>>,
    stats: CacheStats,
}

/// Chunk text to parsed runs, keyed on the exact chunk and the default
/// foreground it was parsed with.
///
/// The cache can be shared by every stream of a host, including pipelines with
/// different default colours; all access goes through one mutex. A capacity of
/// zero disables it.
pub struct ParseCache {
    inner: Mutex<Inner>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().entries.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .entries
            .as_ref()
            .map_or(0, |entries| entries.cap().get())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `chunk`, marking it most recently used.
    pub fn get(&self, default_fg: Color, chunk: &str) -> Option<Vec<TextRun>> {
        let mut inner = self.inner.lock();
        let Inner { entries, stats } = &mut *inner;
        let entries = entries.as_mut()?;
        match entries.get(&(default_fg, chunk.to_string())) {
            Some(runs) => {
                stats.hits += 1;
                Some(runs.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, default_fg: Color, chunk: &str, runs: Vec<TextRun>) {
        let mut inner = self.inner.lock();
        let Inner { entries, stats } = &mut *inner;
        let Some(entries) = entries.as_mut() else {
            return;
        };
        let key = (default_fg, chunk.to_string());
        if let Some((displaced, _)) = entries.push(key.clone(), runs) {
            if displaced != key {
                stats.evictions += 1;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some(entries) = inner.entries.as_mut() {
            entries.clear();
        }
        inner.stats = CacheStats::default();
    }

    /// Parse `chunk` through `interpreter`, consulting the cache when the result
    /// cannot depend on the interpreter's current style.
    ///
    /// Only chunks that open and close with a bare `SGR 0` qualify, and only when
    /// no truncated sequence is pending. Such a chunk leaves the interpreter in
    /// the reset state, so a hit resets the style instead of re-parsing.
    pub fn parse(&self, interpreter: &mut AnsiInterpreter, chunk: &str) -> Vec<TextRun> {
        if !self.is_enabled() || interpreter.has_pending() || !is_self_contained(chunk) {
            return interpreter.feed(chunk);
        }
        let default_fg = interpreter.default_foreground();
        if let Some(runs) = self.get(default_fg, chunk) {
            interpreter.reset_style();
            return runs;
        }
        let runs = interpreter.feed(chunk);
        self.put(default_fg, chunk, runs.clone());
        runs
    }
}

/// Whether `chunk` starts and ends with a bare reset.
pub fn is_self_contained(chunk: &str) -> bool {
    RESETS.iter().any(|reset| chunk.starts_with(reset))
        && RESETS.iter().any(|reset| chunk.ends_with(reset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{StyleState, DEFAULT_FOREGROUND};

    const FG: Color = DEFAULT_FOREGROUND;

    fn runs(text: &str) -> Vec<TextRun> {
        vec![TextRun::new(text, StyleState::reset(DEFAULT_FOREGROUND))]
    }

    #[test]
    fn get_after_put_returns_runs() {
        let cache = ParseCache::new(4);
        cache.put(FG, "a", runs("a"));
        assert_eq!(cache.get(FG, "a"), Some(runs("a")));
        assert_eq!(cache.get(FG, "b"), None);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = ParseCache::new(3);
        cache.put(FG, "a", runs("a"));
        cache.put(FG, "b", runs("b"));
        cache.put(FG, "c", runs("c"));
        assert!(cache.get(FG, "a").is_some());
        cache.put(FG, "d", runs("d"));

        assert_eq!(cache.len(), 3);
        assert!(cache.get(FG, "b").is_none());
        for present in ["a", "c", "d"] {
            assert!(cache.get(FG, present).is_some(), "{present}");
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let cache = ParseCache::new(1);
        cache.put(FG, "a", runs("a"));
        cache.put(FG, "a", runs("A"));
        assert_eq!(cache.get(FG, "a"), Some(runs("A")));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = ParseCache::new(0);
        assert!(!cache.is_enabled());
        cache.put(FG, "a", runs("a"));
        assert!(cache.get(FG, "a").is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn self_contained_detection() {
        assert!(is_self_contained("\x1b[0m 42% \x1b[0m"));
        assert!(is_self_contained("\x1b[m\x1b[32m###\x1b[m"));
        assert!(!is_self_contained("\x1b[0mtext"));
        assert!(!is_self_contained("\x1b[1;0mtext\x1b[0m"));
    }

    #[test]
    fn parse_uses_cache_only_for_self_contained_chunks() {
        let cache = ParseCache::new(8);
        let mut interp = AnsiInterpreter::new(DEFAULT_FOREGROUND);
        let chunk = "\x1b[0m\x1b[32m50%\x1b[0m";

        let first = cache.parse(&mut interp, chunk);
        interp.feed("\x1b[1m");
        let second = cache.parse(&mut interp, chunk);

        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert!(interp.style().is_reset(DEFAULT_FOREGROUND));

        cache.parse(&mut interp, "plain");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn parse_skips_cache_while_sequence_is_pending() {
        let cache = ParseCache::new(8);
        let mut interp = AnsiInterpreter::new(DEFAULT_FOREGROUND);
        interp.feed("\x1b[3");
        let out = cache.parse(&mut interp, "\x1b[0mx\x1b[0m");
        assert!(cache.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "x");
        assert!(!interp.has_pending());
    }

    #[test]
    fn default_foreground_is_part_of_the_key() {
        let cache = ParseCache::new(8);
        let chunk = "\x1b[0mplain\x1b[0m";
        let light = DEFAULT_FOREGROUND;
        let dark = Color::rgb(0x10, 0x10, 0x10);

        let mut light_interp = AnsiInterpreter::new(light);
        let mut dark_interp = AnsiInterpreter::new(dark);
        let light_runs = cache.parse(&mut light_interp, chunk);
        let dark_runs = cache.parse(&mut dark_interp, chunk);

        assert_eq!(light_runs[0].style.fg, Some(light));
        assert_eq!(dark_runs[0].style.fg, Some(dark));
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.parse(&mut dark_interp, chunk), dark_runs);
        assert_eq!(cache.stats().hits, 1);
    }
}
