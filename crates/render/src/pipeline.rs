//! Sink adapter that turns raw process output into batched, styled runs.
//!
//! [`RenderPipeline`] implements [`OutputSink`], so it can be handed straight to
//! the supervisor. Each handle gets its own batching controller and ANSI
//! interpreter; one ticker thread drives every controller. Runs for a handle
//! are delivered in production order, and `on_exit` always follows the last of
//! them.

use crate::batch::BatchingController;
use crate::cache::ParseCache;
use crate::interpreter::AnsiInterpreter;
use crate::style::{Color, TextRun, DEFAULT_FOREGROUND};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use termrun_common::{BatchSettings, EngineSettings, HandleId, OutputSink};

/// Receiver of rendered output.
pub trait StyledSink: Send + Sync + 'static {
    fn on_runs(&self, handle: HandleId, runs: Vec<TextRun>);
    fn on_exit(&self, handle: HandleId, exit_code: i32);
    fn on_error(&self, handle: HandleId, message: &str);
}

struct Stream {
    controller: BatchingController,
    /// Also serializes delivery for the handle.
    interpreter: Mutex<AnsiInterpreter>,
}

struct Shared<S> {
    sink: S,
    cache: Arc<ParseCache>,
    batch: BatchSettings,
    default_fg: Color,
    streams: Mutex<HashMap<HandleId, Arc<Stream>>>,
}

impl<S: StyledSink> Shared<S> {
    fn stream(&self, handle: HandleId) -> Arc<Stream> {
        self.streams
            .lock()
            .entry(handle)
            .or_insert_with(|| {
                Arc::new(Stream {
                    controller: BatchingController::new(self.batch.clone()),
                    interpreter: Mutex::new(AnsiInterpreter::new(self.default_fg)),
                })
            })
            .clone()
    }

    fn deliver(&self, handle: HandleId, interpreter: &mut AnsiInterpreter, text: &str) {
        let runs = self.cache.parse(interpreter, text);
        if !runs.is_empty() {
            self.sink.on_runs(handle, runs);
        }
    }

    fn tick_all(&self, now: Instant) {
        let streams: Vec<(HandleId, Arc<Stream>)> = self
            .streams
            .lock()
            .iter()
            .map(|(handle, stream)| (*handle, Arc::clone(stream)))
            .collect();
        for (handle, stream) in streams {
            let mut interpreter = stream.interpreter.lock();
            if let Some(text) = stream.controller.tick(now) {
                self.deliver(handle, &mut interpreter, &text);
            }
        }
    }

    fn finish_stream(&self, handle: HandleId) {
        let Some(stream) = self.streams.lock().remove(&handle) else {
            return;
        };
        let mut interpreter = stream.interpreter.lock();
        if let Some(text) = stream.controller.drain() {
            self.deliver(handle, &mut interpreter, &text);
        }
        interpreter.finish();
    }
}

pub struct RenderPipeline<S: StyledSink> {
    shared: Arc<Shared<S>>,
    /// Dropping the sender stops the ticker.
    stop: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl<S: StyledSink> RenderPipeline<S> {
    /// Pipeline with its own parse cache sized from `settings`.
    pub fn new(sink: S, settings: &EngineSettings) -> Self {
        let cache = Arc::new(ParseCache::new(settings.cache.capacity));
        Self::with_cache(sink, settings, cache)
    }

    /// Pipeline sharing `cache` with other pipelines.
    pub fn with_cache(sink: S, settings: &EngineSettings, cache: Arc<ParseCache>) -> Self {
        let default_fg =
            Color::from_hex(&settings.render.default_foreground).unwrap_or(DEFAULT_FOREGROUND);
        let shared = Arc::new(Shared {
            sink,
            cache,
            batch: settings.batch.clone(),
            default_fg,
            streams: Mutex::new(HashMap::new()),
        });

        let tick = Duration::from_millis(settings.batch.tick_ms.max(1));
        let ticker_shared = Arc::clone(&shared);
        let (stop, stop_rx) = mpsc::channel::<()>();
        let ticker = thread::Builder::new()
            .name("termrun-render-tick".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => ticker_shared.tick_all(Instant::now()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| {
                log::warn!("render ticker unavailable, output flushes on exit only: {err}")
            })
            .ok();

        Self {
            shared,
            stop: Some(stop),
            ticker,
        }
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    pub fn cache(&self) -> Arc<ParseCache> {
        Arc::clone(&self.shared.cache)
    }

    pub fn default_foreground(&self) -> Color {
        self.shared.default_fg
    }

    /// Deliver everything buffered for `handle` now.
    pub fn flush(&self, handle: HandleId) {
        let Some(stream) = self.shared.streams.lock().get(&handle).cloned() else {
            return;
        };
        let mut interpreter = stream.interpreter.lock();
        if let Some(text) = stream.controller.drain() {
            self.shared.deliver(handle, &mut interpreter, &text);
        }
    }
}

impl<S: StyledSink> OutputSink for RenderPipeline<S> {
    fn on_output(&self, handle: HandleId, text: &str) {
        self.shared.stream(handle).controller.push(text);
    }

    fn on_exit(&self, handle: HandleId, exit_code: i32) {
        self.shared.finish_stream(handle);
        self.shared.sink.on_exit(handle, exit_code);
    }

    fn on_error(&self, handle: HandleId, message: &str) {
        self.shared.sink.on_error(handle, message);
    }
}

impl<S: StyledSink> Drop for RenderPipeline<S> {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    #[derive(Debug, PartialEq)]
    enum Event {
        Runs(HandleId, Vec<TextRun>),
        Exit(HandleId, i32),
        Error(HandleId, String),
    }

    struct Recorder(parking_lot::Mutex<Sender<Event>>);

    impl StyledSink for Recorder {
        fn on_runs(&self, handle: HandleId, runs: Vec<TextRun>) {
            let _ = self.0.lock().send(Event::Runs(handle, runs));
        }
        fn on_exit(&self, handle: HandleId, exit_code: i32) {
            let _ = self.0.lock().send(Event::Exit(handle, exit_code));
        }
        fn on_error(&self, handle: HandleId, message: &str) {
            let _ = self.0.lock().send(Event::Error(handle, message.to_string()));
        }
    }

    fn pipeline(settings: EngineSettings) -> (RenderPipeline<Recorder>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (
            RenderPipeline::new(Recorder(parking_lot::Mutex::new(tx)), &settings),
            rx,
        )
    }

    fn text_of(events: &[Event]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Runs(_, runs) => Some(runs.iter().map(|r| r.text.as_str()).collect::<String>()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn line_output_reaches_sink_on_tick() {
        let (pipeline, rx) = pipeline(EngineSettings::default());
        let handle = HandleId::next();
        pipeline.on_output(handle, "\x1b[32mok\x1b[0m\n");

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let Event::Runs(got, runs) = event else {
            panic!("expected runs, got {event:?}");
        };
        assert_eq!(got, handle);
        assert_eq!(runs[0].text, "ok");
        assert_eq!(runs[0].style.fg, Some(Color::rgb(0, 205, 0)));
        assert_eq!(runs[1].text, "\n");
    }

    #[test]
    fn exit_drains_buffer_before_exit_event() {
        let mut settings = EngineSettings::default();
        settings.batch.normal_interval_ms = 60_000;
        settings.batch.tick_ms = 60_000;
        let (pipeline, rx) = pipeline(settings);
        let handle = HandleId::next();

        pipeline.on_output(handle, "no newline");
        pipeline.on_output(handle, " yet");
        pipeline.on_exit(handle, 7);

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(text_of(&events), "no newline yet");
        assert_eq!(events.last(), Some(&Event::Exit(handle, 7)));
    }

    #[test]
    fn streams_keep_separate_style() {
        let mut settings = EngineSettings::default();
        settings.batch.tick_ms = 60_000;
        let (pipeline, rx) = pipeline(settings);
        let a = HandleId::next();
        let b = HandleId::next();

        pipeline.on_output(a, "\x1b[1m");
        pipeline.on_output(b, "plain");
        pipeline.on_output(a, "bold");
        pipeline.on_exit(a, 0);
        pipeline.on_exit(b, 0);

        for event in rx.try_iter() {
            if let Event::Runs(handle, runs) = event {
                assert_eq!(runs[0].style.bold, handle == a);
            }
        }
    }

    #[test]
    fn errors_pass_through() {
        let (pipeline, rx) = pipeline(EngineSettings::default());
        let handle = HandleId::next();
        pipeline.on_error(handle, "read failed");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Event::Error(handle, "read failed".into())
        );
    }

    #[test]
    fn self_contained_redraws_hit_shared_cache() {
        let mut settings = EngineSettings::default();
        settings.batch.tick_ms = 60_000;
        let cache = Arc::new(ParseCache::new(4));
        let (tx, _rx) = mpsc::channel();
        let pipeline = RenderPipeline::with_cache(
            Recorder(parking_lot::Mutex::new(tx)),
            &settings,
            Arc::clone(&cache),
        );
        let handle = HandleId::next();
        for _ in 0..3 {
            pipeline.on_output(handle, "\x1b[0m[###   ] 50%\x1b[0m");
            pipeline.flush(handle);
        }
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(pipeline.cache().len(), 1);
    }
}
