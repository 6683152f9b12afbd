//! Output pump: one background loop per child moving bytes to the sink.

use crate::decode::StreamDecoder;
use crate::exit::ExitInfo;
use crate::source::{OutputSource, ReadOutcome};
use std::thread;
use std::time::Duration;
use termrun_common::{HandleId, OutputSink, PumpSettings};

/// Upper bound on chunks read after exit, for children whose descendants keep
/// the output open and busy.
pub const MAX_DRAIN_CHUNKS: usize = 256;

/// Non-blocking exit check used by the pump between reads.
pub trait ExitProbe: Send + Sync {
    fn poll_exit(&self) -> Option<ExitInfo>;
}

struct Pump<'a> {
    handle: HandleId,
    source: &'a mut dyn OutputSource,
    probe: &'a dyn ExitProbe,
    sink: &'a dyn OutputSink,
    /// Blank decoder cloned for each stream as it first produces output.
    fresh_decoder: StreamDecoder,
    decoders: Vec<StreamDecoder>,
    read_timeout: Duration,
    idle_sleep: Duration,
    drain_reads: u32,
}

/// Pump `source` until the child has exited and its output is drained, then
/// report the exit. Returns the exit that was reported.
///
/// The sink sees `on_exit` exactly once, after every `on_output` for this
/// handle. Read errors go to `on_error` and end the stream; they never stop the
/// exit from being reported.
pub fn run_pump(
    handle: HandleId,
    source: &mut dyn OutputSource,
    probe: &dyn ExitProbe,
    sink: &dyn OutputSink,
    settings: &PumpSettings,
) -> ExitInfo {
    let mut pump = Pump {
        handle,
        source,
        probe,
        sink,
        fresh_decoder: StreamDecoder::new(&settings.fallback_encodings),
        decoders: Vec::new(),
        read_timeout: Duration::from_millis(settings.poll_timeout_ms),
        idle_sleep: Duration::from_millis(settings.idle_sleep_ms),
        drain_reads: settings.drain_reads,
    };
    pump.run()
}

impl Pump<'_> {
    fn run(&mut self) -> ExitInfo {
        let exit = loop {
            match self.source.read_chunk(self.read_timeout) {
                Ok(ReadOutcome::Data { stream, bytes }) => self.emit_bytes(stream, &bytes),
                Ok(ReadOutcome::Idle) => {
                    if let Some(exit) = self.probe.poll_exit() {
                        self.drain();
                        break exit;
                    }
                    // Backoff between polls, never a blocking read.
                    thread::sleep(self.idle_sleep);
                }
                Ok(ReadOutcome::Closed) => {
                    log::debug!("[{}] output closed", self.handle);
                    break self.wait_for_exit();
                }
                Err(err) => {
                    log::warn!("[{}] output read failed: {err}", self.handle);
                    self.sink
                        .on_error(self.handle, &format!("output read failed: {err}"));
                    break self.wait_for_exit();
                }
            }
        };

        for decoder in &mut self.decoders {
            let tail = decoder.finish();
            if !tail.is_empty() {
                self.sink.on_output(self.handle, &tail);
            }
        }
        log::debug!(
            "[{}] exited with code {} (signal {:?})",
            self.handle,
            exit.exit_code(),
            exit.signal
        );
        self.sink.on_exit(self.handle, exit.exit_code());
        exit
    }

    /// Decode with the stream's own decoder, so a character cut by one
    /// stream's read boundary never absorbs another stream's bytes.
    fn emit_bytes(&mut self, stream: usize, bytes: &[u8]) {
        if self.decoders.len() <= stream {
            self.decoders.resize(stream + 1, self.fresh_decoder.clone());
        }
        let text = self.decoders[stream].decode(bytes);
        if !text.is_empty() {
            self.sink.on_output(self.handle, &text);
        }
    }

    /// Catch output written just before exit. Stops at end of file, after
    /// `drain_reads` consecutive empty reads, or at `MAX_DRAIN_CHUNKS`.
    fn drain(&mut self) {
        let mut empty_reads = 0;
        let mut chunks = 0;
        while empty_reads < self.drain_reads && chunks < MAX_DRAIN_CHUNKS {
            match self.source.read_chunk(self.read_timeout) {
                Ok(ReadOutcome::Data { stream, bytes }) => {
                    chunks += 1;
                    empty_reads = 0;
                    self.emit_bytes(stream, &bytes);
                }
                Ok(ReadOutcome::Idle) => empty_reads += 1,
                Ok(ReadOutcome::Closed) => return,
                Err(err) => {
                    log::debug!("[{}] read during drain failed: {err}", self.handle);
                    return;
                }
            }
        }
    }

    fn wait_for_exit(&self) -> ExitInfo {
        loop {
            if let Some(exit) = self.probe.poll_exit() {
                return exit;
            }
            thread::sleep(self.idle_sleep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use termrun_common::{ChannelSink, SinkEvent};

    struct ScriptedSource {
        steps: VecDeque<io::Result<ReadOutcome>>,
        reads: usize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<io::Result<ReadOutcome>>) -> Self {
            Self {
                steps: steps.into(),
                reads: 0,
            }
        }
    }

    impl OutputSource for ScriptedSource {
        fn read_chunk(&mut self, _timeout: Duration) -> io::Result<ReadOutcome> {
            self.reads += 1;
            self.steps.pop_front().unwrap_or(Ok(ReadOutcome::Idle))
        }
    }

    /// Reports running for `running_polls` calls, then the given exit.
    struct CountdownProbe {
        remaining: Mutex<usize>,
        exit: ExitInfo,
    }

    impl CountdownProbe {
        fn new(running_polls: usize, exit: ExitInfo) -> Self {
            Self {
                remaining: Mutex::new(running_polls),
                exit,
            }
        }
    }

    impl ExitProbe for CountdownProbe {
        fn poll_exit(&self) -> Option<ExitInfo> {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                Some(self.exit)
            } else {
                *remaining -= 1;
                None
            }
        }
    }

    fn fast_settings() -> PumpSettings {
        PumpSettings {
            poll_timeout_ms: 1,
            idle_sleep_ms: 1,
            drain_reads: 3,
            ..PumpSettings::default()
        }
    }

    fn data(text: &str) -> io::Result<ReadOutcome> {
        bytes_on(0, text.as_bytes())
    }

    fn bytes_on(stream: usize, bytes: &[u8]) -> io::Result<ReadOutcome> {
        Ok(ReadOutcome::Data {
            stream,
            bytes: bytes.to_vec(),
        })
    }

    fn run(source: &mut ScriptedSource, probe: &CountdownProbe) -> Vec<SinkEvent> {
        let (sink, rx) = ChannelSink::new();
        run_pump(HandleId::from_raw(1), source, probe, &sink, &fast_settings());
        rx.try_iter().collect()
    }

    fn exits(events: &[SinkEvent]) -> Vec<i32> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Exit { exit_code, .. } => Some(*exit_code),
                _ => None,
            })
            .collect()
    }

    fn output(events: &[SinkEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Output { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn forwards_output_then_exit_once() {
        let mut source = ScriptedSource::new(vec![
            data("hello\n"),
            Ok(ReadOutcome::Closed),
        ]);
        let probe = CountdownProbe::new(2, ExitInfo::with_code(0));
        let events = run(&mut source, &probe);

        assert_eq!(output(&events), "hello\n");
        assert_eq!(exits(&events), vec![0]);
        assert!(matches!(events.last(), Some(SinkEvent::Exit { .. })));
    }

    #[test]
    fn drains_output_racing_with_exit() {
        let mut source = ScriptedSource::new(vec![
            Ok(ReadOutcome::Idle),
            data("late "),
            data("output"),
            Ok(ReadOutcome::Idle),
        ]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(7));
        let events = run(&mut source, &probe);

        assert_eq!(output(&events), "late output");
        assert_eq!(exits(&events), vec![7]);
    }

    #[test]
    fn drain_is_bounded_by_empty_reads() {
        let mut source = ScriptedSource::new(vec![Ok(ReadOutcome::Idle)]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(0));
        run(&mut source, &probe);
        // One idle read to notice the exit, then three empty drain reads.
        assert_eq!(source.reads, 4);
    }

    #[test]
    fn read_error_is_reported_and_ends_stream() {
        let mut source = ScriptedSource::new(vec![
            data("partial"),
            Err(io::Error::new(io::ErrorKind::Other, "boom")),
        ]);
        let probe = CountdownProbe::new(5, ExitInfo::with_signal(15));
        let events = run(&mut source, &probe);

        assert!(events.iter().any(|e| matches!(
            e,
            SinkEvent::Error { message, .. } if message.contains("boom")
        )));
        assert_eq!(exits(&events), vec![143]);
        assert_eq!(source.reads, 2);
    }

    #[test]
    fn split_utf8_is_reassembled() {
        let bytes = "✓".as_bytes();
        let mut source = ScriptedSource::new(vec![
            bytes_on(0, &bytes[..1]),
            bytes_on(0, &bytes[1..]),
            Ok(ReadOutcome::Closed),
        ]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(0));
        let events = run(&mut source, &probe);
        assert_eq!(output(&events), "✓");
    }

    #[test]
    fn truncated_tail_is_flushed_before_exit() {
        let mut source = ScriptedSource::new(vec![
            bytes_on(0, b"ok\xe2"),
            Ok(ReadOutcome::Closed),
        ]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(1));
        let events = run(&mut source, &probe);

        assert_eq!(output(&events), "ok\u{fffd}");
        assert!(matches!(
            events.last(),
            Some(SinkEvent::Exit { exit_code: 1, .. })
        ));
    }

    #[test]
    fn streams_are_decoded_independently() {
        let check = "✓ done\n".as_bytes();
        let mut source = ScriptedSource::new(vec![
            bytes_on(0, &check[..1]),
            bytes_on(1, b"E"),
            bytes_on(0, &check[1..]),
            Ok(ReadOutcome::Closed),
        ]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(0));
        let events = run(&mut source, &probe);
        assert_eq!(output(&events), "E✓ done\n");
    }

    #[test]
    fn every_stream_tail_is_flushed() {
        let mut source = ScriptedSource::new(vec![
            bytes_on(0, b"out\xe2"),
            bytes_on(1, b"err\xe2"),
            Ok(ReadOutcome::Closed),
        ]);
        let probe = CountdownProbe::new(0, ExitInfo::with_code(0));
        let events = run(&mut source, &probe);
        assert_eq!(output(&events), "outerr\u{fffd}\u{fffd}");
    }
}
