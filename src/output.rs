//! Writers for each `--format`.

use crate::cli::OutputFormat;
use serde_json::json;
use std::io::{self, Write};
use std::sync::mpsc::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use termrun_common::{EngineSettings, HandleId, OutputSink};
use termrun_render::{runs_to_ansi, Color, RenderPipeline, StyledSink, TextRun};

/// Where exit codes are announced to the main thread.
pub type ExitNotifier = Mutex<Sender<(HandleId, i32)>>;

fn notify(exits: &ExitNotifier, handle: HandleId, exit_code: i32) {
    if exits.lock().send((handle, exit_code)).is_err() {
        log::debug!("[{handle}] exit listener is gone");
    }
}

fn write_stdout(text: &str) {
    let mut out = io::stdout().lock();
    if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        log::debug!("stdout write failed: {err}");
    }
}

/// Pass-through of decoded child output.
struct RawWriter {
    exits: ExitNotifier,
}

impl OutputSink for RawWriter {
    fn on_output(&self, _handle: HandleId, text: &str) {
        write_stdout(text);
    }

    fn on_exit(&self, handle: HandleId, exit_code: i32) {
        notify(&self.exits, handle, exit_code);
    }

    fn on_error(&self, handle: HandleId, message: &str) {
        eprintln!("termrun: [{handle}] {message}");
    }
}

/// Renders styled runs for one of the run-based formats.
struct RunWriter {
    format: OutputFormat,
    default_fg: Color,
    exits: ExitNotifier,
}

impl RunWriter {
    fn render(&self, handle: HandleId, runs: &[TextRun]) -> String {
        match self.format {
            OutputFormat::Styled => runs_to_ansi(runs, self.default_fg),
            OutputFormat::Json => {
                let mut line = json!({ "handle": handle.to_string(), "runs": runs }).to_string();
                line.push('\n');
                line
            }
            OutputFormat::Plain | OutputFormat::Raw => {
                runs.iter().map(|run| run.text.as_str()).collect()
            }
        }
    }
}

impl StyledSink for RunWriter {
    fn on_runs(&self, handle: HandleId, runs: Vec<TextRun>) {
        write_stdout(&self.render(handle, &runs));
    }

    fn on_exit(&self, handle: HandleId, exit_code: i32) {
        if self.format == OutputFormat::Json {
            write_stdout(&format!(
                "{}\n",
                json!({ "handle": handle.to_string(), "exit_code": exit_code })
            ));
        }
        notify(&self.exits, handle, exit_code);
    }

    fn on_error(&self, handle: HandleId, message: &str) {
        if self.format == OutputFormat::Json {
            write_stdout(&format!(
                "{}\n",
                json!({ "handle": handle.to_string(), "error": message })
            ));
        } else {
            eprintln!("termrun: [{handle}] {message}");
        }
    }
}

/// Sink for `format`. Exit codes are sent to `exits` after the last output
/// for the handle has been written.
pub fn build_sink(
    format: OutputFormat,
    settings: &EngineSettings,
    exits: Sender<(HandleId, i32)>,
) -> Arc<dyn OutputSink> {
    let exits = Mutex::new(exits);
    match format {
        OutputFormat::Raw => Arc::new(RawWriter { exits }),
        OutputFormat::Plain | OutputFormat::Styled | OutputFormat::Json => {
            let default_fg = Color::from_hex(&settings.render.default_foreground)
                .unwrap_or(termrun_render::DEFAULT_FOREGROUND);
            let writer = RunWriter {
                format,
                default_fg,
                exits,
            };
            Arc::new(RenderPipeline::new(writer, settings))
        }
    }
}
