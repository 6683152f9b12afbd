//! Terminal output rendering for termrun.
//!
//! Raw child output goes through three stages:
//!
//! 1. [`BatchingController`] buffers text and decides when to release it
//! 2. [`ParseCache`] short-circuits self-contained redraws
//! 3. [`AnsiInterpreter`] turns escape sequences into styled [`TextRun`]s
//!
//! [`RenderPipeline`] wires the three together behind the
//! [`OutputSink`](termrun_common::OutputSink) contract. [`strip`] is the
//! style-free variant for plain-text consumers.
//!
//! ```rust
//! use termrun_render::{AnsiInterpreter, Color, DEFAULT_FOREGROUND};
//!
//! let mut interpreter = AnsiInterpreter::new(DEFAULT_FOREGROUND);
//! let runs = interpreter.feed("\x1b[31mred\x1b[0mplain");
//! assert_eq!(runs[0].style.fg, Some(Color::rgb(205, 0, 0)));
//! assert_eq!(runs[1].text, "plain");
//! ```

mod ansi_out;
pub mod batch;
mod cache;
mod interpreter;
mod pipeline;
pub mod scanner;
mod strip;
mod style;

pub use ansi_out::runs_to_ansi;
pub use batch::{looks_like_progress, BatchConfig, BatchMode, BatchingController};
pub use cache::{is_self_contained, CacheStats, ParseCache};
pub use interpreter::{AnsiInterpreter, MAX_PENDING_ESCAPE};
pub use pipeline::{RenderPipeline, StyledSink};
pub use strip::strip;
pub use style::{Color, StyleState, TextRun, DEFAULT_FOREGROUND, XTERM_16};
