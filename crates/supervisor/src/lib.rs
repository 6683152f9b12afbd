//! Process supervision for termrun.
//!
//! [`Supervisor::start`] picks a spawn strategy (a real pseudo-terminal when the
//! host has one, otherwise pipes with colour-forcing environment and the isatty
//! shim), starts the child, and hands its output to a background pump that
//! delivers decoded text to an [`OutputSink`](termrun_common::OutputSink).
//!
//! ```no_run
//! use std::sync::Arc;
//! use termrun_common::{ChannelSink, EngineSettings};
//! use termrun_supervisor::{LaunchSpec, Supervisor};
//!
//! let (sink, events) = ChannelSink::new();
//! let supervisor = Supervisor::new(EngineSettings::default(), Arc::new(sink));
//! let handle = supervisor.start(LaunchSpec::new(["echo", "hello"]))?;
//! for event in events {
//!     println!("{event:?}");
//! }
//! # let _ = handle;
//! # Ok::<(), termrun_supervisor::SpawnError>(())
//! ```

mod decode;
mod error;
mod exit;
mod handle;
pub mod probe;
mod pump;
pub mod source;
mod spawn;
mod supervisor;

pub use decode::StreamDecoder;
pub use error::{SpawnError, SupervisorError};
pub use exit::ExitInfo;
pub use handle::{ProcessHandle, ProcessState};
pub use probe::{CapabilityProber, ProbeCheck, SpawnStrategy};
pub use pump::{run_pump, ExitProbe, MAX_DRAIN_CHUNKS};
pub use spawn::LaunchSpec;
pub use supervisor::Supervisor;
