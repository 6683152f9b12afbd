use std::io;
use termrun_common::HandleId;
use thiserror::Error;

/// No spawn strategy produced a running child.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to start {program}: {}", .failures.join("; "))]
    AllStrategiesFailed {
        program: String,
        /// One `strategy: reason` entry per attempt, in attempt order.
        failures: Vec<String>,
    },
    /// The child started but its output pump thread could not; the child was
    /// killed and reaped.
    #[error("failed to start output pump for {program}: {source}")]
    PumpUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Control operation on an existing handle failed.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown process handle {0}")]
    UnknownHandle(HandleId),
    #[error("input of {0} is closed")]
    InputClosed(HandleId),
    #[error("failed to write to child input: {0}")]
    Write(#[source] io::Error),
    #[error("failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
}
