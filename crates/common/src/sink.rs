//! Event contract between the execution engine and whoever renders its output.

use crate::HandleId;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

/// Trait implemented by consumers that wish to receive process output.
///
/// Calls for one handle arrive in production order from a single pump thread;
/// `on_exit` is delivered exactly once and always last.
pub trait OutputSink: Send + Sync + 'static {
    fn on_output(&self, handle: HandleId, text: &str);
    fn on_exit(&self, handle: HandleId, exit_code: i32);
    fn on_error(&self, handle: HandleId, message: &str);
}

/// Owned copy of one sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Output { handle: HandleId, text: String },
    Exit { handle: HandleId, exit_code: i32 },
    Error { handle: HandleId, message: String },
}

impl SinkEvent {
    pub fn handle(&self) -> HandleId {
        match self {
            Self::Output { handle, .. } | Self::Exit { handle, .. } | Self::Error { handle, .. } => {
                *handle
            }
        }
    }
}

/// Sink that forwards every callback into an mpsc channel.
pub struct ChannelSink {
    tx: Mutex<Sender<SinkEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, event: SinkEvent) {
        if self.tx.lock().send(event).is_err() {
            log::debug!("sink receiver dropped; discarding event");
        }
    }
}

impl OutputSink for ChannelSink {
    fn on_output(&self, handle: HandleId, text: &str) {
        self.send(SinkEvent::Output {
            handle,
            text: text.to_string(),
        });
    }

    fn on_exit(&self, handle: HandleId, exit_code: i32) {
        self.send(SinkEvent::Exit { handle, exit_code });
    }

    fn on_error(&self, handle: HandleId, message: &str) {
        self.send(SinkEvent::Error {
            handle,
            message: message.to_string(),
        });
    }
}
