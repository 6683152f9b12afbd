//! Handle to one supervised child.

use crate::error::SupervisorError;
use crate::exit::ExitInfo;
use crate::probe::SpawnStrategy;
use crate::pump::ExitProbe;
use crate::source::OutputSource;
use crate::spawn::{ChildProcess, SpawnedChild};
use parking_lot::Mutex;
use portable_pty::{MasterPty, PtySize};
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use termrun_common::HandleId;

/// Lifecycle of a child. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, output pump not attached yet.
    Starting,
    Running,
    /// Terminate or kill was requested; the child has not been reaped yet.
    Stopping,
    Exited(ExitInfo),
}

impl ProcessState {
    fn rank(&self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Exited(_) => 3,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Exited(_))
    }

    pub fn exit(&self) -> Option<ExitInfo> {
        match self {
            Self::Exited(exit) => Some(*exit),
            _ => None,
        }
    }
}

pub(crate) struct HandleInner {
    id: HandleId,
    pid: Option<u32>,
    strategy: SpawnStrategy,
    state: Mutex<ProcessState>,
    child: Mutex<ChildProcess>,
    input: Mutex<Option<Box<dyn Write + Send>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl HandleInner {
    fn advance(&self, next: ProcessState) -> ProcessState {
        let mut state = self.state.lock();
        if next.rank() > state.rank() {
            *state = next;
        }
        *state
    }

    fn refresh(&self) -> ProcessState {
        let current = *self.state.lock();
        if let ProcessState::Exited(_) = current {
            return current;
        }
        match self.child.lock().try_wait() {
            Ok(Some(exit)) => self.advance(ProcessState::Exited(exit)),
            Ok(None) => current,
            Err(err) => {
                log::debug!("[{}] try_wait failed: {err}", self.id);
                current
            }
        }
    }
}

impl ExitProbe for HandleInner {
    fn poll_exit(&self) -> Option<ExitInfo> {
        self.refresh().exit()
    }
}

/// Cloneable handle; every clone refers to the same child.
///
/// The control surface is identical whichever spawn strategy was used. All
/// operations are safe to call after the child exited: terminate and kill
/// become no-ops, writes report [`SupervisorError::InputClosed`] or the
/// underlying write error.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    /// Wrap a started child; the output source goes to the pump.
    pub(crate) fn new(id: HandleId, spawned: SpawnedChild) -> (Self, Box<dyn OutputSource>) {
        let SpawnedChild {
            strategy,
            pid,
            child,
            input,
            master,
            source,
        } = spawned;
        let inner = HandleInner {
            id,
            pid,
            strategy,
            state: Mutex::new(ProcessState::Starting),
            child: Mutex::new(child),
            input: Mutex::new(input),
            master: Mutex::new(master),
            pump: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            source,
        )
    }

    pub(crate) fn probe(&self) -> Arc<HandleInner> {
        Arc::clone(&self.inner)
    }

    /// Attach the output pump; the handle is running from here on.
    pub(crate) fn set_pump(&self, pump: JoinHandle<()>) {
        *self.inner.pump.lock() = Some(pump);
        self.inner.advance(ProcessState::Running);
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn strategy(&self) -> SpawnStrategy {
        self.inner.strategy
    }

    /// Current state, reaping the child if it has exited. Never blocks on
    /// the child.
    pub fn poll(&self) -> ProcessState {
        self.inner.refresh()
    }

    pub fn is_running(&self) -> bool {
        self.poll().is_running()
    }

    /// Send `text` to the child's input verbatim.
    pub fn write(&self, text: &str) -> Result<(), SupervisorError> {
        self.write_bytes(text.as_bytes())
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), SupervisorError> {
        let mut input = self.inner.input.lock();
        let Some(writer) = input.as_mut() else {
            return Err(SupervisorError::InputClosed(self.inner.id));
        };
        let result = writer.write_all(bytes).and_then(|()| writer.flush());
        result.map_err(|err| {
            log::warn!("[{}] write to child failed: {err}", self.inner.id);
            SupervisorError::Write(err)
        })
    }

    /// Send one line as if typed: `\r` on a terminal, the platform newline on
    /// pipes.
    pub fn write_line(&self, line: &str) -> Result<(), SupervisorError> {
        let mut buf = String::with_capacity(line.len() + 2);
        buf.push_str(line);
        buf.push_str(self.line_terminator());
        self.write(&buf)
    }

    pub fn line_terminator(&self) -> &'static str {
        if self.inner.strategy.uses_pty() {
            "\r"
        } else if cfg!(windows) {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Close the child's input so it sees end of file.
    pub fn close_input(&self) {
        if self.inner.input.lock().take().is_some() {
            log::debug!("[{}] input closed", self.inner.id);
        }
    }

    /// Ask the child to shut down: SIGTERM to its process group on unix, Ctrl-C
    /// or Ctrl-Break on Windows. No-op once exited.
    pub fn terminate(&self) -> Result<(), SupervisorError> {
        if !self.poll().is_running() {
            return Ok(());
        }
        log::info!("[{}] terminating", self.inner.id);
        self.inner.advance(ProcessState::Stopping);
        self.send_terminate()
    }

    /// Force the child to stop. No-op once exited.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        if !self.poll().is_running() {
            return Ok(());
        }
        log::info!("[{}] killing", self.inner.id);
        self.inner.advance(ProcessState::Stopping);
        self.send_kill()
    }

    /// Resize the pseudo-terminal. Returns false for pipe strategies or when
    /// the resize failed.
    pub fn resize(&self, rows: u16, cols: u16) -> bool {
        let master = self.inner.master.lock();
        let Some(master) = master.as_ref() else {
            return false;
        };
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        match master.resize(size) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[{}] failed to resize PTY: {err}", self.inner.id);
                false
            }
        }
    }

    /// Kill the child and wait for it, for a child that never got a pump.
    pub(crate) fn kill_and_reap(&self) {
        if let Err(err) = self.kill() {
            log::warn!("[{}] kill failed: {err}", self.inner.id);
        }
        let reaped = self.inner.child.lock().wait();
        match reaped {
            Ok(exit) => {
                self.inner.advance(ProcessState::Exited(exit));
            }
            Err(err) => log::warn!("[{}] failed to reap child: {err}", self.inner.id),
        }
    }

    /// Poll until the child exits or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.poll().exit() {
                return Some(exit);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Block until the pump has delivered the exit event.
    pub fn join_pump(&self) {
        let pump = self.inner.pump.lock().take();
        if let Some(pump) = pump {
            if pump.join().is_err() {
                log::error!("[{}] output pump panicked", self.inner.id);
            }
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> Result<(), SupervisorError> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.inner.pid else {
            return self.kill_child();
        };
        let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
            pid,
            message: "pid out of range".to_string(),
        })?;
        // Spawned children lead their own group, so this reaches descendants.
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(SupervisorError::Signal {
                pid,
                message: errno.to_string(),
            }),
        }
    }

    #[cfg(unix)]
    fn send_terminate(&self) -> Result<(), SupervisorError> {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(unix)]
    fn send_kill(&self) -> Result<(), SupervisorError> {
        match self.signal_group(nix::sys::signal::Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("[{}] {err}; killing child directly", self.inner.id);
                self.kill_child()
            }
        }
    }

    #[cfg(windows)]
    fn send_terminate(&self) -> Result<(), SupervisorError> {
        use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

        match self.inner.strategy {
            SpawnStrategy::NativePty | SpawnStrategy::PtyHelper => {
                match self.write_bytes(b"\x03") {
                    Ok(()) => Ok(()),
                    Err(_) => self.kill_child(),
                }
            }
            SpawnStrategy::ConsolePty => {
                let Some(pid) = self.inner.pid else {
                    return self.kill_child();
                };
                // SAFETY: plain FFI call; the group id is our child's pid.
                let sent = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
                if sent == 0 {
                    self.kill_child()
                } else {
                    Ok(())
                }
            }
            SpawnStrategy::PlainPipes => self.kill_child(),
        }
    }

    #[cfg(not(unix))]
    fn send_kill(&self) -> Result<(), SupervisorError> {
        self.kill_child()
    }

    #[cfg(not(any(unix, windows)))]
    fn send_terminate(&self) -> Result<(), SupervisorError> {
        self.kill_child()
    }

    fn kill_child(&self) -> Result<(), SupervisorError> {
        let pid = self.inner.pid.unwrap_or_default();
        match self.inner.child.lock().kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(SupervisorError::Signal {
                pid,
                message: err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.inner.id)
            .field("pid", &self.inner.pid)
            .field("strategy", &self.inner.strategy)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
