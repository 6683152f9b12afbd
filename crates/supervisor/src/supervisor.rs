//! The process supervisor: starts children and tracks their handles.

use crate::error::{SpawnError, SupervisorError};
use crate::handle::{ProcessHandle, ProcessState};
use crate::probe::{self, CapabilityProber, SpawnStrategy};
use crate::pump::run_pump;
use crate::spawn::{spawn_with_fallback, LaunchSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use termrun_common::{EngineSettings, HandleId, OutputSink};

pub struct Supervisor {
    settings: EngineSettings,
    sink: Arc<dyn OutputSink>,
    prober: Option<CapabilityProber>,
    handles: Mutex<HashMap<HandleId, ProcessHandle>>,
}

impl Supervisor {
    /// Supervisor delivering every child's output to `sink`. Spawn strategy
    /// comes from the settings, or the process-wide probe on `auto`.
    pub fn new(settings: EngineSettings, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            settings,
            sink,
            prober: None,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Use a dedicated prober instead of the process-wide one.
    pub fn with_prober(mut self, prober: CapabilityProber) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Strategy the next `start` tries first.
    pub fn preferred_strategy(&self) -> SpawnStrategy {
        if let Some(forced) = SpawnStrategy::from_preference(self.settings.spawn.strategy) {
            return forced;
        }
        match &self.prober {
            Some(prober) => prober.probe(),
            None => probe::probe(),
        }
    }

    /// Spawn a child and its output pump.
    ///
    /// Strategies are tried along the preferred strategy's fallback chain; the
    /// caller only sees an error when every one of them failed.
    pub fn start(&self, spec: LaunchSpec) -> Result<ProcessHandle, SpawnError> {
        let id = HandleId::next();
        let label = id.to_string();
        let spawned = spawn_with_fallback(
            &spec,
            self.preferred_strategy(),
            &self.settings.spawn,
            &self.settings.pump,
            &label,
        )?;

        let (handle, mut source) = ProcessHandle::new(id, spawned);
        let probe = handle.probe();
        let sink = Arc::clone(&self.sink);
        let pump_settings = self.settings.pump.clone();
        let pump = thread::Builder::new()
            .name(format!("{label}-pump"))
            .spawn(move || {
                run_pump(id, source.as_mut(), probe.as_ref(), sink.as_ref(), &pump_settings);
            });

        match pump {
            Ok(pump) => handle.set_pump(pump),
            Err(err) => return Err(abandon_without_pump(&handle, &spec, err)),
        }

        self.handles.lock().insert(id, handle.clone());
        Ok(handle)
    }

    pub fn handle(&self, id: HandleId) -> Option<ProcessHandle> {
        self.handles.lock().get(&id).cloned()
    }

    fn lookup(&self, id: HandleId) -> Result<ProcessHandle, SupervisorError> {
        self.handle(id).ok_or(SupervisorError::UnknownHandle(id))
    }

    pub fn write(&self, id: HandleId, text: &str) -> Result<(), SupervisorError> {
        self.lookup(id)?.write(text)
    }

    pub fn write_line(&self, id: HandleId, line: &str) -> Result<(), SupervisorError> {
        self.lookup(id)?.write_line(line)
    }

    pub fn terminate(&self, id: HandleId) -> Result<(), SupervisorError> {
        self.lookup(id)?.terminate()
    }

    pub fn kill(&self, id: HandleId) -> Result<(), SupervisorError> {
        self.lookup(id)?.kill()
    }

    pub fn poll(&self, id: HandleId) -> Result<ProcessState, SupervisorError> {
        Ok(self.lookup(id)?.poll())
    }

    pub fn resize(&self, id: HandleId, rows: u16, cols: u16) -> Result<bool, SupervisorError> {
        Ok(self.lookup(id)?.resize(rows, cols))
    }

    /// Handles whose child has not exited yet, in start order.
    pub fn live_handles(&self) -> Vec<HandleId> {
        let handles: Vec<ProcessHandle> = self.handles.lock().values().cloned().collect();
        let mut live: Vec<HandleId> = handles
            .into_iter()
            .filter(|h| h.is_running())
            .map(|h| h.id())
            .collect();
        live.sort();
        live
    }

    /// Forget an exited handle. Returns false while the child still runs.
    pub fn release(&self, id: HandleId) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        if handle.is_running() {
            return false;
        }
        handle.join_pump();
        self.handles.lock().remove(&id);
        true
    }

    /// Terminate every live child, kill whatever is left after `grace`, and
    /// wait for their pumps to deliver the exit events.
    pub fn shutdown(&self, grace: Duration) {
        let handles: Vec<ProcessHandle> = self.handles.lock().values().cloned().collect();
        for handle in &handles {
            if let Err(err) = handle.terminate() {
                log::warn!("[{}] terminate during shutdown failed: {err}", handle.id());
            }
        }

        let deadline = Instant::now() + grace;
        for handle in &handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if handle.wait_timeout(remaining).is_none() {
                if let Err(err) = handle.kill() {
                    log::warn!("[{}] kill during shutdown failed: {err}", handle.id());
                }
            }
        }

        for handle in &handles {
            handle.join_pump();
        }
        log::debug!("supervisor shut down {} handle(s)", handles.len());
    }
}

/// The child is running but nothing will ever read its output: stop it.
fn abandon_without_pump(
    handle: &ProcessHandle,
    spec: &LaunchSpec,
    err: std::io::Error,
) -> SpawnError {
    log::error!("[{}] failed to start output pump: {err}", handle.id());
    handle.kill_and_reap();
    SpawnError::PumpUnavailable {
        program: spec.argv.first().cloned().unwrap_or_default(),
        source: err,
    }
}
