//! Spawn strategies and the fallback chain between them.

use crate::error::SpawnError;
use crate::exit::ExitInfo;
use crate::probe::SpawnStrategy;
use crate::source::{ChannelSource, OutputSource};
use anyhow::{anyhow, Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use termrun_common::env::{color_env, pty_debug_enabled};
use termrun_common::{PumpSettings, SpawnSettings, TtyShimMode};

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Applied after the injected colour variables, so these win.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// OS process behind a handle.
pub(crate) enum ChildProcess {
    Pty(Box<dyn Child + Send + Sync>),
    Pipe(std::process::Child),
}

impl ChildProcess {
    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        match self {
            Self::Pty(child) => Ok(child
                .try_wait()?
                .map(|status| ExitInfo::from_portable_pty(&status))),
            Self::Pipe(child) => Ok(child.try_wait()?.map(ExitInfo::from_std)),
        }
    }

    pub(crate) fn kill(&mut self) -> io::Result<()> {
        match self {
            Self::Pty(child) => child.kill(),
            Self::Pipe(child) => child.kill(),
        }
    }

    /// Block until the child exits.
    pub(crate) fn wait(&mut self) -> io::Result<ExitInfo> {
        match self {
            Self::Pty(child) => Ok(ExitInfo::from_portable_pty(&child.wait()?)),
            Self::Pipe(child) => Ok(ExitInfo::from_std(child.wait()?)),
        }
    }
}

/// Everything a freshly started child hands over to its handle and pump.
pub(crate) struct SpawnedChild {
    pub strategy: SpawnStrategy,
    pub pid: Option<u32>,
    pub child: ChildProcess,
    pub input: Option<Box<dyn Write + Send>>,
    pub master: Option<Box<dyn MasterPty + Send>>,
    pub source: Box<dyn OutputSource>,
}

/// Try each strategy of `first`'s fallback chain until one starts the child.
pub(crate) fn spawn_with_fallback(
    spec: &LaunchSpec,
    first: SpawnStrategy,
    spawn: &SpawnSettings,
    pump: &PumpSettings,
    label: &str,
) -> Result<SpawnedChild, SpawnError> {
    if spec.argv.is_empty() || spec.program().is_empty() {
        return Err(SpawnError::EmptyCommand);
    }

    let mut failures = Vec::new();
    for strategy in first.fallback_chain() {
        match spawn_one(spec, strategy, spawn, pump, label) {
            Ok(spawned) => {
                log::info!(
                    "[{label}] started {} (pid {}) via {strategy}",
                    spec.program(),
                    spawned
                        .pid
                        .map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
                );
                return Ok(spawned);
            }
            Err(err) => {
                log::warn!("[{label}] {strategy} spawn failed: {err:#}");
                failures.push(format!("{strategy}: {err:#}"));
            }
        }
    }

    Err(SpawnError::AllStrategiesFailed {
        program: spec.program().to_string(),
        failures,
    })
}

fn spawn_one(
    spec: &LaunchSpec,
    strategy: SpawnStrategy,
    spawn: &SpawnSettings,
    pump: &PumpSettings,
    label: &str,
) -> Result<SpawnedChild> {
    let argv = effective_argv(spec, strategy, spawn.tty_shim);
    if strategy.uses_pty() {
        spawn_pty(spec, &argv, strategy, spawn, pump, label)
    } else {
        spawn_pipes(spec, &argv, strategy, spawn, pump, label)
    }
}

/// Argv after the isatty shim, which only matters when no real terminal is
/// attached unless the mode forces it.
pub(crate) fn effective_argv(
    spec: &LaunchSpec,
    strategy: SpawnStrategy,
    mode: TtyShimMode,
) -> Vec<String> {
    let apply = match mode {
        TtyShimMode::Always => true,
        TtyShimMode::Never => false,
        TtyShimMode::Auto => !strategy.uses_pty(),
    };
    if apply {
        termrun_shim::rewrite_for_tty(&spec.argv, spec.cwd.as_deref())
    } else {
        spec.argv.clone()
    }
}

fn working_dir(spec: &LaunchSpec) -> Result<PathBuf> {
    match &spec.cwd {
        Some(cwd) => Ok(cwd.clone()),
        None => std::env::current_dir().context("failed to resolve current directory"),
    }
}

fn spawn_pty(
    spec: &LaunchSpec,
    argv: &[String],
    strategy: SpawnStrategy,
    settings: &SpawnSettings,
    pump: &PumpSettings,
    label: &str,
) -> Result<SpawnedChild> {
    let size = PtySize {
        rows: settings.rows,
        cols: settings.cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    let pair = native_pty_system().openpty(size).map_err(|e| {
        #[cfg(windows)]
        {
            anyhow!("PTY creation failed (ConPTY requires Windows 10 1809 or later): {e}")
        }
        #[cfg(not(windows))]
        {
            anyhow!("failed to create PTY: {e}")
        }
    })?;

    let mut cmd = CommandBuilder::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.cwd(working_dir(spec)?);
    for (key, value) in color_env(&settings.term) {
        cmd.env(key, value);
    }
    cmd.env("COLUMNS", settings.cols.to_string());
    cmd.env("LINES", settings.rows.to_string());
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    if pty_debug_enabled() {
        log::debug!(
            "[{label}] PTY allocated: {}x{}",
            settings.cols,
            settings.rows
        );
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("failed to spawn {} on PTY", argv[0]))?;
    // The child holds its own copy; keeping ours would stop EOF on the master.
    drop(pair.slave);

    let pid = child.process_id();
    #[cfg(unix)]
    if pty_debug_enabled() {
        verify_process_group(pid);
    }

    let attached = pair
        .master
        .take_writer()
        .context("failed to create PTY writer")
        .and_then(|writer| Ok((writer, pty_source(pair.master.as_ref(), pump, label)?)));
    let (writer, source) = match attached {
        Ok(attached) => attached,
        Err(err) => {
            let _ = child.kill();
            return Err(err);
        }
    };

    Ok(SpawnedChild {
        strategy,
        pid,
        child: ChildProcess::Pty(child),
        input: Some(writer),
        master: Some(pair.master),
        source,
    })
}

#[cfg(unix)]
fn pty_source(
    master: &(dyn MasterPty + Send),
    pump: &PumpSettings,
    label: &str,
) -> Result<Box<dyn OutputSource>> {
    use crate::source::{PollSource, PolledReader};
    use std::os::fd::BorrowedFd;

    if let Some(fd) = master.as_raw_fd() {
        // SAFETY: `fd` is owned by `master`, which is alive for this call; the
        // source gets its own duplicate.
        let owned = unsafe { BorrowedFd::borrow_raw(fd) }
            .try_clone_to_owned()
            .context("failed to duplicate PTY master")?;
        let readers: Vec<Box<dyn PolledReader>> = vec![Box::new(std::fs::File::from(owned))];
        return Ok(Box::new(PollSource::new(readers, pump.chunk_size)));
    }

    let reader = master
        .try_clone_reader()
        .context("failed to create PTY reader")?;
    Ok(Box::new(
        ChannelSource::spawn(label, vec![reader], pump.chunk_size)
            .context("failed to start PTY reader thread")?,
    ))
}

#[cfg(not(unix))]
fn pty_source(
    master: &(dyn MasterPty + Send),
    pump: &PumpSettings,
    label: &str,
) -> Result<Box<dyn OutputSource>> {
    let reader = master
        .try_clone_reader()
        .context("failed to create PTY reader")?;
    Ok(Box::new(
        ChannelSource::spawn(label, vec![reader], pump.chunk_size)
            .context("failed to start PTY reader thread")?,
    ))
}

fn spawn_pipes(
    spec: &LaunchSpec,
    argv: &[String],
    strategy: SpawnStrategy,
    settings: &SpawnSettings,
    pump: &PumpSettings,
    label: &str,
) -> Result<SpawnedChild> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(working_dir(spec)?)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in color_env(&settings.term) {
        cmd.env(key, value);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    own_process_group(&mut cmd, strategy);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", argv[0]))?;

    let stdin = child.stdin.take().map(|s| Box::new(s) as Box<dyn Write + Send>);
    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;
    let source = match pipe_source(stdout, stderr, pump, label) {
        Ok(source) => source,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };

    Ok(SpawnedChild {
        strategy,
        pid: Some(child.id()),
        child: ChildProcess::Pipe(child),
        input: stdin,
        master: None,
        source,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command, _strategy: SpawnStrategy) {
    use std::os::unix::process::CommandExt;
    // Lets terminate/kill reach grandchildren through the group.
    cmd.process_group(0);
}

#[cfg(windows)]
fn own_process_group(cmd: &mut Command, strategy: SpawnStrategy) {
    use std::os::windows::process::CommandExt;
    use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
    if strategy == SpawnStrategy::ConsolePty {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

#[cfg(not(any(unix, windows)))]
fn own_process_group(_cmd: &mut Command, _strategy: SpawnStrategy) {}

#[cfg(unix)]
fn pipe_source(
    stdout: std::process::ChildStdout,
    stderr: std::process::ChildStderr,
    pump: &PumpSettings,
    _label: &str,
) -> Result<Box<dyn OutputSource>> {
    use crate::source::{PollSource, PolledReader};
    let readers: Vec<Box<dyn PolledReader>> = vec![Box::new(stdout), Box::new(stderr)];
    Ok(Box::new(PollSource::new(readers, pump.chunk_size)))
}

#[cfg(not(unix))]
fn pipe_source(
    stdout: std::process::ChildStdout,
    stderr: std::process::ChildStderr,
    pump: &PumpSettings,
    label: &str,
) -> Result<Box<dyn OutputSource>> {
    let readers: Vec<Box<dyn std::io::Read + Send>> = vec![Box::new(stdout), Box::new(stderr)];
    Ok(Box::new(
        ChannelSource::spawn(label, readers, pump.chunk_size)
            .context("failed to start pipe reader threads")?,
    ))
}

#[cfg(unix)]
pub(crate) fn verify_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Ok(output) = Command::new("ps")
            .args(["-o", "pid,pgid,tpgid,stat", "-p", &pid.to_string()])
            .output()
        {
            let output_str = String::from_utf8_lossy(&output.stdout);
            log::debug!("Process group info for {pid}: {output_str}");
        }
    }
}
