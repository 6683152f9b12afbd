mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use termrun_common::EngineSettings;
use termrun_supervisor::{LaunchSpec, ProcessHandle, Supervisor};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let exit_code = run(Cli::parse())?;
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut settings =
        EngineSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(strategy) = cli.strategy {
        settings.spawn.strategy = strategy;
    }

    let (exit_tx, exit_rx) = mpsc::channel();
    let sink = output::build_sink(cli.format, &settings, exit_tx);
    let supervisor = Supervisor::new(settings, Arc::clone(&sink));

    let mut spec = LaunchSpec::new(cli.command);
    spec.cwd = cli.cwd;
    spec.env = cli.env;
    let handle = supervisor.start(spec)?;
    log::debug!(
        "[{}] running with {} (pid {:?})",
        handle.id(),
        handle.strategy(),
        handle.pid()
    );

    install_interrupt_handler(handle.clone(), Duration::from_millis(cli.grace_ms))?;
    forward_stdin(handle.clone());

    let exit_code = loop {
        let (id, code) = exit_rx
            .recv()
            .context("output pump stopped without reporting an exit")?;
        if id == handle.id() {
            break code;
        }
    };
    handle.join_pump();
    drop(supervisor);
    // Last reference: stops the render ticker after its final flush.
    drop(sink);
    Ok(exit_code)
}

/// First Ctrl-C terminates the child and arms a kill after `grace`; a second
/// one kills immediately.
fn install_interrupt_handler(handle: ProcessHandle, grace: Duration) -> Result<()> {
    let presses = AtomicUsize::new(0);
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(err) = handle.terminate() {
                log::warn!("[{}] terminate failed: {err}", handle.id());
            }
            let handle = handle.clone();
            thread::spawn(move || {
                if handle.wait_timeout(grace).is_none() {
                    if let Err(err) = handle.kill() {
                        log::warn!("[{}] kill failed: {err}", handle.id());
                    }
                }
            });
        } else if let Err(err) = handle.kill() {
            log::warn!("[{}] kill failed: {err}", handle.id());
        }
    })
    .context("failed to install Ctrl-C handler")
}

/// Forward our stdin to the child line by line; end of input closes the
/// child's input.
fn forward_stdin(handle: ProcessHandle) {
    let spawned = thread::Builder::new()
        .name("termrun-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if handle.write_line(&line).is_err() {
                    return;
                }
            }
            handle.close_input();
        });
    if let Err(err) = spawned {
        log::warn!("stdin forwarding unavailable: {err}");
    }
}
