//! NetLinx CLI - runs the language server and streams its log to stdout.
//!
//! ```text
//! main() -> LifecycleCoordinator::activate() -> wait for Ctrl-C | SIGHUP | worker failure
//!                                                  |
//!                                                  v
//!                                   shutdown() | restart() | shutdown()
//! ```
//!
//! Diagnostics go to `~/.netlinx/logs/netlinx.log` so they never interleave
//! with the streamed server log.

mod console;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use netlinx_engine::{EngineConfig, LifecycleCoordinator, NetlinxConfig, Notifier, TracingNotifier};
use netlinx_lsp::WorkerState;

use crate::console::ConsoleSink;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No writable log file: stdout carries the server log, so use stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: next to the config file, normally ~/.netlinx/logs/netlinx.log
    if let Some(config_path) = NetlinxConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("netlinx.log"));
    }

    // Fallback: ./.netlinx/logs/netlinx.log
    candidates.push(PathBuf::from(".netlinx").join("logs").join("netlinx.log"));

    candidates
}

fn load_config() -> EngineConfig {
    match NetlinxConfig::load() {
        Ok(Some(file)) => EngineConfig::from(file),
        Ok(None) => EngineConfig::default(),
        Err(e) => {
            eprintln!("Ignoring config: {e}");
            EngineConfig::default()
        }
    }
}

/// Why the main loop ended.
enum Exit {
    Interrupted,
    WorkerFailed(String),
}

/// Resolves on each SIGHUP; never resolves once the signal stream is gone.
#[cfg(unix)]
async fn hangup(signal: &mut Option<tokio::signal::unix::Signal>) {
    if let Some(stream) = signal
        && stream.recv().await.is_some()
    {
        return;
    }
    *signal = None;
    std::future::pending().await
}

async fn run(coordinator: &mut LifecycleCoordinator) -> Result<Exit> {
    let mut worker = coordinator.subscribe_worker();
    #[cfg(unix)]
    let mut sighup =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).ok();

    loop {
        #[cfg(unix)]
        let restart = hangup(&mut sighup);
        #[cfg(not(unix))]
        let restart = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                return Ok(Exit::Interrupted);
            }
            () = restart => {
                tracing::info!("Restarting language server on SIGHUP");
                coordinator.restart().await?;
            }
            changed = worker.changed() => {
                if changed.is_err() {
                    return Ok(Exit::Interrupted);
                }
                if let WorkerState::Failed(reason) = worker.borrow_and_update().clone() {
                    return Ok(Exit::WorkerFailed(reason));
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let config = load_config();
    let display_name = config.language.display_name().to_string();
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let mut coordinator =
        LifecycleCoordinator::new(config, Arc::new(ConsoleSink::stdout()), Arc::clone(&notifier));

    // Start failures, a disabled server included, were already sent to the notifier.
    if let Err(e) = coordinator.activate().await {
        coordinator.shutdown().await;
        return Err(e).with_context(|| format!("{display_name} language server did not start"));
    }
    if let Some(path) = coordinator.tailing_path() {
        eprintln!("Streaming {}", path.display());
    }

    let exit = run(&mut coordinator).await;
    coordinator.shutdown().await;

    Ok(report_exit(&exit?, notifier.as_ref(), &display_name))
}

/// A dead worker is reported once, through the notifier.
fn report_exit(exit: &Exit, notifier: &dyn Notifier, display_name: &str) -> ExitCode {
    match exit {
        Exit::Interrupted => ExitCode::SUCCESS,
        Exit::WorkerFailed(reason) => {
            notifier.error(&format!("{display_name} language server exited: {reason}"));
            ExitCode::FAILURE
        }
    }
}
