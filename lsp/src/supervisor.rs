//! Owns the worker child process and its lifecycle.
//!
//! The supervisor is the only writer of [`WorkerState`]; the request channel's
//! reader task may additionally move a live worker to `Failed` when its
//! transport dies.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use netlinx_types::ProcessSpec;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{RequestChannel, Transport};
use crate::error::{RequestError, SupervisorError};
use crate::protocol;
use crate::shutdown::{self, Exit};
use crate::types::{SupervisorOptions, WorkerState};

/// Bound on the `shutdown` request sent while stopping.
const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

struct RunningWorker {
    spec: ProcessSpec,
    child: Child,
    transport: Transport,
    stderr_handle: Option<JoinHandle<()>>,
}

impl RunningWorker {
    fn abort_tasks(&self) {
        self.transport.abort();
        if let Some(handle) = &self.stderr_handle {
            handle.abort();
        }
    }
}

/// Owns at most one worker process at a time.
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    state_tx: Arc<watch::Sender<WorkerState>>,
    worker: Option<RunningWorker>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(options: SupervisorOptions) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            options,
            state_tx: Arc::new(state_tx),
            worker: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state_tx.borrow().clone()
    }

    /// Observe state transitions, including a running worker dying.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Request channel of the current worker, if one was started.
    #[must_use]
    pub fn channel(&self) -> Option<RequestChannel> {
        self.worker.as_ref().map(|w| w.transport.channel.clone())
    }

    fn set_state(&self, state: WorkerState) {
        tracing::debug!(state = %state, "worker state");
        self.state_tx.send_replace(state);
    }

    /// Spawn the worker and wait until it has completed the `initialize`
    /// handshake.
    ///
    /// Returns the channel for further requests. A failure before readiness
    /// leaves the supervisor `Failed`; nothing is retried.
    pub async fn start(&mut self, spec: &ProcessSpec) -> Result<RequestChannel, SupervisorError> {
        if !self.options.enabled {
            return Err(SupervisorError::Configuration(
                "language server is disabled in settings".to_string(),
            ));
        }
        spec.validate()
            .map_err(|e| SupervisorError::Configuration(e.to_string()))?;
        if self.state().is_live() {
            return Err(SupervisorError::AlreadyRunning);
        }

        // A previous worker that died on its own still needs reaping.
        if let Some(stale) = self.worker.take() {
            self.discard(stale).await;
        }

        let mut command = match build_command(spec) {
            Ok(command) => command,
            Err(e) => {
                self.set_state(WorkerState::Failed(e.to_string()));
                return Err(e);
            }
        };
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.set_state(WorkerState::Failed(source.to_string()));
                return Err(SupervisorError::Spawn {
                    command: spec.command().to_string(),
                    source,
                });
            }
        };
        tracing::info!(command = spec.command(), pid = ?child.id(), "worker spawned");
        self.set_state(WorkerState::Starting);

        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            let _ = child.kill().await;
            let reason = "worker stdio was not captured".to_string();
            self.set_state(WorkerState::Failed(reason.clone()));
            return Err(SupervisorError::Handshake(reason));
        };
        let stderr_handle = child.stderr.take().map(forward_stderr);
        let transport = RequestChannel::spawn(
            spec.command().to_string(),
            stdout,
            stdin,
            self.state_tx.clone(),
        );

        let channel = transport.channel.clone();
        // Owned by the supervisor before the first await, so `stop()` can
        // reap it if this future is dropped mid-handshake.
        self.worker = Some(RunningWorker {
            spec: spec.clone(),
            child,
            transport,
            stderr_handle,
        });

        let root = spec.cwd().unwrap_or(&self.options.workspace_root).to_path_buf();
        if let Err(reason) = self.handshake(&channel, &root).await {
            self.set_state(WorkerState::Failed(reason.clone()));
            self.discard_current().await;
            return Err(SupervisorError::Handshake(reason));
        }

        // The reader may have seen the worker die during the handshake.
        let became_running = self.state_tx.send_if_modified(|state| {
            if *state == WorkerState::Starting {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        if !became_running {
            let reason = match self.state() {
                WorkerState::Failed(reason) => reason,
                other => format!("unexpected state {other}"),
            };
            self.discard_current().await;
            return Err(SupervisorError::Handshake(reason));
        }

        tracing::info!(command = spec.command(), "worker ready");
        Ok(channel)
    }

    async fn handshake(&self, channel: &RequestChannel, root: &Path) -> Result<(), String> {
        let params = protocol::initialize_params(root);
        match channel
            .call("initialize", Some(params), self.options.init_timeout)
            .await
        {
            Ok(_) => {}
            Err(RequestError::Timeout { timeout, .. }) => {
                return Err(format!("no response to initialize within {timeout:?}"));
            }
            Err(e) => return Err(e.to_string()),
        }
        channel
            .send_notification("initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| e.to_string())
    }

    /// Stop the worker. Idempotent: a no-op when nothing is running.
    ///
    /// Sends `shutdown`/`exit`, then waits the configured grace period before
    /// escalating to SIGTERM and finally a kill.
    pub async fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            // Failed, or a stop that was itself cancelled after taking the worker.
            if self.state() != WorkerState::Idle {
                self.set_state(WorkerState::Idle);
            }
            return;
        };

        let was_running = self.state() == WorkerState::Running;
        self.set_state(WorkerState::Stopping);
        tracing::info!(command = worker.spec.command(), "stopping worker");

        let channel = worker.transport.channel.clone();
        if was_running
            && channel
                .call("shutdown", None, SHUTDOWN_REQUEST_TIMEOUT)
                .await
                .is_ok()
        {
            let _ = channel.send_notification("exit", None).await;
        }
        channel.close_writer().await;

        match shutdown::terminate_child(&mut worker.child, self.options.stop_grace).await {
            Ok((Exit::Killed, _)) => {
                tracing::warn!(command = worker.spec.command(), "worker did not exit in time, killed");
            }
            Ok((exit, status)) => {
                tracing::info!(command = worker.spec.command(), ?exit, %status, "worker exited");
            }
            Err(e) => {
                tracing::warn!(command = worker.spec.command(), "failed to reap worker: {e}");
            }
        }
        worker.abort_tasks();
        self.set_state(WorkerState::Idle);
    }

    /// `stop()` followed by `start()`.
    pub async fn restart(&mut self, spec: &ProcessSpec) -> Result<RequestChannel, SupervisorError> {
        self.stop().await;
        self.start(spec).await
    }

    async fn discard_current(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.discard(worker).await;
        }
    }

    async fn discard(&self, mut worker: RunningWorker) {
        worker.abort_tasks();
        if let Err(e) = worker.child.kill().await {
            tracing::debug!(command = worker.spec.command(), "kill after failure: {e}");
        }
    }
}

fn build_command(spec: &ProcessSpec) -> Result<Command, SupervisorError> {
    let mut cmd = if spec.shell() {
        shell_command(&spec.shell_command_line())
    } else {
        let resolved = which::which(spec.command()).map_err(|e| SupervisorError::Spawn {
            command: spec.command().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })?;
        let mut cmd = Command::new(resolved);
        cmd.args(spec.args());
        cmd
    };

    if let Some(cwd) = spec.cwd() {
        cmd.current_dir(cwd);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(cmd)
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

fn forward_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "netlinx_lsp::worker_stderr", "{line}");
        }
    })
}
