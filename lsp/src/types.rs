//! Public lifecycle types consumed by the engine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state of the supervised worker.
///
/// `Idle → Starting → Running → Stopping → Idle`, plus `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// The worker could not start or died unexpectedly.
    Failed(String),
}

impl WorkerState {
    /// Whether a worker process currently exists or is being launched.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Settings that shape how the supervisor launches and stops the worker.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// `false` when the language server is disabled in settings.
    pub enabled: bool,
    /// Bound on the `initialize` handshake.
    pub init_timeout: Duration,
    /// How long a stopping worker gets before escalation.
    pub stop_grace: Duration,
    /// Root sent in `initialize` when the `ProcessSpec` has no `cwd`.
    pub workspace_root: PathBuf,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
