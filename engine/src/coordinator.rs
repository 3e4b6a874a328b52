//! Ties the supervisor, the log path query and the tailer together.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use netlinx_lsp::{ProcessSupervisor, RequestChannel, SupervisorError, WorkerState};
use netlinx_tail::{LogTailer, TailError, TailSink};
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::notifications::{self, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Owns the worker, its request channel and the log tailer for one session.
///
/// Log tailing is best effort: activation succeeds once the worker is
/// ready, whether or not its log file could be followed.
pub struct LifecycleCoordinator {
    config: EngineConfig,
    sink: Arc<dyn TailSink>,
    notifier: Arc<dyn Notifier>,
    supervisor: ProcessSupervisor,
    tailer: Option<LogTailer>,
    /// Set once a tailer has written to the sink in this session.
    sink_dirty: bool,
    state: CoordinatorState,
}

impl LifecycleCoordinator {
    #[must_use]
    pub fn new(config: EngineConfig, sink: Arc<dyn TailSink>, notifier: Arc<dyn Notifier>) -> Self {
        let supervisor = ProcessSupervisor::new(config.supervisor.clone());
        Self {
            config,
            sink,
            notifier,
            supervisor,
            tailer: None,
            sink_dirty: false,
            state: CoordinatorState::Stopped,
        }
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    #[must_use]
    pub fn worker_state(&self) -> WorkerState {
        self.supervisor.state()
    }

    /// Observe worker state, e.g. to notice the server dying while active.
    #[must_use]
    pub fn subscribe_worker(&self) -> watch::Receiver<WorkerState> {
        self.supervisor.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Log file currently streamed into the sink.
    #[must_use]
    pub fn tailing_path(&self) -> Option<&Path> {
        self.tailer.as_ref().map(LogTailer::path)
    }

    /// Start the language server and, if it reports one, tail its log file.
    ///
    /// A no-op when already active. Any start failure, including a server
    /// disabled in settings, is reported through the notifier and returned.
    pub async fn activate(&mut self) -> Result<(), ActivationError> {
        match self.state {
            CoordinatorState::Active => return Ok(()),
            CoordinatorState::Stopped => {}
            // An earlier activate or deactivate was dropped part way through.
            CoordinatorState::Starting | CoordinatorState::Stopping => self.deactivate().await,
        }
        let name = self.config.language.display_name().to_string();

        self.state = CoordinatorState::Starting;
        let channel = match self.supervisor.start(&self.config.server).await {
            Ok(channel) => channel,
            Err(e) => {
                self.notifier.error(&notifications::failed_to_start(&name, &e));
                self.state = CoordinatorState::Stopped;
                return Err(e.into());
            }
        };
        tracing::info!(server = %name, command = self.config.server.command(), "Language server started");

        self.attach_log(&channel).await;

        self.state = CoordinatorState::Active;
        self.notifier.info(&notifications::activated(&name));
        Ok(())
    }

    async fn attach_log(&mut self, channel: &RequestChannel) {
        let path = match channel
            .resolve_log_path(&self.config.log_path_method, self.config.request_timeout)
            .await
        {
            Ok(Some(path)) => path,
            Ok(None) => {
                tracing::info!("Language server has no log file configured");
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to get log path: {e}");
                return;
            }
        };

        // A re-attach replays the whole file; drop what the last session showed.
        if self.sink_dirty {
            self.sink.clear();
        }
        match LogTailer::attach(&path, Arc::clone(&self.sink), &self.config.tail).await {
            Ok(tailer) => {
                self.sink_dirty = true;
                tracing::info!(
                    path = %path.display(),
                    strategy = tailer.strategy(),
                    "Tailing language server log"
                );
                self.tailer = Some(tailer);
            }
            Err(TailError::FileNotFound(path)) => {
                tracing::warn!(path = %path.display(), "Log file does not exist");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to tail log file: {e}");
            }
        }
    }

    /// Stop tailing, then stop the server. Never fails; a no-op when stopped.
    pub async fn deactivate(&mut self) {
        if self.state == CoordinatorState::Stopped {
            return;
        }
        self.state = CoordinatorState::Stopping;
        if let Some(mut tailer) = self.tailer.take() {
            tailer.detach();
        }
        self.supervisor.stop().await;
        self.state = CoordinatorState::Stopped;
        tracing::info!(server = %self.config.language.display_name(), "Language server stopped");
    }

    pub async fn restart(&mut self) -> Result<(), ActivationError> {
        self.deactivate().await;
        self.activate().await
    }

    /// Deactivate and release the sink for good.
    pub async fn shutdown(mut self) {
        self.deactivate().await;
        self.sink.dispose();
    }
}

impl fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("state", &self.state)
            .field("worker", &self.supervisor.state())
            .field("tailing", &self.tailing_path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use netlinx_tail::MemorySink;
    use netlinx_types::ProcessSpec;

    use super::*;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(bool, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn info(&self, message: &str) {
            self.messages.lock().unwrap().push((false, message.to_string()));
        }

        fn error(&self, message: &str) {
            self.messages.lock().unwrap().push((true, message.to_string()));
        }
    }

    fn coordinator(
        server: ProcessSpec,
    ) -> (LifecycleCoordinator, Arc<MemorySink>, Arc<RecordingNotifier>) {
        let config = EngineConfig {
            server,
            ..EngineConfig::default()
        };
        let sink = Arc::new(MemorySink::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = LifecycleCoordinator::new(config, sink.clone(), notifier.clone());
        (coordinator, sink, notifier)
    }

    #[tokio::test]
    async fn deactivate_twice_is_a_no_op() {
        let (mut coordinator, sink, notifier) = coordinator(ProcessSpec::new("netlinx-language-server"));
        coordinator.deactivate().await;
        coordinator.deactivate().await;
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert!(sink.calls().is_empty());
        assert!(notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_command_reports_error_and_stays_stopped() {
        let (mut coordinator, _sink, notifier) = coordinator(ProcessSpec::new(""));
        let err = coordinator.activate().await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Supervisor(SupervisorError::Configuration(_))
        ));
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert_eq!(coordinator.worker_state(), WorkerState::Idle);

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0);
        assert!(
            messages[0]
                .1
                .starts_with("Failed to start NetLinx language server: ")
        );
    }

    #[tokio::test]
    async fn disabled_server_reports_configuration_error() {
        let mut config = EngineConfig::default();
        config.supervisor.enabled = false;
        let notifier = Arc::new(RecordingNotifier::default());
        let mut coordinator =
            LifecycleCoordinator::new(config, Arc::new(MemorySink::new()), notifier.clone());

        let err = coordinator.activate().await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Supervisor(SupervisorError::Configuration(msg)) if msg.contains("disabled")
        ));
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert_eq!(coordinator.worker_state(), WorkerState::Idle);

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0);
        assert!(messages[0].1.contains("disabled in settings"));
    }

    #[tokio::test]
    async fn shutdown_disposes_sink() {
        let (coordinator, sink, _notifier) = coordinator(ProcessSpec::new("netlinx-language-server"));
        coordinator.shutdown().await;
        assert!(sink.is_disposed());
    }
}
