//! Change notification strategies.
//!
//! A strategy only says "something may have changed". The tailer re-stats on
//! every event, so strategies are free to over-report, coalesce or drop
//! events.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Hint that the watched file may have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("{} has no parent directory to watch", .0.display())]
    NoParent(PathBuf),
}

/// A way of producing [`ChangeEvent`]s for one file.
pub trait WatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start emitting events for `path` into `events` until the guard drops.
    fn watch(&self, path: &Path, events: mpsc::Sender<ChangeEvent>) -> Result<WatchGuard, WatchError>;
}

/// Keeps a watch alive. Dropping it stops event production.
#[must_use = "the watch stops when the guard is dropped"]
pub struct WatchGuard {
    inner: GuardInner,
}

enum GuardInner {
    Notify(#[allow(dead_code)] RecommendedWatcher),
    Task(JoinHandle<()>),
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            GuardInner::Notify(_) => "notify",
            GuardInner::Task(_) => "task",
        };
        f.debug_struct("WatchGuard").field("kind", &kind).finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let GuardInner::Task(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// The platform file watcher, pointed at the file's parent directory.
///
/// Watching the directory rather than the file keeps working across
/// delete-and-recreate rotation.
#[derive(Debug, Default)]
pub struct NotifyWatch;

impl WatchStrategy for NotifyWatch {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn watch(&self, path: &Path, events: mpsc::Sender<ChangeEvent>) -> Result<WatchGuard, WatchError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?;
        let file_name: Option<OsString> = path.file_name().map(OsString::from);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let ours = event.paths.is_empty()
                || event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(OsString::from) == file_name);
            if ours {
                // Full channel means an event is already queued.
                let _ = events.try_send(ChangeEvent);
            }
        })?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        Ok(WatchGuard {
            inner: GuardInner::Notify(watcher),
        })
    }
}

/// Fixed-interval fallback for filesystems without change notification.
#[derive(Debug, Clone, Copy)]
pub struct PollWatch {
    interval: Duration,
}

impl PollWatch {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
        }
    }
}

impl WatchStrategy for PollWatch {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn watch(&self, _path: &Path, events: mpsc::Sender<ChangeEvent>) -> Result<WatchGuard, WatchError> {
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(TrySendError::Closed(_)) = events.try_send(ChangeEvent) {
                    break;
                }
            }
        });
        Ok(WatchGuard {
            inner: GuardInner::Task(handle),
        })
    }
}

/// Native notification first, polling as the fallback.
#[must_use]
pub fn default_strategies(poll_interval: Duration) -> Vec<Box<dyn WatchStrategy>> {
    vec![Box::new(NotifyWatch), Box::new(PollWatch::new(poll_interval))]
}
