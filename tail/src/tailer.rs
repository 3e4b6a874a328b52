//! Attach/detach lifecycle around one tailed file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TailError;
use crate::sink::TailSink;
use crate::state::{Change, TailState};
use crate::watch::{ChangeEvent, WatchGuard, WatchStrategy, default_strategies};

#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Quiet period after an event before reading, so bursts of writes
    /// coalesce into one read.
    pub debounce: Duration,
    /// Interval for the polling fallback.
    pub poll_interval: Duration,
    /// Capacity of the event queue between watcher and tail task.
    pub event_capacity: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            poll_interval: Duration::from_secs(1),
            event_capacity: 16,
        }
    }
}

/// Streams one file into a sink until detached.
///
/// All reads and sink calls for the file happen on a single task, so events
/// are processed serially and sink calls arrive in file order.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    strategy: &'static str,
    attached: Arc<Attachment>,
    guard: Option<WatchGuard>,
    task: Option<JoinHandle<()>>,
}

impl LogTailer {
    /// Deliver the file's current content, then follow it with the default
    /// watch strategies.
    pub async fn attach(
        path: impl Into<PathBuf>,
        sink: Arc<dyn TailSink>,
        options: &TailOptions,
    ) -> Result<Self, TailError> {
        let strategies = default_strategies(options.poll_interval);
        Self::attach_with(path, sink, options, &strategies).await
    }

    /// Like [`LogTailer::attach`], trying `strategies` in order.
    pub async fn attach_with(
        path: impl Into<PathBuf>,
        sink: Arc<dyn TailSink>,
        options: &TailOptions,
        strategies: &[Box<dyn WatchStrategy>],
    ) -> Result<Self, TailError> {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::FileNotFound(path));
            }
            Err(source) => return Err(TailError::Io { path, source }),
        };

        // Watch before the initial read so writes made during it still
        // produce an event.
        let (events_tx, events_rx) = mpsc::channel(options.event_capacity.max(1));
        let (guard, strategy) = start_watch(&path, strategies, &events_tx)?;
        drop(events_tx);

        let attached = Arc::new(Attachment::new());
        let mut state = TailState::new(path.clone());
        let mut file = File::open(&path).await.map_err(|source| TailError::Io {
            path: path.clone(),
            source,
        })?;
        let gated = GatedSink {
            inner: sink.as_ref(),
            attached: &attached,
        };
        state
            .apply(&mut file, size, &gated)
            .await
            .map_err(|source| TailError::Io {
                path: path.clone(),
                source,
            })?;
        drop(file);

        tracing::debug!(path = %path.display(), strategy, bytes = size, "Attached log tailer");

        let task = tokio::spawn(follow(
            state,
            events_rx,
            sink,
            Arc::clone(&attached),
            options.debounce,
        ));

        Ok(Self {
            path,
            strategy,
            attached,
            guard: Some(guard),
            task: Some(task),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the watch strategy in use.
    #[must_use]
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.is_live()
    }

    /// Stop watching. No sink call happens after this returns, even for an
    /// event already being processed. Idempotent.
    pub fn detach(&mut self) {
        if self.attached.end() {
            tracing::debug!(path = %self.path.display(), "Detached log tailer");
        }
        self.guard.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LogTailer {
    fn drop(&mut self) {
        self.detach();
    }
}

fn start_watch(
    path: &Path,
    strategies: &[Box<dyn WatchStrategy>],
    events: &mpsc::Sender<ChangeEvent>,
) -> Result<(WatchGuard, &'static str), TailError> {
    for strategy in strategies {
        match strategy.watch(path, events.clone()) {
            Ok(guard) => return Ok((guard, strategy.name())),
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    strategy = strategy.name(),
                    "Watch strategy unavailable: {e}"
                );
            }
        }
    }
    Err(TailError::NoWatchStrategy(path.to_path_buf()))
}

async fn follow(
    mut state: TailState,
    mut events: mpsc::Receiver<ChangeEvent>,
    sink: Arc<dyn TailSink>,
    attached: Arc<Attachment>,
    debounce: Duration,
) {
    while events.recv().await.is_some() {
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        while events.try_recv().is_ok() {}

        if !attached.is_live() {
            break;
        }

        let size = match tokio::fs::metadata(state.path()).await {
            Ok(meta) => meta.len(),
            // Deleted or unreadable: wait for it to come back.
            Err(e) => {
                tracing::debug!(path = %state.path().display(), "Log file unavailable: {e}");
                continue;
            }
        };
        if state.diff(size) == Change::Unchanged {
            continue;
        }

        let mut file = match File::open(state.path()).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %state.path().display(), "Log file open failed: {e}");
                continue;
            }
        };
        let gated = GatedSink {
            inner: sink.as_ref(),
            attached: &attached,
        };
        if let Err(e) = state.apply(&mut file, size, &gated).await {
            tracing::debug!(path = %state.path().display(), "Log file read failed: {e}");
        }
    }
}

/// Whether the tailer is still attached.
///
/// Sink calls run under the lock, so once [`Attachment::end`] returns no
/// call is in flight and none will start.
#[derive(Debug)]
struct Attachment(Mutex<bool>);

impl Attachment {
    fn new() -> Self {
        Self(Mutex::new(true))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self) -> bool {
        *self.lock()
    }

    /// Returns whether this call did the detaching.
    fn end(&self) -> bool {
        std::mem::replace(&mut *self.lock(), false)
    }

    fn run(&self, f: impl FnOnce()) {
        let live = self.lock();
        if *live {
            f();
        }
    }
}

/// Drops every call once the tailer is detached.
struct GatedSink<'a> {
    inner: &'a dyn TailSink,
    attached: &'a Attachment,
}

impl TailSink for GatedSink<'_> {
    fn append(&self, text: &str) {
        self.attached.run(|| self.inner.append(text));
    }

    fn clear(&self) {
        self.attached.run(|| self.inner.clear());
    }

    fn dispose(&self) {
        self.attached.run(|| self.inner.dispose());
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::sink::{MemorySink, SinkCall};
    use crate::watch::{NotifyWatch, PollWatch};

    /// Records like [`MemorySink`], but once armed the next append stalls
    /// until the test releases it.
    #[derive(Default)]
    struct StallingSink {
        inner: MemorySink,
        armed: AtomicBool,
        entered: StallPoint,
        release: StallPoint,
    }

    struct StallPoint(Barrier);

    impl Default for StallPoint {
        fn default() -> Self {
            Self(Barrier::new(2))
        }
    }

    impl TailSink for StallingSink {
        fn append(&self, text: &str) {
            self.inner.append(text);
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.0.wait();
                self.release.0.wait();
            }
        }

        fn clear(&self) {
            self.inner.clear();
        }

        fn dispose(&self) {
            self.inner.dispose();
        }
    }

    fn fast_options() -> TailOptions {
        TailOptions {
            debounce: Duration::from_millis(20),
            poll_interval: Duration::from_millis(20),
            event_capacity: 4,
        }
    }

    fn poll_only() -> Vec<Box<dyn WatchStrategy>> {
        vec![Box::new(PollWatch::new(Duration::from_millis(20)))]
    }

    async fn wait_for(sink: &MemorySink, expected: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sink.contents() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "sink never showed {expected:?}, has {:?}",
                sink.contents()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let err = LogTailer::attach(dir.path().join("absent.log"), sink.clone(), &fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, TailError::FileNotFound(_)));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn no_usable_strategy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "x").unwrap();
        let sink = Arc::new(MemorySink::new());
        let err = LogTailer::attach_with(&path, sink, &fast_options(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TailError::NoWatchStrategy(_)));
    }

    #[tokio::test]
    async fn initial_content_then_appends_then_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "boot\n").unwrap();

        let sink = Arc::new(MemorySink::new());
        let tailer = LogTailer::attach_with(&path, sink.clone(), &fast_options(), &poll_only())
            .await
            .unwrap();
        assert_eq!(tailer.strategy(), "poll");
        assert_eq!(sink.contents(), "boot\n");

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"ready\n").unwrap();
        file.flush().unwrap();
        wait_for(&sink, "boot\nready\n").await;

        std::fs::write(&path, "rotated\n").unwrap();
        wait_for(&sink, "rotated\n").await;
        assert_eq!(sink.clear_count(), 1);
    }

    #[tokio::test]
    async fn notify_strategy_follows_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "").unwrap();

        let sink = Arc::new(MemorySink::new());
        let strategies: Vec<Box<dyn WatchStrategy>> = vec![
            Box::new(NotifyWatch),
            Box::new(PollWatch::new(Duration::from_millis(20))),
        ];
        let _tailer = LogTailer::attach_with(&path, sink.clone(), &fast_options(), &strategies)
            .await
            .unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"line one\n").unwrap();
        file.flush().unwrap();
        wait_for(&sink, "line one\n").await;
    }

    #[tokio::test]
    async fn deleted_file_is_waited_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "first\n").unwrap();

        let sink = Arc::new(MemorySink::new());
        let tailer = LogTailer::attach_with(&path, sink.clone(), &fast_options(), &poll_only())
            .await
            .unwrap();

        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tailer.is_attached());
        assert_eq!(sink.contents(), "first\n");

        // Recreate atomically with longer content: the new tail is read on.
        let staged = dir.path().join("server.log.new");
        std::fs::write(&staged, "first\nmore\n").unwrap();
        std::fs::rename(&staged, &path).unwrap();
        wait_for(&sink, "first\nmore\n").await;
        assert_eq!(sink.clear_count(), 0);
    }

    #[tokio::test]
    async fn no_sink_calls_after_detach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "a").unwrap();

        let sink = Arc::new(MemorySink::new());
        let mut tailer = LogTailer::attach_with(&path, sink.clone(), &fast_options(), &poll_only())
            .await
            .unwrap();
        tailer.detach();
        tailer.detach();
        assert!(!tailer.is_attached());

        std::fs::write(&path, "abcdef").unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.calls(), vec![SinkCall::Append("a".into())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn detach_during_a_read_discards_the_rest_of_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "boot\n").unwrap();

        let sink = Arc::new(StallingSink::default());
        let mut tailer = LogTailer::attach_with(&path, sink.clone(), &fast_options(), &poll_only())
            .await
            .unwrap();
        assert_eq!(sink.inner.contents(), "boot\n");

        // Large enough that one read delivers it in several chunks.
        sink.armed.store(true, Ordering::SeqCst);
        let backlog = vec![b'x'; 200 * 1024];
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&backlog).unwrap();
        file.flush().unwrap();

        let stalled = sink.clone();
        tokio::task::spawn_blocking(move || stalled.entered.0.wait())
            .await
            .unwrap();

        // The follow task is inside `append`; detach has to wait for it.
        let detaching = tokio::task::spawn_blocking(move || {
            tailer.detach();
            tailer
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!detaching.is_finished());

        let released = sink.clone();
        tokio::task::spawn_blocking(move || released.release.0.wait())
            .await
            .unwrap();
        let tailer = detaching.await.unwrap();
        assert!(!tailer.is_attached());

        let delivered = sink.inner.calls();
        assert_eq!(delivered.len(), 2);
        assert!(sink.inner.contents().len() < "boot\n".len() + backlog.len());

        file.write_all(b"after\n").unwrap();
        file.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.inner.calls(), delivered);
    }
}
