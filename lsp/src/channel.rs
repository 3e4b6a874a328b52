//! Correlation-id keyed request/response layer over the worker transport.
//!
//! One writer task serializes outgoing frames; one reader task routes
//! responses to their pending slot and answers worker-initiated requests.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::RequestError;
use crate::protocol::{self, IncomingFrame, Notification, Request};
use crate::types::WorkerState;

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Handle for issuing requests to the worker. Cheap to clone.
///
/// Requests are refused with [`RequestError::NotConnected`] unless the
/// supervisor reports the worker as [`WorkerState::Running`].
#[derive(Clone)]
pub struct RequestChannel {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    /// Set by the reader task before it releases the pending map.
    closed: Arc<AtomicBool>,
    state: watch::Receiver<WorkerState>,
}

/// Background tasks backing a [`RequestChannel`].
pub(crate) struct Transport {
    pub channel: RequestChannel,
    pub reader_handle: JoinHandle<()>,
    pub writer_handle: JoinHandle<()>,
}

impl Transport {
    pub fn abort(&self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("state", &*self.state.borrow())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RequestChannel {
    /// Start the reader and writer tasks over a worker's stdout/stdin.
    ///
    /// When the reader sees EOF or a framing error while the worker is live,
    /// the state moves to `Failed` and every pending request is released.
    pub(crate) fn spawn<R, W>(
        name: String,
        reader: R,
        writer: W,
        state_tx: Arc<watch::Sender<WorkerState>>,
    ) -> Transport
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_name = name.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(server = %writer_name, "write to worker failed: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();
        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_state = state_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, &reader_pending, &reader_writer_tx, &name)
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!(server = %name, "worker closed stdout");
                        break "worker exited".to_string();
                    }
                    Err(e) => {
                        tracing::warn!(server = %name, "worker transport error: {e}");
                        break e.to_string();
                    }
                }
            };

            reader_state.send_if_modified(|state| {
                if state.is_live() {
                    *state = WorkerState::Failed(reason);
                    true
                } else {
                    false
                }
            });
            // Dropping the senders fails every waiter with `TransportClosed`.
            reader_closed.store(true, Ordering::SeqCst);
            reader_pending.lock().await.clear();
        });

        Transport {
            channel: Self {
                writer_tx,
                pending,
                next_id: Arc::new(AtomicU64::new(1)),
                closed,
                state: state_tx.subscribe(),
            },
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        writer_tx: &mpsc::Sender<WriterCommand>,
        server_name: &str,
    ) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!(server = %server_name, "ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let slot = pending.lock().await.remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => tracing::debug!(server = %server_name, id, "response for unknown id"),
                }
            }
            IncomingFrame::WorkerRequest { id, method } => {
                // Unanswered worker requests can stall the worker.
                tracing::debug!(server = %server_name, %method, "worker request, replying method not found");
                let reply = protocol::method_not_found(id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method } => {
                tracing::trace!(server = %server_name, %method, "ignoring worker notification");
            }
        }
    }

    /// Whether the worker is `Running` right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == WorkerState::Running
    }

    /// Send `method` and wait up to `timeout` for a typed result.
    pub async fn request<P, T>(
        &self,
        method: &str,
        params: Option<P>,
        timeout: Duration,
    ) -> Result<T, RequestError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(RequestError::NotConnected);
        }
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(RequestError::Encode)?;
        let result = self.call(method, params, timeout).await?;
        serde_json::from_value(result).map_err(RequestError::Decode)
    }

    /// Ask the worker where it writes its log.
    ///
    /// `Ok(None)` means the worker has no log file configured.
    pub async fn resolve_log_path(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<Option<PathBuf>, RequestError> {
        let path: Option<String> = self
            .request(method, None::<serde_json::Value>, timeout)
            .await?;
        Ok(path.filter(|p| !p.trim().is_empty()).map(PathBuf::from))
    }

    /// Fire-and-forget notification.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        if !self.is_connected() {
            return Err(RequestError::NotConnected);
        }
        self.send_notification(method, params).await
    }

    /// Round trip without the `Running` gate; the handshake and shutdown
    /// sequences run while the worker is `Starting`/`Stopping`.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(RequestError::Encode)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::TransportClosed);
        }

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::TransportClosed);
        }

        let body = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(RequestError::TransportClosed);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(RequestError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        protocol::into_result(body).map_err(RequestError::Remote)
    }

    pub(crate) async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(RequestError::Encode)?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| RequestError::TransportClosed)
    }

    /// Ask the writer task to stop after flushing queued frames.
    pub(crate) async fn close_writer(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}
