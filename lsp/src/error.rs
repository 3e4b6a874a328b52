//! Error taxonomy for process supervision and request/response traffic.

use std::io;
use std::time::Duration;

use crate::protocol::RpcError;

/// Failures of [`ProcessSupervisor`](crate::ProcessSupervisor) operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Bad or disabled launch settings. Not retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("language server is already running")]
    AlreadyRunning,
    /// The OS could not create the process.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// The process started but never became ready.
    #[error("language server failed to initialize: {0}")]
    Handshake(String),
}

/// Failures of [`RequestChannel::request`](crate::RequestChannel::request).
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("language server is not running")]
    NotConnected,
    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    /// The worker answered with a JSON-RPC error payload.
    #[error("language server returned error {}: {}", .0.code, .0.message)]
    Remote(RpcError),
    #[error("transport to language server closed")]
    TransportClosed,
    #[error("failed to encode request params: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}
