//! Client-side supervision of the NetLinx language server.
//!
//! [`ProcessSupervisor`] owns the worker process and its readiness handshake.
//! [`RequestChannel`] is the correlation-id keyed request/response layer over
//! the worker's stdio transport.

pub mod codec;
pub mod error;
pub mod types;

pub(crate) mod channel;
pub(crate) mod protocol;
pub(crate) mod shutdown;

mod supervisor;

pub use channel::RequestChannel;
pub use error::{RequestError, SupervisorError};
pub use protocol::{DEFAULT_LOG_PATH_METHOD, RpcError};
pub use supervisor::ProcessSupervisor;
pub use types::{SupervisorOptions, WorkerState};
