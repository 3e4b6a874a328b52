//! Log tailing for the language server's log file.
//!
//! [`LogTailer`] delivers every byte appended to a file, in order and exactly
//! once, to a [`TailSink`]. Truncation or rotation clears the sink and starts
//! over from offset zero. Change notifications are only hints: the tailer
//! re-stats the file on each one, so duplicated, reordered or dropped events
//! never duplicate or lose content.

mod error;
mod sink;
mod state;
mod tailer;
mod watch;

pub use error::TailError;
pub use sink::{MemorySink, SinkCall, TailSink};
pub use state::{Change, TailState};
pub use tailer::{LogTailer, TailOptions};
pub use watch::{ChangeEvent, NotifyWatch, PollWatch, WatchError, WatchGuard, WatchStrategy, default_strategies};
