use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// The file did not exist at attach time. Not fatal; the caller may retry.
    #[error("log file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to read log file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Every watch strategy failed for this path.
    #[error("no watch strategy could watch {}", .0.display())]
    NoWatchStrategy(PathBuf),
}
