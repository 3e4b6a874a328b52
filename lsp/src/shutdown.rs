//! Bounded-grace termination of the worker's child process.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How the child finally went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// Exited on its own within the grace period.
    Graceful,
    /// Exited after SIGTERM.
    Terminated,
    /// Had to be killed.
    Killed,
}

/// Wait up to `grace` for the child to exit, then SIGTERM (unix) and wait
/// `grace` again, then kill. Always reaps the child.
pub(crate) async fn terminate_child(
    child: &mut Child,
    grace: Duration,
) -> io::Result<(Exit, ExitStatus)> {
    if let Ok(status) = timeout(grace, child.wait()).await {
        return Ok((Exit::Graceful, status?));
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                if let Ok(status) = timeout(grace, child.wait()).await {
                    return Ok((Exit::Terminated, status?));
                }
            }
            // Already gone; fall through to reap.
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => return Err(io::Error::other(e)),
        }
    }

    child.kill().await?;
    Ok((Exit::Killed, child.wait().await?))
}
