//! User-visible status messages.
//!
//! The coordinator reports activation outcomes through a [`Notifier`]; the
//! host decides how they surface (status bar, toast, log line).

/// Destination for human-visible status messages.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Emits notifications as `tracing` events under the `netlinx::notify` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!(target: "netlinx::notify", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "netlinx::notify", "{message}");
    }
}

pub(crate) fn activated(display_name: &str) -> String {
    format!("{display_name} language server is now active")
}

pub(crate) fn failed_to_start(display_name: &str, reason: &impl std::fmt::Display) -> String {
    format!("Failed to start {display_name} language server: {reason}")
}
