//! Display destinations for streamed log text.

use std::sync::Mutex;

/// Append/clear destination owned by the host viewer.
///
/// Calls are treated as atomic; implementations synchronize internally.
pub trait TailSink: Send + Sync {
    fn append(&self, text: &str);

    /// Discard everything appended so far.
    fn clear(&self);

    /// The viewer is going away; no further calls follow.
    fn dispose(&self);
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Append(String),
    Clear,
    Dispose,
}

/// Sink that records every call, for embedders that render later and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    calls: Mutex<Vec<SinkCall>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: SinkCall) {
        // A poisoned lock only means another recorder panicked mid-push.
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        calls.push(call);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Text currently displayed: everything appended since the last clear.
    #[must_use]
    pub fn contents(&self) -> String {
        let calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let start = calls
            .iter()
            .rposition(|c| *c == SinkCall::Clear)
            .map_or(0, |i| i + 1);
        calls[start..]
            .iter()
            .filter_map(|c| match c {
                SinkCall::Append(text) => Some(text.as_str()),
                SinkCall::Clear | SinkCall::Dispose => None,
            })
            .collect()
    }

    /// Number of `clear()` calls seen.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|c| **c == SinkCall::Clear)
            .count()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&SinkCall::Dispose)
    }
}

impl TailSink for MemorySink {
    fn append(&self, text: &str) {
        self.record(SinkCall::Append(text.to_string()));
    }

    fn clear(&self) {
        self.record(SinkCall::Clear);
    }

    fn dispose(&self) {
        self.record(SinkCall::Dispose);
    }
}
