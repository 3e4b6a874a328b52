//! Language identity used in user-facing status messages.

use serde::Deserialize;

pub const DEFAULT_DISPLAY_NAME: &str = "NetLinx";

/// Display metadata for the language served by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageConfig {
    #[serde(default = "default_display_name")]
    display_name: String,
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
        }
    }
}

impl LanguageConfig {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Self::default();
        }
        Self { display_name }
    }

    /// Human-readable name, e.g. "NetLinx".
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}
