//! Core domain types for the NetLinx worker client.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod language;
mod process;

pub use language::{DEFAULT_DISPLAY_NAME, LanguageConfig};
pub use process::{ProcessSpec, ProcessSpecError, default_server_command};
