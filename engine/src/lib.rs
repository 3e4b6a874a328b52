//! Session lifecycle for the NetLinx language server client.
//!
//! [`LifecycleCoordinator`] starts the worker through the supervisor, asks it
//! where it logs, and streams that file into the host's [`netlinx_tail::TailSink`].

mod config;
mod coordinator;
mod notifications;

pub use config::{
    CONFIG_ENV, ConfigError, EngineConfig, LanguageServerConfig, LogTailConfig, NetlinxConfig,
    config_path, expand_env_vars,
};
pub use coordinator::{ActivationError, CoordinatorState, LifecycleCoordinator};
pub use notifications::{Notifier, TracingNotifier};
