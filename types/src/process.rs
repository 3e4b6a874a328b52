//! Launch description for the external worker process.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessSpecError {
    #[error("worker command must not be empty")]
    EmptyCommand,
}

/// How to launch the worker: `{ command, args, shell, cwd? }`.
///
/// Construction never fails; [`ProcessSpec::validate`] is called by the
/// supervisor at `start()` so that an empty command surfaces as a configuration
/// error at the point of use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    shell: bool,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

impl ProcessSpec {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            shell: false,
            cwd: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn validate(&self) -> Result<(), ProcessSpecError> {
        if self.command.trim().is_empty() {
            return Err(ProcessSpecError::EmptyCommand);
        }
        Ok(())
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the command is run through the platform shell.
    #[must_use]
    pub fn shell(&self) -> bool {
        self.shell
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Single command line handed to the shell in shell mode.
    ///
    /// Arguments containing whitespace or quotes are double-quoted.
    #[must_use]
    pub fn shell_command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"') {
                line.push('"');
                line.push_str(&arg.replace('"', "\\\""));
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Name of the worker binary looked up on `PATH` when no path is configured.
#[must_use]
pub fn default_server_command() -> &'static str {
    if cfg!(windows) {
        "netlinx-language-server.exe"
    } else {
        "netlinx-language-server"
    }
}
