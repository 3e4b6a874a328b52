use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

use netlinx_lsp::{DEFAULT_LOG_PATH_METHOD, SupervisorOptions};
use netlinx_tail::TailOptions;
use netlinx_types::{LanguageConfig, ProcessSpec, default_server_command};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "NETLINX_CONFIG";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STOP_GRACE_MS: u64 = 2_000;
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

/// Contents of `~/.netlinx/config.toml`, as written.
#[derive(Debug, Default, Deserialize)]
pub struct NetlinxConfig {
    pub language: Option<LanguageConfig>,
    pub language_server: Option<LanguageServerConfig>,
    pub log_tail: Option<LogTailConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Launch settings for the language server.
///
/// ```toml
/// [language_server]
/// enabled = true
/// path = "${HOME}/bin/netlinx-language-server"
/// args = ["--stdio"]
/// shell = false
/// log_path_method = "netlinx/serverLogPath"
/// request_timeout_ms = 5000
/// ```
///
/// `path`, `args` and `cwd` support `${VAR}` expansion.
#[derive(Debug, Deserialize)]
pub struct LanguageServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Server binary. Absent or empty uses the platform default name.
    pub path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Run through the platform shell instead of executing directly.
    #[serde(default)]
    pub shell: bool,
    pub cwd: Option<String>,
    pub log_path_method: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub init_timeout_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
}

impl Default for LanguageServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            args: Vec::new(),
            shell: false,
            cwd: None,
            log_path_method: None,
            request_timeout_ms: None,
            init_timeout_ms: None,
            stop_grace_ms: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogTailConfig {
    /// Quiet period before reading after a change; coalesces write bursts.
    pub debounce_ms: Option<u64>,
    /// Interval of the polling fallback watcher.
    pub poll_interval_ms: Option<u64>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}

impl NetlinxConfig {
    /// Read the config file. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// `$NETLINX_CONFIG`, else `~/.netlinx/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".netlinx").join("config.toml"))
}

/// Resolved settings the coordinator runs with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub language: LanguageConfig,
    pub server: ProcessSpec,
    pub supervisor: SupervisorOptions,
    /// JSON-RPC method that returns the server's log file path.
    pub log_path_method: String,
    pub request_timeout: Duration,
    pub tail: TailOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(NetlinxConfig::default())
    }
}

impl From<NetlinxConfig> for EngineConfig {
    fn from(file: NetlinxConfig) -> Self {
        let server = file.language_server.unwrap_or_default();
        let tail = file.log_tail.unwrap_or_default();
        let ms = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        let command = match server.path.as_deref() {
            Some(path) if !path.trim().is_empty() => expand_env_vars(path),
            _ => default_server_command().to_string(),
        };
        let mut spec = ProcessSpec::new(command)
            .with_args(server.args.iter().map(String::as_str).map(expand_env_vars))
            .with_shell(server.shell);
        if let Some(cwd) = server.cwd.as_deref().map(expand_env_vars) {
            spec = spec.with_cwd(PathBuf::from(cwd));
        }

        let defaults = SupervisorOptions::default();
        let supervisor = SupervisorOptions {
            enabled: server.enabled,
            init_timeout: ms(server.init_timeout_ms, DEFAULT_INIT_TIMEOUT_MS),
            stop_grace: ms(server.stop_grace_ms, DEFAULT_STOP_GRACE_MS),
            workspace_root: spec.cwd().map_or(defaults.workspace_root, PathBuf::from),
        };

        Self {
            language: file.language.unwrap_or_default(),
            server: spec,
            supervisor,
            log_path_method: server
                .log_path_method
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_PATH_METHOD.to_string()),
            request_timeout: ms(server.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS),
            tail: TailOptions {
                debounce: ms(tail.debounce_ms, DEFAULT_DEBOUNCE_MS),
                poll_interval: ms(tail.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS),
                ..TailOptions::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("NETLINX_TEST_BIN_DIR", "/opt/amx");
        }
        let result = expand_env_vars("${NETLINX_TEST_BIN_DIR}/netlinx-language-server");
        assert_eq!(result, "/opt/amx/netlinx-language-server");
        unsafe {
            std::env::remove_var("NETLINX_TEST_BIN_DIR");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            std::env::remove_var("NETLINX_TEST_MISSING");
        }
        assert_eq!(expand_env_vars("a${NETLINX_TEST_MISSING}b"), "ab");
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_var_name_dropped() {
        assert_eq!(expand_env_vars("test ${} more"), "test  more");
    }

    #[test]
    fn parse_empty_config() {
        let config: NetlinxConfig = toml::from_str("").unwrap();
        assert!(config.language.is_none());
        assert!(config.language_server.is_none());
        assert!(config.log_tail.is_none());
    }

    #[test]
    fn empty_config_resolves_to_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.language.display_name(), "NetLinx");
        assert_eq!(config.server.command(), default_server_command());
        assert!(config.server.args().is_empty());
        assert!(!config.server.shell());
        assert!(config.supervisor.enabled);
        assert_eq!(config.supervisor.init_timeout, Duration::from_secs(30));
        assert_eq!(config.supervisor.stop_grace, Duration::from_secs(2));
        assert_eq!(config.log_path_method, "netlinx/serverLogPath");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.tail.debounce, Duration::from_millis(300));
        assert_eq!(config.tail.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[language]
display_name = "AMX NetLinx"

[language_server]
enabled = false
path = "/opt/netlinx/netlinx-language-server"
args = ["--stdio", "--verbose"]
shell = true
cwd = "/work"
log_path_method = "custom/logPath"
request_timeout_ms = 750
init_timeout_ms = 4000
stop_grace_ms = 100

[log_tail]
debounce_ms = 50
poll_interval_ms = 250
"#;
        let file: NetlinxConfig = toml::from_str(toml_str).unwrap();
        let config = EngineConfig::from(file);
        assert_eq!(config.language.display_name(), "AMX NetLinx");
        assert_eq!(config.server.command(), "/opt/netlinx/netlinx-language-server");
        assert_eq!(config.server.args(), ["--stdio", "--verbose"]);
        assert!(config.server.shell());
        assert_eq!(config.server.cwd(), Some(std::path::Path::new("/work")));
        assert!(!config.supervisor.enabled);
        assert_eq!(config.supervisor.workspace_root, PathBuf::from("/work"));
        assert_eq!(config.supervisor.init_timeout, Duration::from_secs(4));
        assert_eq!(config.supervisor.stop_grace, Duration::from_millis(100));
        assert_eq!(config.log_path_method, "custom/logPath");
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert_eq!(config.tail.debounce, Duration::from_millis(50));
        assert_eq!(config.tail.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn blank_path_uses_platform_default() {
        let file: NetlinxConfig = toml::from_str("[language_server]\npath = \"  \"\n").unwrap();
        let config = EngineConfig::from(file);
        assert_eq!(config.server.command(), default_server_command());
    }

    #[test]
    fn server_settings_expand_env_vars() {
        unsafe {
            std::env::set_var("NETLINX_TEST_LOG_LEVEL", "trace");
        }
        let file: NetlinxConfig =
            toml::from_str("[language_server]\nargs = [\"--log=${NETLINX_TEST_LOG_LEVEL}\"]\n")
                .unwrap();
        let config = EngineConfig::from(file);
        assert_eq!(config.server.args(), ["--log=trace"]);
        unsafe {
            std::env::remove_var("NETLINX_TEST_LOG_LEVEL");
        }
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[language_server\nenabled = true").unwrap();
        let err = NetlinxConfig::load_from(path.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = NetlinxConfig::load_from(path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
