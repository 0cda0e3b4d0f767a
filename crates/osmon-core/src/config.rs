//! Daemon configuration and configuration loading.
//!
//! The configuration is read from a single file whose format is chosen by
//! extension:
//!
//! | Extension                  | Format |
//! |----------------------------|--------|
//! | `.json`                    | JSON   |
//! | `.toml`                    | TOML   |
//! | `.yaml`, `.yml`, `.conf`   | YAML   |
//!
//! Keys are accepted in both `snake_case` and `kebab-case`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::task::TaskDescriptor;

// ============================================================================
// Defaults
// ============================================================================

/// Default control channel address (localhost only).
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5678";

/// Default interval between two monitor passes.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Default trace level name.
pub const DEFAULT_TRACE_LEVEL: &str = "WARNING";

fn default_version() -> u32 {
    1
}

fn default_monitor_interval() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

fn default_trace_level() -> String {
    DEFAULT_TRACE_LEVEL.to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5678))
}

// ============================================================================
// Configuration
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Seconds between two monitor passes
    #[serde(default = "default_monitor_interval", alias = "monitor-interval")]
    pub monitor_interval: u64,

    /// Log level name (CRITICAL, ERROR, WARNING, INFO, DEBUG, TRACE)
    #[serde(default = "default_trace_level", alias = "trace-level")]
    pub trace_level: String,

    /// Log file; stderr when absent
    #[serde(default, alias = "log-file")]
    pub log_file: Option<PathBuf>,

    /// User the daemon switches to when daemonizing
    #[serde(default)]
    pub user: Option<String>,

    /// Group the daemon switches to when daemonizing
    #[serde(default)]
    pub group: Option<String>,

    /// Working directory of the daemon
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Pidfile of the daemon itself
    #[serde(default)]
    pub pidfile: Option<PathBuf>,

    /// Control channel address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Supervised tasks, in start order
    #[serde(default)]
    pub processes: Vec<TaskDescriptor>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: default_version(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL_SECS,
            trace_level: default_trace_level(),
            log_file: None,
            user: None,
            group: None,
            cwd: None,
            pidfile: None,
            listen: default_listen(),
            processes: Vec::new(),
        }
    }
}

impl Configuration {
    /// Parses configuration text in the given format and validates it.
    pub fn parse(text: &str, format: ConfigFormat, origin: &Path) -> ConfigResult<Self> {
        let parse_error = |reason: String| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason,
        };

        let config: Configuration = match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the semantic constraints serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.monitor_interval == 0 {
            return Err(ConfigError::Invalid(
                "monitor_interval must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for task in &self.processes {
            if task.name.trim().is_empty() {
                return Err(ConfigError::Invalid("task name must not be empty".to_string()));
            }
            if task.process.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "task {} has no process configured",
                    task.name
                )));
            }
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate task name: {}",
                    task.name
                )));
            }
        }

        Ok(())
    }

    /// Returns the monitor interval as a `Duration`.
    pub fn monitor_period(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }

    /// Maps the configured trace level onto a tracing filter directive.
    ///
    /// Unknown names fall back to `warn`.
    pub fn log_directive(&self) -> &'static str {
        match self.trace_level.to_ascii_uppercase().as_str() {
            "CRITICAL" | "FATAL" | "ERROR" => "error",
            "WARNING" | "WARN" => "warn",
            "INFO" => "info",
            "DEBUG" => "debug",
            "TRACE" | "NOTSET" => "trace",
            _ => "warn",
        }
    }
}

// ============================================================================
// Format detection
// ============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Detects the format from the file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") | Some("conf") => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

// ============================================================================
// Loaders
// ============================================================================

/// Source of configuration for the supervisor.
///
/// Called once at startup and again on every restart or reload request.
pub trait ConfigLoader: Send + Sync {
    /// Loads and validates a fresh configuration.
    fn load(&self) -> ConfigResult<Configuration>;
}

/// Loads configuration from a file on disk.
#[derive(Debug, Clone)]
pub struct FileConfigLoader {
    path: PathBuf,
}

impl FileConfigLoader {
    /// Creates a loader for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the configuration file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> ConfigResult<Configuration> {
        let format = ConfigFormat::from_path(&self.path)?;
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        let config = Configuration::parse(&text, format, &self.path)?;
        debug!(
            path = %self.path.display(),
            tasks = config.processes.len(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Loader returning a fixed configuration, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Configuration,
}

impl StaticConfigLoader {
    pub fn new(config: Configuration) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> ConfigResult<Configuration> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}
