//! Logging setup.
//!
//! `RUST_LOG` wins when set. Otherwise the configured trace level becomes
//! the directive for the daemon's own crates. The filter sits behind a
//! reload layer so a configuration reload can change the level in place.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use osmon_core::Configuration;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Targets the configured level applies to.
const DAEMON_TARGETS: [&str; 4] = ["osmond", "osmon", "osmon_core", "osmon_protocol"];

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {error}")]
    LogFile { path: PathBuf, error: String },

    #[error("Failed to install log subscriber: {0}")]
    Init(String),

    #[error("Failed to update log filter: {0}")]
    Reload(String),
}

/// Handle for changing the log level after startup.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    verbose: bool,
}

impl LogHandle {
    /// Applies the trace level of a (re)loaded configuration.
    pub fn apply(&self, config: &Configuration) -> Result<(), LoggingError> {
        self.handle
            .reload(build_filter(config.log_directive(), self.verbose))
            .map_err(|e| LoggingError::Reload(e.to_string()))
    }
}

/// Builds the filter for a level name such as `warn`.
///
/// `verbose` forces `debug` for the daemon targets.
pub fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !directives.trim().is_empty() {
            return EnvFilter::new(directives);
        }
    }

    EnvFilter::new(daemon_directives(if verbose { "debug" } else { level }))
}

fn daemon_directives(level: &str) -> String {
    DAEMON_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber.
///
/// Logs go to `log_file` when configured (append, no colors), otherwise
/// to stderr.
pub fn init_logging(config: &Configuration, verbose: bool) -> Result<LogHandle, LoggingError> {
    let (filter, handle) = reload::Layer::new(build_filter(config.log_directive(), verbose));

    let writer = match config.log_file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LoggingError::LogFile {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let output = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.log_file.is_none());

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LogHandle { handle, verbose })
}
