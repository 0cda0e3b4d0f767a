//! Configuration error types following panic-free policy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the daemon configuration.
///
/// Any of these is fatal at startup. On a reload the supervisor keeps the
/// previous configuration instead.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not map to a known format
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),

    /// The file content could not be deserialized
    #[error("Failed to parse configuration {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The configuration parsed but is semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
