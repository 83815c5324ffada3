//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or validating the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The named file does not exist.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but does not parse.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] figment::Error),

    /// The parsed configuration is semantically invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// I/O failure while reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
