//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or checking an [`AuthConfig`](crate::AuthConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value the engine cannot work with, such as a table name that is not
    /// a plain identifier.
    #[error("Invalid {key}: {reason}")]
    ValidationError { key: &'static str, reason: String },

    #[error("XDG directory error: {0}")]
    XdgError(String),
}
