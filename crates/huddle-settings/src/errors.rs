//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The merged settings do not fit the schema (a string where a port
    /// belongs, an unknown bus kind, ...).
    #[error("settings do not match the schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// A value passed parsing but fails validation.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
