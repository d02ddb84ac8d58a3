//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the configuration directory
#[derive(Debug, Error)]
pub enum SetupError {
    /// A configuration file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for its schema
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Machine config invalid: {0}")]
    InvalidMachine(String),

    #[error("Job config invalid: {0}")]
    InvalidJob(String),

    #[error("Server config invalid: {0}")]
    InvalidServer(String),
}
