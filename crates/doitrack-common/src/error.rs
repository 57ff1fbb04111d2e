//! Error types for doitrack

use thiserror::Error;

/// Result type alias for doitrack operations
pub type Result<T> = std::result::Result<T, DoiTrackError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum DoiTrackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
