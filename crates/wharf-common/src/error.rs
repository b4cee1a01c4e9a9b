//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for wharf operations
pub type Result<T> = std::result::Result<T, WharfError>;

/// Main error type for wharf
#[derive(Error, Debug)]
pub enum WharfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
