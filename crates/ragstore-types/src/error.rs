//! Error types shared by the ragstore crates.

use thiserror::Error;

/// Errors raised by settings loading and file persistence helpers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted file exists but does not have the expected shape
    #[error("Corrupt file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}
