//! Error types for the cache tiers.

use ragstore_types::StoreError;
use thiserror::Error;

/// Errors raised while constructing a cache tier.
///
/// Data paths (`get`/`set`/`invalidate`) never return these: persistence
/// failures are logged and absorbed, and a miss is not an error.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid capacity or similar setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing directory could not be created or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shared persistence helper failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
