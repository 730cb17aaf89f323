//! Error types for the incremental index.

use ragstore_types::StoreError;
use thiserror::Error;

/// Errors that can occur while building, querying or checkpointing the index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Parallel input arrays disagree in length
    #[error("Length mismatch: {documents} documents, {ids} ids, {metadatas} metadatas")]
    LengthMismatch {
        documents: usize,
        ids: usize,
        metadatas: usize,
    },

    /// Id repeated within a batch or already live in the index
    #[error("Duplicate document id: {0}")]
    DuplicateId(String),

    /// Search or rebuild before any documents were indexed
    #[error("Index has not been built")]
    NotIndexed,

    /// Scoring structure could not be built or queried
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shared persistence helper failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl From<tantivy::TantivyError> for IndexError {
    fn from(err: tantivy::TantivyError) -> Self {
        IndexError::Scoring(err.to_string())
    }
}
