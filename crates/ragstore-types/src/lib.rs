//! # ragstore-types
//!
//! Shared building blocks for the ragstore caching and indexing crates.
//!
//! This crate defines:
//! - Records: [`CacheEntry`] and [`EmbeddingRecord`], the passive holders
//!   stored by every cache tier
//! - Hashing: [`content_hash`], the exact-match key derivation used by the caches
//! - Persistence: atomic JSON file writes shared by the disk tier and the
//!   index checkpoints
//! - Settings: layered configuration for caches and the incremental index
//!
//! ## Usage
//!
//! ```rust
//! use ragstore_types::{content_hash, EmbeddingRecord};
//!
//! let record = EmbeddingRecord::new(content_hash("what is rust?"), vec![0.1, 0.2]);
//! assert_eq!(record.dimension(), 2);
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod persist;
pub mod record;
pub mod telemetry;

pub use config::{
    CacheSettings, DocumentCacheSettings, IndexSettings, QueryCacheSettings, ResultCacheSettings,
    Settings,
};
pub use error::StoreError;
pub use hash::content_hash;
pub use persist::{read_json, remove_if_exists, write_atomic, write_json_atomic, FORMAT_VERSION};
pub use record::{CacheEntry, EmbeddingRecord};
pub use telemetry::init_tracing;
