//! # ragstore-index
//!
//! Lexical text index that can be updated without full rebuilds.
//!
//! - [`IncrementalIndex`]: append, tombstone removal, threshold-driven
//!   compaction, search
//! - [`CheckpointStore`]: versioned, atomically written snapshots with
//!   retention
//! - [`Scorer`] / [`ScoringIndex`]: pluggable ranking, [`TantivyScorer`] by default
//!
//! ## Usage
//!
//! ```rust
//! use ragstore_index::{IncrementalIndex, IndexConfig};
//!
//! let index = IncrementalIndex::new(IndexConfig::default().with_compaction_threshold(0.5));
//! index
//!     .index_documents(
//!         vec!["rust ownership".into(), "python typing".into()],
//!         vec!["a".into(), "b".into()],
//!         None,
//!     )
//!     .unwrap();
//!
//! let hits = index.search("rust", 5).unwrap();
//! assert_eq!(hits[0].doc_id, "a");
//!
//! index.remove_documents(&["a"]);
//! assert!(index.search("rust", 5).unwrap().is_empty());
//! ```

pub mod checkpoint;
pub mod error;
pub mod guard;
pub mod incremental;
pub mod scoring;

pub use checkpoint::{CheckpointInfo, CheckpointStore, IndexCheckpoint, Metadata};
pub use error::IndexError;
pub use guard::{CompactionGuard, CompactionRun};
pub use incremental::{IncrementalIndex, IndexConfig, IndexStats, IndexedDocument, SearchHit};
pub use scoring::{build_scoring_schema, Scorer, ScoringIndex, ScoringSchema, TantivyScorer};
