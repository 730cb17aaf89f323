//! # ragstore-cache
//!
//! Three-tier cache for a retrieval pipeline.
//!
//! - **L1** [`QueryEmbeddingCache`]: in-memory LRU of query embeddings
//! - **L2** [`DocumentEmbeddingCache`]: document embeddings on disk with a hot
//!   in-memory subset
//! - **L3** [`ResultCache`]: assembled results keyed by query plus
//!   [`QueryParams`], with optional TTL
//!
//! [`MultiTierCache`] ties them together. Tiers never reach into each other;
//! cross-tier invalidation goes through the façade.
//!
//! ## Usage
//!
//! ```rust
//! use ragstore_cache::{MultiTierCache, QueryParams};
//! use ragstore_types::CacheSettings;
//!
//! let mut settings = CacheSettings::default();
//! settings.document.enabled = false;
//!
//! let cache: MultiTierCache = MultiTierCache::new(&settings);
//! cache.set_query_embedding("what is rust?", vec![0.1, 0.2]);
//! assert_eq!(cache.get_query_embedding("what is rust?"), Some(vec![0.1, 0.2]));
//!
//! let params = QueryParams::new().with("top_k", 5).with_collection("docs");
//! cache.set_query_result("what is rust?", serde_json::json!(["doc-1"]), &params);
//! assert_eq!(cache.invalidate_collection("docs"), 1);
//! ```

pub mod document_cache;
pub mod error;
pub mod multi_tier;
pub mod query_cache;
pub mod result_cache;

pub use document_cache::{DocumentCacheStats, DocumentEmbeddingCache};
pub use error::CacheError;
pub use multi_tier::{AggregateStats, CacheTier, MultiTierCache, MultiTierStats};
pub use query_cache::{QueryCacheStats, QueryEmbeddingCache};
pub use result_cache::{QueryParams, ResultCache, ResultCacheStats};
