//! Passive records held by the cache tiers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached value plus its bookkeeping.
///
/// Owned by the cache that holds it and mutated only through that cache's
/// `get`/`set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// Hashed cache key
    pub key: String,
    /// Cached value
    pub value: V,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// Last successful read (or the write time if never read)
    pub accessed_at: DateTime<Utc>,
    /// Number of successful reads
    pub access_count: u64,
    /// Estimated payload size
    pub size_bytes: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            size_bytes,
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Whether the entry is older than `ttl`.
    ///
    /// A TTL too large for chrono never expires.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - self.created_at > ttl,
            Err(_) => false,
        }
    }
}

/// An embedding vector keyed by the content hash of its logical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Content hash of the query text or document id
    pub key: String,
    /// The vector itself
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl EmbeddingRecord {
    pub fn new(key: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            embedding,
            created_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// Approximate in-memory payload size.
    pub fn size_bytes(&self) -> u64 {
        (self.embedding.len() * std::mem::size_of::<f32>()) as u64
    }
}
