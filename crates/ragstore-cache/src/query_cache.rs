//! L1: in-memory query-embedding cache.
//!
//! Keys are the SHA-256 of the exact query text. No TTL and no persistence;
//! a bounded LRU map behind one mutex.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use ragstore_types::{content_hash, EmbeddingRecord, QueryCacheSettings};
use serde::Serialize;
use tracing::debug;

use crate::error::CacheError;

/// Snapshot of L1 counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryCacheStats {
    pub size: usize,
    pub maxsize: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

struct QueryCacheState {
    entries: LruCache<String, EmbeddingRecord>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU cache of query embeddings.
pub struct QueryEmbeddingCache {
    inner: Mutex<QueryCacheState>,
    maxsize: usize,
}

impl QueryEmbeddingCache {
    /// Create a cache holding at most `maxsize` embeddings.
    pub fn new(maxsize: usize) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(maxsize)
            .ok_or_else(|| CacheError::Config("query cache maxsize must be > 0".into()))?;

        Ok(Self {
            inner: Mutex::new(QueryCacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            maxsize,
        })
    }

    pub fn from_settings(settings: &QueryCacheSettings) -> Result<Self, CacheError> {
        Self::new(settings.maxsize)
    }

    fn lock(&self) -> MutexGuard<'_, QueryCacheState> {
        self.inner.lock().expect("query cache mutex poisoned")
    }

    /// Look up the embedding for `query`, promoting it to most recently used.
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = content_hash(query);
        let mut state = self.lock();

        let hit = state.entries.get_mut(&key).map(|record| {
            record.touch();
            record.embedding.clone()
        });

        if hit.is_some() {
            state.hits += 1;
            debug!(key = %key, "L1 hit");
        } else {
            state.misses += 1;
            debug!(key = %key, "L1 miss");
        }
        hit
    }

    /// Store an embedding. Replaces any existing value for the same query.
    pub fn set(&self, query: &str, embedding: Vec<f32>) {
        let key = content_hash(query);
        let record = EmbeddingRecord::new(key.clone(), embedding);
        let mut state = self.lock();

        // push returns the replaced entry (same key) or the evicted LRU entry
        if let Some((old_key, _)) = state.entries.push(key.clone(), record) {
            if old_key != key {
                state.evictions += 1;
                debug!(evicted = %old_key, "L1 eviction");
            }
        }
    }

    /// Drop the embedding for `query`. Returns whether one was cached.
    pub fn invalidate(&self, query: &str) -> bool {
        let key = content_hash(query);
        self.lock().entries.pop(&key).is_some()
    }

    /// Inspect the cached record without touching recency or counters.
    pub fn record(&self, query: &str) -> Option<EmbeddingRecord> {
        let key = content_hash(query);
        self.lock().entries.peek(&key).cloned()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueryCacheStats {
        let state = self.lock();
        QueryCacheStats {
            size: state.entries.len(),
            maxsize: self.maxsize,
            hits: state.hits,
            misses: state.misses,
            hit_rate: hit_rate(state.hits, state.misses),
            evictions: state.evictions,
        }
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
