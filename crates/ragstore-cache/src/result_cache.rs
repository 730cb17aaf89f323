//! L3: assembled query results.
//!
//! Generic bounded LRU with an optional TTL that is checked lazily on `get`.
//! Entries carry explicit collection tags so a collection can be invalidated
//! without scanning keys.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use ragstore_types::{content_hash, CacheEntry, ResultCacheSettings};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::query_cache::hit_rate;

/// Parameter name under which collection tags enter the cache key.
pub const COLLECTION_PARAM: &str = "collection";

/// Canonical query parameters.
///
/// Ordered by name, so the order callers add parameters in never changes the
/// derived key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: BTreeMap<String, String>,
    collections: BTreeSet<String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. A parameter named `collection` is recorded as a tag.
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Tag the result with a collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.insert(collection.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        let name = name.into();
        if name == COLLECTION_PARAM {
            self.collections.insert(value.to_string());
        } else {
            self.params.insert(name, value.to_string());
        }
    }

    pub fn collections(&self) -> &BTreeSet<String> {
        &self.collections
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.collections.is_empty()
    }

    /// `(name, value)` pairs sorted by name, then value.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(self.collections.iter().map(|c| (COLLECTION_PARAM, c.as_str())))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Human-readable `name=value&...` form, for logs.
    pub fn canonical(&self) -> String {
        self.pairs()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Hashed cache key for `query` under these parameters.
    ///
    /// Hashes the JSON array `[query, [[name, value], ...]]`, so no choice
    /// of query text or parameter values can mimic another combination.
    pub fn cache_key(&self, query: &str) -> String {
        let pairs = self
            .pairs()
            .into_iter()
            .map(|(name, value)| Value::Array(vec![Value::from(name), Value::from(value)]))
            .collect();
        let encoded = Value::Array(vec![Value::from(query), Value::Array(pairs)]);
        content_hash(&encoded.to_string())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Snapshot of L3 counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultCacheStats {
    pub size: usize,
    pub maxsize: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_size_bytes: u64,
    pub avg_entry_size_bytes: f64,
    pub evictions: u64,
    pub expirations: u64,
}

struct TaggedEntry<V> {
    entry: CacheEntry<V>,
    collections: BTreeSet<String>,
}

struct ResultCacheState<V> {
    entries: LruCache<String, TaggedEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    total_size_bytes: u64,
}

impl<V> ResultCacheState<V> {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(tagged) => {
                self.total_size_bytes = self.total_size_bytes.saturating_sub(tagged.entry.size_bytes);
                true
            }
            None => false,
        }
    }
}

/// Bounded LRU of query results with optional TTL.
pub struct ResultCache<V> {
    inner: Mutex<ResultCacheState<V>>,
    maxsize: usize,
    ttl: Option<Duration>,
}

impl<V: Clone + Serialize> ResultCache<V> {
    /// Create a cache holding at most `maxsize` results; `ttl = None` never expires.
    pub fn new(maxsize: usize, ttl: Option<Duration>) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(maxsize)
            .ok_or_else(|| CacheError::Config("result cache maxsize must be > 0".into()))?;

        Ok(Self {
            inner: Mutex::new(ResultCacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
                total_size_bytes: 0,
            }),
            maxsize,
            ttl,
        })
    }

    pub fn from_settings(settings: &ResultCacheSettings) -> Result<Self, CacheError> {
        Self::new(settings.maxsize, settings.ttl())
    }

    fn lock(&self) -> MutexGuard<'_, ResultCacheState<V>> {
        self.inner.lock().expect("result cache mutex poisoned")
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn expired(&self, entry: &CacheEntry<V>) -> bool {
        self.ttl.is_some_and(|ttl| entry.is_expired(ttl))
    }

    /// Look up a result. Expired entries are removed and reported as a miss.
    pub fn get(&self, query: &str, params: &QueryParams) -> Option<V> {
        let key = params.cache_key(query);
        let mut guard = self.lock();
        let state = &mut *guard;

        let expired = match state.entries.peek(&key) {
            None => {
                state.misses += 1;
                debug!(key = %key, "L3 miss");
                return None;
            }
            Some(tagged) => self.expired(&tagged.entry),
        };

        if expired {
            state.remove(&key);
            state.expirations += 1;
            state.misses += 1;
            debug!(key = %key, "L3 entry expired");
            return None;
        }

        let value = state.entries.get_mut(&key).map(|tagged| {
            tagged.entry.touch();
            tagged.entry.value.clone()
        });
        state.hits += 1;
        debug!(key = %key, "L3 hit");
        value
    }

    /// Store a result, evicting the least recently used entry when full.
    pub fn set(&self, query: &str, value: V, params: &QueryParams) {
        let key = params.cache_key(query);
        let size_bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes.len() as u64,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not size result; recording 0 bytes");
                0
            }
        };
        let tagged = TaggedEntry {
            entry: CacheEntry::new(key.clone(), value, size_bytes),
            collections: params.collections().clone(),
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        state.total_size_bytes += size_bytes;
        if let Some((old_key, old)) = state.entries.push(key.clone(), tagged) {
            state.total_size_bytes = state.total_size_bytes.saturating_sub(old.entry.size_bytes);
            if old_key != key {
                state.evictions += 1;
                debug!(evicted = %old_key, "L3 eviction");
            }
        }
    }

    /// Drop a single result. Returns whether it was cached.
    pub fn invalidate(&self, query: &str, params: &QueryParams) -> bool {
        let key = params.cache_key(query);
        self.lock().remove(&key)
    }

    /// Drop every result tagged with `collection`. Returns the number removed.
    pub fn invalidate_collection(&self, collection: &str) -> usize {
        let mut state = self.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, tagged)| tagged.collections.contains(collection))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            state.remove(key);
        }
        if !keys.is_empty() {
            debug!(collection, removed = keys.len(), "L3 collection invalidated");
        }
        keys.len()
    }

    /// Remove every expired entry now rather than on the next `get`.
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut state = self.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, tagged)| self.expired(&tagged.entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            state.remove(key);
        }
        state.expirations += keys.len() as u64;
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.total_size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ResultCacheStats {
        let state = self.lock();
        let size = state.entries.len();
        ResultCacheStats {
            size,
            maxsize: self.maxsize,
            hits: state.hits,
            misses: state.misses,
            hit_rate: hit_rate(state.hits, state.misses),
            total_size_bytes: state.total_size_bytes,
            avg_entry_size_bytes: if size == 0 {
                0.0
            } else {
                state.total_size_bytes as f64 / size as f64
            },
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}
