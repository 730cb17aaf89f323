//! L2: disk-backed document-embedding cache with a hot in-memory subset.
//!
//! ## On-disk layout
//!
//! ```text
//! <cache_dir>/
//!   index.json          {version, entries: {hash: {doc_id, created_at, accessed_at, access_count, shape}}}
//!   <sha256>.json       {version, embedding, dtype: "float32", shape}
//! ```
//!
//! Every index entry has a record file and every record file has an index
//! entry. Opening the cache repairs both directions. Writes are staged so a
//! crash can only leave an orphan file (cleaned on the next open), never an
//! index entry without a file: write the record then register it; unregister
//! then delete.
//!
//! The hot tier is a subset of the disk tier. A disk eviction or an
//! invalidation removes the hot copy too; a hot eviction leaves disk alone.

use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use ragstore_types::persist::TMP_SUFFIX;
use ragstore_types::{
    content_hash, read_json, remove_if_exists, write_json_atomic, DocumentCacheSettings,
    EmbeddingRecord, StoreError, FORMAT_VERSION,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::query_cache::hit_rate;

/// Name of the disk-tier index file.
pub const INDEX_FILE: &str = "index.json";

const RECORD_EXTENSION: &str = "json";
const DTYPE_F32: &str = "float32";

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    version: String,
    embedding: Vec<f32>,
    dtype: String,
    shape: Vec<usize>,
}

impl RecordFile {
    fn new(embedding: Vec<f32>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            shape: vec![embedding.len()],
            embedding,
            dtype: DTYPE_F32.to_string(),
        }
    }

    fn into_embedding(self) -> Result<Vec<f32>, String> {
        if self.dtype != DTYPE_F32 {
            return Err(format!("unsupported dtype {}", self.dtype));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.embedding.len() {
            return Err(format!(
                "shape {:?} does not match {} values",
                self.shape,
                self.embedding.len()
            ));
        }
        Ok(self.embedding)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DiskEntry {
    doc_id: String,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    access_count: u64,
    shape: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: String,
    #[serde(default)]
    entries: BTreeMap<String, DiskEntry>,
}

/// Snapshot of L2 counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentCacheStats {
    pub hot_size: usize,
    pub hot_capacity: usize,
    pub disk_entries: usize,
    pub disk_capacity: usize,
    pub disk_usage_bytes: u64,
    pub hot_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

struct DocumentCacheState {
    hot: LruCache<String, EmbeddingRecord>,
    /// Disk index in LRU order; capacity enforced by hand.
    disk: LruCache<String, DiskEntry>,
    hot_hits: u64,
    disk_hits: u64,
    misses: u64,
    evictions: u64,
}

/// Two-level document embedding cache.
pub struct DocumentEmbeddingCache {
    cache_dir: PathBuf,
    hot_capacity: usize,
    disk_capacity: usize,
    inner: Mutex<DocumentCacheState>,
}

impl DocumentEmbeddingCache {
    /// Open (or create) a cache rooted at `cache_dir`.
    ///
    /// Fails only when capacities are zero or the directory cannot be
    /// created and written. A corrupt index is not an error: the cache
    /// starts empty and the stray record files are removed.
    pub fn open(
        cache_dir: impl Into<PathBuf>,
        hot_capacity: usize,
        disk_capacity: usize,
    ) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        let hot = NonZeroUsize::new(hot_capacity)
            .ok_or_else(|| CacheError::Config("document cache hot_capacity must be > 0".into()))?;
        if disk_capacity == 0 {
            return Err(CacheError::Config(
                "document cache disk_capacity must be > 0".into(),
            ));
        }
        fs::create_dir_all(&cache_dir)?;

        let cache = Self {
            cache_dir,
            hot_capacity,
            disk_capacity,
            inner: Mutex::new(DocumentCacheState {
                hot: LruCache::new(hot),
                disk: LruCache::unbounded(),
                hot_hits: 0,
                disk_hits: 0,
                misses: 0,
                evictions: 0,
            }),
        };

        {
            let mut guard = cache.lock();
            cache.load_index(&mut guard);
            // Doubles as the writability check for the directory.
            cache.write_index(&guard)?;
            info!(
                dir = %cache.cache_dir.display(),
                entries = guard.disk.len(),
                "Opened document embedding cache"
            );
        }

        Ok(cache)
    }

    pub fn from_settings(settings: &DocumentCacheSettings) -> Result<Self, CacheError> {
        Self::open(
            settings.expanded_cache_dir(),
            settings.hot_capacity,
            settings.disk_capacity,
        )
    }

    fn lock(&self) -> MutexGuard<'_, DocumentCacheState> {
        self.inner.lock().expect("document cache mutex poisoned")
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    /// Look up a document embedding: hot tier, then disk.
    pub fn get(&self, doc_id: &str) -> Option<Vec<f32>> {
        let key = content_hash(doc_id);
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(record) = state.hot.get_mut(&key) {
            record.touch();
            if let Some(entry) = state.disk.get_mut(&key) {
                entry.accessed_at = record.accessed_at;
                entry.access_count = record.access_count;
            }
            state.hot_hits += 1;
            debug!(doc_id, "L2 hot hit");
            return Some(record.embedding.clone());
        }

        let Some(entry) = state.disk.peek(&key) else {
            state.misses += 1;
            debug!(doc_id, "L2 miss");
            return None;
        };
        let created_at = entry.created_at;
        let access_count = entry.access_count.saturating_add(1);

        let path = self.record_path(&key);
        let embedding = match read_json::<RecordFile>(&path)
            .map_err(|e| e.to_string())
            .and_then(RecordFile::into_embedding)
        {
            Ok(embedding) => embedding,
            Err(reason) => {
                warn!(
                    doc_id,
                    path = %path.display(),
                    reason = %reason,
                    "L2 record unreadable; purging entry"
                );
                state.disk.pop(&key);
                self.persist_index(state);
                if let Err(e) = remove_if_exists(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to delete L2 record");
                }
                state.misses += 1;
                return None;
            }
        };

        let now = Utc::now();
        if let Some(entry) = state.disk.get_mut(&key) {
            entry.accessed_at = now;
            entry.access_count = access_count;
        }
        state.hot.push(
            key.clone(),
            EmbeddingRecord {
                key,
                embedding: embedding.clone(),
                created_at,
                accessed_at: now,
                access_count,
            },
        );
        state.disk_hits += 1;
        self.persist_index(state);
        debug!(doc_id, "L2 disk hit; promoted to hot tier");
        Some(embedding)
    }

    /// Store a document embedding on disk and in the hot tier.
    ///
    /// A failed write leaves no entry for `doc_id`.
    pub fn set(&self, doc_id: &str, embedding: Vec<f32>) {
        let key = content_hash(doc_id);
        let path = self.record_path(&key);
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.disk.contains(&key) && state.disk.len() >= self.disk_capacity {
            self.evict_lru(state);
        }

        let record = RecordFile::new(embedding.clone());
        if let Err(e) = write_json_atomic(&path, &record) {
            warn!(doc_id, error = %e, "Failed to write L2 record; entry not cached");
            state.hot.pop(&key);
            state.disk.pop(&key);
            self.persist_index(state);
            if let Err(e) = remove_if_exists(&path) {
                warn!(path = %path.display(), error = %e, "Failed to delete stale L2 record");
            }
            return;
        }

        let now = Utc::now();
        state.disk.push(
            key.clone(),
            DiskEntry {
                doc_id: doc_id.to_string(),
                created_at: now,
                accessed_at: now,
                access_count: 0,
                shape: record.shape,
            },
        );
        state.hot.push(key.clone(), EmbeddingRecord::new(key, embedding));
        self.persist_index(state);
        debug!(doc_id, "L2 set");
    }

    /// Remove `doc_id` from both tiers and delete its record file.
    pub fn invalidate(&self, doc_id: &str) -> bool {
        let key = content_hash(doc_id);
        let path = self.record_path(&key);
        let mut guard = self.lock();
        let state = &mut *guard;

        let in_hot = state.hot.pop(&key).is_some();
        let in_disk = state.disk.pop(&key).is_some();
        if in_disk {
            self.persist_index(state);
        }
        let removed_file = remove_if_exists(&path).unwrap_or_else(|e| {
            warn!(doc_id, error = %e, "Failed to delete L2 record");
            false
        });

        let removed = in_hot || in_disk || removed_file;
        if removed {
            debug!(doc_id, "L2 invalidated");
        }
        removed
    }

    /// Whether `doc_id` has a record on disk. Does not touch recency.
    pub fn contains(&self, doc_id: &str) -> bool {
        self.lock().disk.contains(&content_hash(doc_id))
    }

    /// Drop every entry and record file.
    pub fn clear(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let keys: Vec<String> = state.disk.iter().map(|(key, _)| key.clone()).collect();
        state.hot.clear();
        state.disk.clear();
        self.persist_index(state);

        for key in &keys {
            if let Err(e) = remove_if_exists(&self.record_path(key)) {
                warn!(key = %key, error = %e, "Failed to delete L2 record during clear");
            }
        }
        info!(removed = keys.len(), "Cleared document embedding cache");
    }

    /// Rewrite the index file, including access metadata from hot hits.
    pub fn flush(&self) -> bool {
        let guard = self.lock();
        self.persist_index(&guard)
    }

    /// Number of records on disk.
    pub fn len(&self) -> usize {
        self.lock().disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DocumentCacheStats {
        let state = self.lock();
        let disk_usage_bytes = state
            .disk
            .iter()
            .filter_map(|(key, _)| fs::metadata(self.record_path(key)).ok())
            .map(|meta| meta.len())
            .sum();
        let hits = state.hot_hits + state.disk_hits;

        DocumentCacheStats {
            hot_size: state.hot.len(),
            hot_capacity: self.hot_capacity,
            disk_entries: state.disk.len(),
            disk_capacity: self.disk_capacity,
            disk_usage_bytes,
            hot_hits: state.hot_hits,
            disk_hits: state.disk_hits,
            misses: state.misses,
            hit_rate: hit_rate(hits, state.misses),
            evictions: state.evictions,
        }
    }

    fn evict_lru(&self, state: &mut DocumentCacheState) -> bool {
        let Some((key, entry)) = state.disk.pop_lru() else {
            return false;
        };
        state.hot.pop(&key);
        if let Err(e) = remove_if_exists(&self.record_path(&key)) {
            warn!(doc_id = %entry.doc_id, error = %e, "Failed to delete evicted L2 record");
        }
        state.evictions += 1;
        debug!(doc_id = %entry.doc_id, "L2 disk eviction");
        true
    }

    fn write_index(&self, state: &DocumentCacheState) -> Result<(), StoreError> {
        let file = IndexFile {
            version: FORMAT_VERSION.to_string(),
            entries: state
                .disk
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
        };
        write_json_atomic(&self.index_path(), &file)
    }

    fn persist_index(&self, state: &DocumentCacheState) -> bool {
        match self.write_index(state) {
            Ok(()) => true,
            Err(e) => {
                warn!(dir = %self.cache_dir.display(), error = %e, "Failed to persist L2 index");
                false
            }
        }
    }

    fn load_index(&self, state: &mut DocumentCacheState) {
        let index_path = self.index_path();
        let entries = match read_json::<IndexFile>(&index_path) {
            Ok(file) if file.version == FORMAT_VERSION => file.entries,
            Ok(file) => {
                warn!(version = %file.version, "Unsupported L2 index version; starting empty");
                BTreeMap::new()
            }
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "L2 index unreadable; starting empty");
                BTreeMap::new()
            }
        };

        let mut entries: Vec<(String, DiskEntry)> = entries
            .into_iter()
            .filter(|(key, entry)| {
                // Keys become file names; only accept the hash of the doc id.
                if *key != content_hash(&entry.doc_id) {
                    warn!(doc_id = %entry.doc_id, "L2 index key does not match doc id; dropping entry");
                    return false;
                }
                let present = self.record_path(key).is_file();
                if !present {
                    warn!(doc_id = %entry.doc_id, "L2 record file missing; dropping index entry");
                }
                present
            })
            .collect();

        // Oldest access first so the most recently used ends up at the front.
        entries.sort_by(|a, b| a.1.accessed_at.cmp(&b.1.accessed_at));
        for (key, entry) in entries {
            state.disk.push(key, entry);
        }

        self.remove_orphans(state);

        while state.disk.len() > self.disk_capacity {
            self.evict_lru(state);
        }
    }

    fn remove_orphans(&self, state: &DocumentCacheState) {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(dir = %self.cache_dir.display(), error = %e, "Failed to scan L2 directory");
                return;
            }
        };

        for entry in dir.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let orphan = if name.ends_with(TMP_SUFFIX) {
                true
            } else if name == INDEX_FILE
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                false
            } else {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|key| !state.disk.contains(key))
            };

            if orphan {
                match remove_if_exists(&path) {
                    Ok(_) => debug!(path = %path.display(), "Removed orphan L2 file"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan L2 file"),
                }
            }
        }
    }
}
