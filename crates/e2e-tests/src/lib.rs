//! End-to-end test infrastructure for ragstore.
//!
//! Provides a shared TestHarness and helpers for scenarios that span the
//! cache tiers and the incremental index.

use std::path::{Path, PathBuf};

use ragstore_cache::MultiTierCache;
use ragstore_index::{IncrementalIndex, IndexConfig, Metadata};
use ragstore_types::{content_hash, CacheSettings, Settings};

/// Shared test harness for E2E tests.
///
/// Owns a temp directory with separate locations for the L2 cache and the
/// index checkpoints.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// L2 document-embedding cache directory
    pub cache_dir: PathBuf,
    /// Index checkpoint directory
    pub checkpoint_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let cache_dir = temp_dir.path().join("embeddings");
        let checkpoint_dir = temp_dir.path().join("checkpoints");

        Self {
            _temp_dir: temp_dir,
            cache_dir,
            checkpoint_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Small capacities so eviction is easy to provoke.
    pub fn cache_settings(&self) -> CacheSettings {
        let mut settings = CacheSettings::default();
        settings.query.maxsize = 16;
        settings.document.cache_dir = self.cache_dir.to_string_lossy().to_string();
        settings.document.hot_capacity = 4;
        settings.document.disk_capacity = 16;
        settings.result.maxsize = 16;
        settings
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.cache = self.cache_settings();
        settings.index.checkpoint_dir = self.checkpoint_dir.to_string_lossy().to_string();
        settings
    }

    pub fn cache(&self) -> MultiTierCache {
        MultiTierCache::new(&self.cache_settings())
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::default().with_checkpoint_dir(&self.checkpoint_dir)
    }

    pub fn index(&self) -> IncrementalIndex {
        IncrementalIndex::new(self.index_config())
    }

    /// A path nothing can create: it sits beneath a regular file.
    pub fn unwritable_dir(&self) -> PathBuf {
        let blocker = self.root().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("Failed to create blocker file");
        blocker.join("embeddings")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A small corpus with a `collection` metadata field on every document.
pub fn sample_corpus() -> (Vec<String>, Vec<String>, Vec<Metadata>) {
    let entries = [
        ("d1", "manuals", "rust ownership and borrowing explained"),
        ("d2", "manuals", "the rust borrow checker rejects aliasing"),
        ("d3", "notes", "python garbage collection uses reference counting"),
        ("d4", "notes", "tokio runs async rust tasks on a thread pool"),
        ("d5", "manuals", "serde derives serialization for rust structs"),
    ];

    let mut docs = Vec::with_capacity(entries.len());
    let mut ids = Vec::with_capacity(entries.len());
    let mut metas = Vec::with_capacity(entries.len());
    for (id, collection, text) in entries {
        let mut meta = Metadata::new();
        meta.insert("collection".to_string(), serde_json::json!(collection));
        ids.push(id.to_string());
        docs.push(text.to_string());
        metas.push(meta);
    }
    (docs, ids, metas)
}

/// Deterministic stand-in for an embedding model.
pub fn fake_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let digest = content_hash(text);
    digest
        .bytes()
        .cycle()
        .take(dimension)
        .map(|b| b as f32 / 255.0)
        .collect()
}

/// Record files in an L2 directory, excluding the index file.
pub fn record_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    name.ends_with(".json") && name != "index.json"
                })
                .count()
        })
        .unwrap_or(0)
}
