//! Façade over the three cache tiers.
//!
//! Each tier is optional: disabled by settings, or disabled because it failed
//! to initialize. A missing tier answers every lookup with a miss and ignores
//! writes, so callers never branch on tier availability.

use std::fmt;

use ragstore_types::CacheSettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document_cache::{DocumentCacheStats, DocumentEmbeddingCache};
use crate::error::CacheError;
use crate::query_cache::{hit_rate, QueryCacheStats, QueryEmbeddingCache};
use crate::result_cache::{QueryParams, ResultCache, ResultCacheStats};

/// Identifies a cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// L1 query embeddings
    Query,
    /// L2 document embeddings
    Document,
    /// L3 query results
    Result,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Query => write!(f, "l1_query"),
            CacheTier::Document => write!(f, "l2_document"),
            CacheTier::Result => write!(f, "l3_result"),
        }
    }
}

/// Totals across the active tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_hits: u64,
    pub total_misses: u64,
    pub overall_hit_rate: f64,
    pub active_tiers: Vec<CacheTier>,
}

/// Per-tier stats plus the aggregate. Absent tiers report `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiTierStats {
    pub l1: Option<QueryCacheStats>,
    pub l2: Option<DocumentCacheStats>,
    pub l3: Option<ResultCacheStats>,
    pub aggregate: AggregateStats,
}

/// L1 + L2 + L3 behind one handle. Share it with `Arc`.
pub struct MultiTierCache<V = serde_json::Value> {
    query: Option<QueryEmbeddingCache>,
    document: Option<DocumentEmbeddingCache>,
    result: Option<ResultCache<V>>,
}

fn init_tier<T>(tier: CacheTier, enabled: bool, build: impl FnOnce() -> Result<T, CacheError>) -> Option<T> {
    if !enabled {
        debug!(%tier, "Cache tier disabled by configuration");
        return None;
    }
    match build() {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(%tier, error = %e, "Cache tier failed to initialize; continuing without it");
            None
        }
    }
}

impl<V: Clone + Serialize> MultiTierCache<V> {
    /// Build the enabled tiers. Never fails.
    pub fn new(settings: &CacheSettings) -> Self {
        let cache = Self {
            query: init_tier(CacheTier::Query, settings.query.enabled, || {
                QueryEmbeddingCache::from_settings(&settings.query)
            }),
            document: init_tier(CacheTier::Document, settings.document.enabled, || {
                DocumentEmbeddingCache::from_settings(&settings.document)
            }),
            result: init_tier(CacheTier::Result, settings.result.enabled, || {
                ResultCache::from_settings(&settings.result)
            }),
        };
        info!(tiers = ?cache.active_tiers(), "Multi-tier cache ready");
        cache
    }

    /// Assemble from already-built tiers.
    pub fn from_tiers(
        query: Option<QueryEmbeddingCache>,
        document: Option<DocumentEmbeddingCache>,
        result: Option<ResultCache<V>>,
    ) -> Self {
        Self {
            query,
            document,
            result,
        }
    }

    pub fn active_tiers(&self) -> Vec<CacheTier> {
        let mut tiers = Vec::with_capacity(3);
        if self.query.is_some() {
            tiers.push(CacheTier::Query);
        }
        if self.document.is_some() {
            tiers.push(CacheTier::Document);
        }
        if self.result.is_some() {
            tiers.push(CacheTier::Result);
        }
        tiers
    }

    pub fn query_cache(&self) -> Option<&QueryEmbeddingCache> {
        self.query.as_ref()
    }

    pub fn document_cache(&self) -> Option<&DocumentEmbeddingCache> {
        self.document.as_ref()
    }

    pub fn result_cache(&self) -> Option<&ResultCache<V>> {
        self.result.as_ref()
    }

    pub fn get_query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        self.query.as_ref()?.get(query)
    }

    pub fn set_query_embedding(&self, query: &str, embedding: Vec<f32>) {
        if let Some(cache) = &self.query {
            cache.set(query, embedding);
        }
    }

    pub fn get_document_embedding(&self, doc_id: &str) -> Option<Vec<f32>> {
        self.document.as_ref()?.get(doc_id)
    }

    pub fn set_document_embedding(&self, doc_id: &str, embedding: Vec<f32>) {
        if let Some(cache) = &self.document {
            cache.set(doc_id, embedding);
        }
    }

    pub fn get_query_result(&self, query: &str, params: &QueryParams) -> Option<V> {
        self.result.as_ref()?.get(query, params)
    }

    pub fn set_query_result(&self, query: &str, value: V, params: &QueryParams) {
        if let Some(cache) = &self.result {
            cache.set(query, value, params);
        }
    }

    /// Remove a document embedding from both L2 levels and disk.
    pub fn invalidate_document(&self, doc_id: &str) -> bool {
        self.document
            .as_ref()
            .is_some_and(|cache| cache.invalidate(doc_id))
    }

    /// Drop every L3 result tagged with `collection`.
    pub fn invalidate_collection(&self, collection: &str) -> usize {
        self.result
            .as_ref()
            .map_or(0, |cache| cache.invalidate_collection(collection))
    }

    pub fn invalidate_query_result(&self, query: &str, params: &QueryParams) -> bool {
        self.result
            .as_ref()
            .is_some_and(|cache| cache.invalidate(query, params))
    }

    pub fn invalidate_query_embedding(&self, query: &str) -> bool {
        self.query
            .as_ref()
            .is_some_and(|cache| cache.invalidate(query))
    }

    pub fn clear_all(&self) {
        if let Some(cache) = &self.query {
            cache.clear();
        }
        if let Some(cache) = &self.document {
            cache.clear();
        }
        if let Some(cache) = &self.result {
            cache.clear();
        }
        info!("Cleared all cache tiers");
    }

    pub fn get_stats(&self) -> MultiTierStats {
        let l1 = self.query.as_ref().map(QueryEmbeddingCache::stats);
        let l2 = self.document.as_ref().map(DocumentEmbeddingCache::stats);
        let l3 = self.result.as_ref().map(ResultCache::stats);

        let mut total_hits = 0;
        let mut total_misses = 0;
        if let Some(s) = &l1 {
            total_hits += s.hits;
            total_misses += s.misses;
        }
        if let Some(s) = &l2 {
            total_hits += s.hot_hits + s.disk_hits;
            total_misses += s.misses;
        }
        if let Some(s) = &l3 {
            total_hits += s.hits;
            total_misses += s.misses;
        }

        MultiTierStats {
            l1,
            l2,
            l3,
            aggregate: AggregateStats {
                total_hits,
                total_misses,
                overall_hit_rate: hit_rate(total_hits, total_misses),
                active_tiers: self.active_tiers(),
            },
        }
    }

    /// Flush the L2 index and log final counters.
    pub fn shutdown(&self) {
        if let Some(cache) = &self.document {
            cache.flush();
        }
        let stats = self.get_stats();
        info!(
            hits = stats.aggregate.total_hits,
            misses = stats.aggregate.total_misses,
            hit_rate = stats.aggregate.overall_hit_rate,
            "Multi-tier cache shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> CacheSettings {
        let mut settings = CacheSettings::default();
        settings.document.cache_dir = dir.path().join("embeddings").to_string_lossy().to_string();
        settings.query.maxsize = 8;
        settings.document.hot_capacity = 4;
        settings.document.disk_capacity = 8;
        settings.result.maxsize = 8;
        settings
    }

    #[test]
    fn test_all_tiers_active() {
        let temp = TempDir::new().unwrap();
        let cache: MultiTierCache = MultiTierCache::new(&settings(&temp));
        assert_eq!(
            cache.active_tiers(),
            vec![CacheTier::Query, CacheTier::Document, CacheTier::Result]
        );
    }

    #[test]
    fn test_pass_through() {
        let temp = TempDir::new().unwrap();
        let cache: MultiTierCache = MultiTierCache::new(&settings(&temp));
        let params = QueryParams::new().with("top_k", 5);

        cache.set_query_embedding("q", vec![1.0]);
        cache.set_document_embedding("d", vec![2.0]);
        cache.set_query_result("q", json!(["d"]), &params);

        assert_eq!(cache.get_query_embedding("q"), Some(vec![1.0]));
        assert_eq!(cache.get_document_embedding("d"), Some(vec![2.0]));
        assert_eq!(cache.get_query_result("q", &params), Some(json!(["d"])));
        assert_eq!(cache.get_query_embedding("other"), None);

        let stats = cache.get_stats();
        assert_eq!(stats.aggregate.total_hits, 3);
        assert_eq!(stats.aggregate.total_misses, 1);
        assert!((stats.aggregate.overall_hit_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_tiers_are_noops() {
        let cache: MultiTierCache = MultiTierCache::new(&CacheSettings::disabled());
        assert!(cache.active_tiers().is_empty());

        cache.set_query_embedding("q", vec![1.0]);
        cache.set_document_embedding("d", vec![1.0]);
        cache.set_query_result("q", json!(1), &QueryParams::new());
        assert_eq!(cache.get_query_embedding("q"), None);
        assert_eq!(cache.get_document_embedding("d"), None);
        assert_eq!(cache.get_query_result("q", &QueryParams::new()), None);
        assert!(!cache.invalidate_document("d"));
        assert_eq!(cache.invalidate_collection("c"), 0);

        let stats = cache.get_stats();
        assert!(stats.l1.is_none() && stats.l2.is_none() && stats.l3.is_none());
        assert_eq!(stats.aggregate.overall_hit_rate, 0.0);
    }

    #[test]
    fn test_invalid_tier_is_disabled_not_fatal() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings(&temp);
        settings.query.maxsize = 0;

        let cache: MultiTierCache = MultiTierCache::new(&settings);
        assert_eq!(
            cache.active_tiers(),
            vec![CacheTier::Document, CacheTier::Result]
        );
        cache.set_query_embedding("q", vec![1.0]);
        assert_eq!(cache.get_query_embedding("q"), None);
    }

    #[test]
    fn test_invalidations() {
        let temp = TempDir::new().unwrap();
        let cache: MultiTierCache = MultiTierCache::new(&settings(&temp));
        let tagged = QueryParams::new().with_collection("manuals");

        cache.set_query_embedding("q", vec![1.0]);
        cache.set_document_embedding("d", vec![2.0]);
        cache.set_query_result("q", json!("answer"), &tagged);

        assert!(cache.invalidate_document("d"));
        assert_eq!(cache.get_document_embedding("d"), None);
        assert_eq!(cache.invalidate_collection("manuals"), 1);
        assert!(cache.invalidate_query_embedding("q"));
        assert!(!cache.invalidate_query_result("q", &tagged));
    }

    #[test]
    fn test_clear_all_and_shutdown() {
        let temp = TempDir::new().unwrap();
        let cache: MultiTierCache = MultiTierCache::new(&settings(&temp));
        cache.set_query_embedding("q", vec![1.0]);
        cache.set_document_embedding("d", vec![2.0]);
        cache.set_query_result("q", json!(1), &QueryParams::new());

        cache.clear_all();
        let stats = cache.get_stats();
        assert_eq!(stats.l1.unwrap().size, 0);
        assert_eq!(stats.l2.unwrap().disk_entries, 0);
        assert_eq!(stats.l3.unwrap().size, 0);

        cache.shutdown();
        assert!(temp.path().join("embeddings").join("index.json").exists());
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(CacheTier::Query.to_string(), "l1_query");
        assert_eq!(CacheTier::Document.to_string(), "l2_document");
        assert_eq!(CacheTier::Result.to_string(), "l3_result");
    }
}
