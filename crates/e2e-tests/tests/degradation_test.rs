//! Graceful degradation: a tier that cannot start must not take the others
//! down with it.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::TestHarness;
use ragstore_cache::{CacheTier, MultiTierCache, QueryParams};

/// Unwritable L2 directory: construction succeeds, L2 is a consistent
/// miss/no-op, L1 and L3 keep working.
#[test]
fn test_unwritable_document_dir() {
    let harness = TestHarness::new();
    let mut settings = harness.cache_settings();
    settings.document.cache_dir = harness.unwritable_dir().to_string_lossy().to_string();

    let cache: MultiTierCache = MultiTierCache::new(&settings);
    assert_eq!(
        cache.active_tiers(),
        vec![CacheTier::Query, CacheTier::Result]
    );

    cache.set_document_embedding("d1", vec![1.0, 2.0]);
    assert_eq!(cache.get_document_embedding("d1"), None);
    assert!(!cache.invalidate_document("d1"));

    cache.set_query_embedding("q", vec![0.5]);
    assert_eq!(cache.get_query_embedding("q"), Some(vec![0.5]));

    let params = QueryParams::new().with("top_k", 2);
    cache.set_query_result("q", json!({"ids": ["d1"]}), &params);
    assert_eq!(cache.get_query_result("q", &params), Some(json!({"ids": ["d1"]})));

    let stats = cache.get_stats();
    assert!(stats.l2.is_none());
    assert_eq!(stats.aggregate.total_hits, 2);
    assert_eq!(
        stats.aggregate.active_tiers,
        vec![CacheTier::Query, CacheTier::Result]
    );

    cache.clear_all();
    cache.shutdown();
}

/// Every tier disabled: still usable, every lookup is a miss.
#[test]
fn test_all_tiers_disabled() {
    let harness = TestHarness::new();
    let mut settings = harness.cache_settings();
    settings.query.enabled = false;
    settings.document.enabled = false;
    settings.result.enabled = false;

    let cache: MultiTierCache = MultiTierCache::new(&settings);
    assert!(cache.active_tiers().is_empty());
    cache.set_query_embedding("q", vec![1.0]);
    assert_eq!(cache.get_query_embedding("q"), None);
    assert!(!harness.cache_dir.exists());
}

/// Checkpointing into an unwritable directory fails softly; the index keeps
/// serving queries.
#[test]
fn test_unwritable_checkpoint_dir() {
    let harness = TestHarness::new();
    let config = harness
        .index_config()
        .with_checkpoint_dir(harness.unwritable_dir());
    let index = ragstore_index::IncrementalIndex::new(config);

    let (docs, ids, metas) = e2e_tests::sample_corpus();
    index.index_documents(docs, ids, Some(metas)).unwrap();

    assert!(!index.save_checkpoint());
    assert_eq!(index.stats().last_checkpoint_version, None);
    assert_eq!(index.search("tokio", 1).unwrap()[0].doc_id, "d4");
}
