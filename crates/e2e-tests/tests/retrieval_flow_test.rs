//! A retrieval request flow over both crates: cached query embedding,
//! index search, cached result, and invalidation when the corpus changes.

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use e2e_tests::{fake_embedding, sample_corpus, TestHarness};
use ragstore_cache::{MultiTierCache, QueryParams};
use ragstore_index::IncrementalIndex;

const DIM: usize = 8;

fn retrieve(cache: &MultiTierCache, index: &IncrementalIndex, query: &str, collection: &str) -> Value {
    let params = QueryParams::new().with("top_k", 3).with_collection(collection);
    if let Some(hit) = cache.get_query_result(query, &params) {
        return hit;
    }

    if cache.get_query_embedding(query).is_none() {
        cache.set_query_embedding(query, fake_embedding(query, DIM));
    }

    let ids: Vec<String> = index
        .search(query, 3)
        .unwrap()
        .into_iter()
        .filter(|hit| hit.metadata["collection"] == json!(collection))
        .map(|hit| hit.doc_id)
        .collect();
    for id in &ids {
        if cache.get_document_embedding(id).is_none() {
            cache.set_document_embedding(id, fake_embedding(id, DIM));
        }
    }

    let result = json!({ "ids": ids });
    cache.set_query_result(query, result.clone(), &params);
    result
}

#[test]
fn test_repeat_query_served_from_cache() {
    let harness = TestHarness::new();
    let cache = harness.cache();
    let index = harness.index();
    let (docs, ids, metas) = sample_corpus();
    index.index_documents(docs, ids, Some(metas)).unwrap();

    let first = retrieve(&cache, &index, "rust borrow", "manuals");
    let second = retrieve(&cache, &index, "rust borrow", "manuals");
    assert_eq!(first, second);

    let stats = cache.get_stats();
    assert_eq!(stats.l3.unwrap().hits, 1);
    assert_eq!(stats.l1.unwrap().misses, 1);
    assert!(first["ids"].as_array().unwrap().contains(&json!("d2")));
}

#[test]
fn test_removal_invalidates_downstream_caches() {
    let harness = TestHarness::new();
    let cache = harness.cache();
    let index = IncrementalIndex::new(harness.index_config().with_compaction_threshold(0.9));
    let (docs, ids, metas) = sample_corpus();
    index.index_documents(docs, ids, Some(metas)).unwrap();

    let before = retrieve(&cache, &index, "rust borrow", "manuals");
    assert!(before["ids"].as_array().unwrap().contains(&json!("d2")));

    index.remove_documents(&["d2"]);
    assert!(cache.invalidate_document("d2"));
    assert_eq!(cache.invalidate_collection("manuals"), 1);

    let after = retrieve(&cache, &index, "rust borrow", "manuals");
    assert!(!after["ids"].as_array().unwrap().contains(&json!("d2")));
    assert_eq!(cache.get_document_embedding("d2"), None);
}

#[test]
fn test_shared_across_threads() {
    let harness = TestHarness::new();
    let cache = Arc::new(harness.cache());
    let index = Arc::new(harness.index());
    let (docs, ids, metas) = sample_corpus();
    index.index_documents(docs, ids, Some(metas)).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..20 {
                    let query = if (t + i) % 2 == 0 { "rust" } else { "python" };
                    let collection = if i % 3 == 0 { "notes" } else { "manuals" };
                    retrieve(&cache, &index, query, collection);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.get_stats();
    let l3 = stats.l3.unwrap();
    assert!(l3.size <= 4);
    assert!(l3.hits > 0);
}
