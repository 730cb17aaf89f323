//! Index lifecycle through the public API: build, mutate concurrently,
//! checkpoint, and recover in a fresh instance.

use std::sync::Arc;
use std::thread;

use ragstore_index::{CheckpointStore, IncrementalIndex, IndexConfig, IndexError};
use tempfile::TempDir;

fn corpus(n: usize) -> (Vec<String>, Vec<String>) {
    let docs = (0..n)
        .map(|i| format!("document {i} about topic{}", i % 5))
        .collect();
    let ids = (0..n).map(|i| format!("doc-{i}")).collect();
    (docs, ids)
}

#[test]
fn test_recover_latest_after_restart() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig::default()
        .with_checkpoint_dir(temp.path())
        .with_compaction_threshold(0.5);

    {
        let index = IncrementalIndex::new(config.clone());
        let (docs, ids) = corpus(10);
        index.index_documents(docs, ids, None).unwrap();
        index
            .add_documents(vec!["late arrival".into()], vec!["late".into()], None)
            .unwrap();
        index.remove_documents(&["doc-0", "doc-1"]);
        assert!(index.save_checkpoint());
    }

    let restored = IncrementalIndex::new(config);
    assert!(restored.load_checkpoint(None));

    let stats = restored.stats();
    assert_eq!(stats.version, 2);
    assert_eq!(stats.document_count, 11);
    assert_eq!(stats.tombstone_count, 2);
    assert!(restored.contains("late"));
    assert!(!restored.contains("doc-0"));

    let hits = restored.search("topic0", 10).unwrap();
    assert!(hits.iter().all(|h| h.doc_id != "doc-0"));
}

#[test]
fn test_stale_temp_file_is_ignored() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig::default().with_checkpoint_dir(temp.path());

    let index = IncrementalIndex::new(config.clone());
    let (docs, ids) = corpus(3);
    index.index_documents(docs, ids, None).unwrap();

    // A crash mid-write leaves only the temp file behind.
    let torn = temp
        .path()
        .join(format!("{}.tmp", CheckpointStore::file_name(2)));
    std::fs::write(&torn, b"{\"version\":2,").unwrap();

    let restored = IncrementalIndex::new(config);
    assert!(restored.load_checkpoint(None));
    assert_eq!(restored.version(), 1);
}

#[test]
fn test_concurrent_adds_and_searches() {
    let index = Arc::new(IncrementalIndex::new(
        IndexConfig::default().with_compaction_threshold(0.3),
    ));
    let (docs, ids) = corpus(20);
    index.index_documents(docs, ids, None).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let id = format!("w{w}-{i}");
                    index
                        .add_documents(vec![format!("writer {w} topic{i}")], vec![id.clone()], None)
                        .unwrap();
                    if i % 2 == 0 {
                        index.remove_documents(&[id]);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let index = index.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let hits = index.search("topic1", 5).unwrap();
                    assert!(hits.len() <= 5);
                    let checkpoint = index.checkpoint().unwrap();
                    checkpoint.validate().unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    // 20 originals + 40 added - 20 removed
    assert_eq!(index.len(), 40);
    for w in 0..4 {
        assert!(!index.contains(&format!("w{w}-0")));
        assert!(index.contains(&format!("w{w}-1")));
    }
}

#[test]
fn test_misuse_is_reported() {
    let index = IncrementalIndex::new(IndexConfig::default());
    assert!(matches!(index.search("x", 1), Err(IndexError::NotIndexed)));
    assert!(matches!(
        index.index_documents(vec!["a".into()], vec![], None),
        Err(IndexError::LengthMismatch { .. })
    ));
}
