//! Versioned index snapshots.
//!
//! A checkpoint captures the full corpus (documents, ids, metadata) plus the
//! tombstone set, so a fresh process can resume without re-ingesting.
//! Files are named `checkpoint_v{version}.json` and written atomically;
//! only the newest `retention` files are kept.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use ragstore_types::{read_json, remove_if_exists, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IndexError;

/// Per-document metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const FILE_PREFIX: &str = "checkpoint_v";
const FILE_SUFFIX: &str = ".json";

/// Snapshot of an index at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    /// Structural version at snapshot time
    pub version: u64,

    /// Unix seconds when the snapshot was taken
    pub timestamp: f64,

    pub documents: Vec<String>,
    pub doc_ids: Vec<String>,
    pub metadatas: Vec<Metadata>,

    /// Tombstoned ids not yet compacted away
    #[serde(default)]
    pub deleted_ids: BTreeSet<String>,
}

impl IndexCheckpoint {
    pub fn new(
        version: u64,
        documents: Vec<String>,
        doc_ids: Vec<String>,
        metadatas: Vec<Metadata>,
        deleted_ids: BTreeSet<String>,
    ) -> Self {
        Self {
            version,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            documents,
            doc_ids,
            metadatas,
            deleted_ids,
        }
    }

    /// Check the parallel-array and tombstone invariants.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.documents.len() != self.doc_ids.len() || self.documents.len() != self.metadatas.len() {
            return Err(IndexError::LengthMismatch {
                documents: self.documents.len(),
                ids: self.doc_ids.len(),
                metadatas: self.metadatas.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.doc_ids.len());
        for id in &self.doc_ids {
            if !seen.insert(id.as_str()) {
                return Err(IndexError::DuplicateId(id.clone()));
            }
        }

        if let Some(stray) = self.deleted_ids.iter().find(|id| !seen.contains(id.as_str())) {
            return Err(IndexError::Checkpoint(format!(
                "tombstone {stray} does not name an indexed document"
            )));
        }
        Ok(())
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        serde_json::to_vec(self).map_err(IndexError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        serde_json::from_slice(bytes).map_err(IndexError::from)
    }
}

/// A checkpoint file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub version: u64,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Reads, writes and prunes checkpoint files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    retention: usize,
}

impl CheckpointStore {
    /// `retention` below 1 is treated as 1.
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn file_name(version: u64) -> String {
        format!("{FILE_PREFIX}{version}{FILE_SUFFIX}")
    }

    pub fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(Self::file_name(version))
    }

    fn parse_version(name: &str) -> Option<u64> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Write `checkpoint` and prune old files. Prior files are untouched if
    /// the write fails.
    pub fn save(&self, checkpoint: &IndexCheckpoint) -> Result<PathBuf, IndexError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(checkpoint.version);
        write_json_atomic(&path, checkpoint)?;

        // The snapshot is durable at this point; a failed prune only leaves
        // extra files behind.
        match self.prune() {
            Ok(pruned) => debug!(path = %path.display(), pruned, "Checkpoint written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune old checkpoints"),
        }
        Ok(path)
    }

    /// Checkpoint files ordered oldest to newest: by version, then mtime.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>, IndexError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(version) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Self::parse_version)
            else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push(CheckpointInfo {
                version,
                path,
                modified,
            });
        }

        found.sort_by(|a, b| a.version.cmp(&b.version).then(a.modified.cmp(&b.modified)));
        Ok(found)
    }

    /// Load a specific version, or the newest readable checkpoint.
    ///
    /// `Ok(None)` when nothing matches. Without an explicit version, an
    /// unreadable newest file falls back to the next one.
    pub fn load(&self, version: Option<u64>) -> Result<Option<IndexCheckpoint>, IndexError> {
        if let Some(version) = version {
            let path = self.path_for(version);
            if !path.is_file() {
                return Ok(None);
            }
            return read_checkpoint(&path).map(Some);
        }

        for info in self.list()?.into_iter().rev() {
            match read_checkpoint(&info.path) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    warn!(path = %info.path.display(), error = %e, "Skipping unreadable checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Delete all but the newest `retention` checkpoints.
    pub fn prune(&self) -> Result<usize, IndexError> {
        let found = self.list()?;
        let excess = found.len().saturating_sub(self.retention);
        for info in &found[..excess] {
            remove_if_exists(&info.path)?;
        }
        Ok(excess)
    }
}

fn read_checkpoint(path: &Path) -> Result<IndexCheckpoint, IndexError> {
    let checkpoint: IndexCheckpoint = read_json(path)?;
    checkpoint.validate()?;
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn checkpoint(version: u64) -> IndexCheckpoint {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), json!("unit"));
        IndexCheckpoint::new(
            version,
            vec!["alpha".to_string(), "beta".to_string()],
            vec!["a".to_string(), "b".to_string()],
            vec![meta, Metadata::new()],
            BTreeSet::from(["b".to_string()]),
        )
    }

    #[test]
    fn test_validate() {
        assert!(checkpoint(1).validate().is_ok());

        let mut bad = checkpoint(1);
        bad.metadatas.pop();
        assert!(matches!(bad.validate(), Err(IndexError::LengthMismatch { .. })));

        let mut bad = checkpoint(1);
        bad.doc_ids[1] = "a".to_string();
        bad.deleted_ids.clear();
        assert!(matches!(bad.validate(), Err(IndexError::DuplicateId(_))));

        let mut bad = checkpoint(1);
        bad.deleted_ids.insert("zzz".to_string());
        assert!(matches!(bad.validate(), Err(IndexError::Checkpoint(_))));
    }

    #[test]
    fn test_json_format() {
        let bytes = checkpoint(7).to_bytes().unwrap();
        let json_str = String::from_utf8(bytes.clone()).unwrap();
        assert!(json_str.contains("\"version\":7"));
        assert!(json_str.contains("\"deleted_ids\":[\"b\"]"));
        assert!(json_str.contains("\"timestamp\":"));

        let decoded = IndexCheckpoint::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.doc_ids, vec!["a", "b"]);
        assert_eq!(decoded.metadatas[0]["source"], json!("unit"));
    }

    #[test]
    fn test_file_names() {
        assert_eq!(CheckpointStore::file_name(12), "checkpoint_v12.json");
        assert_eq!(CheckpointStore::parse_version("checkpoint_v12.json"), Some(12));
        assert_eq!(CheckpointStore::parse_version("checkpoint_v12.json.tmp"), None);
        assert_eq!(CheckpointStore::parse_version("index.json"), None);
    }

    #[test]
    fn test_save_and_load_latest() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().join("ckpt"), 3);
        assert_eq!(store.load(None).unwrap(), None);

        store.save(&checkpoint(1)).unwrap();
        store.save(&checkpoint(2)).unwrap();

        let latest = store.load(None).unwrap().unwrap();
        assert_eq!(latest.version, 2);
        let first = store.load(Some(1)).unwrap().unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(store.load(Some(9)).unwrap(), None);
    }

    #[test]
    fn test_retention_prunes_oldest() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path(), 2);
        for version in 1..=4 {
            store.save(&checkpoint(version)).unwrap();
        }

        let versions: Vec<u64> = store.list().unwrap().iter().map(|i| i.version).collect();
        assert_eq!(versions, vec![3, 4]);
        assert!(!store.path_for(1).exists());
    }

    #[test]
    fn test_versions_sort_numerically() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path(), 5);
        store.save(&checkpoint(10)).unwrap();
        store.save(&checkpoint(9)).unwrap();

        assert_eq!(store.load(None).unwrap().unwrap().version, 10);
    }

    #[test]
    fn test_corrupt_latest_falls_back() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path(), 5);
        store.save(&checkpoint(1)).unwrap();
        fs::write(store.path_for(2), b"{truncated").unwrap();

        assert_eq!(store.load(None).unwrap().unwrap().version, 1);
        assert!(store.load(Some(2)).is_err());
    }

    #[test]
    fn test_zero_retention_keeps_one() {
        let store = CheckpointStore::new("/tmp/unused", 0);
        assert_eq!(store.retention(), 1);
    }

    #[test]
    fn test_save_succeeds_when_prune_fails() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path(), 1);

        // A directory under a checkpoint name cannot be removed as a file.
        let stuck = store.path_for(0);
        fs::create_dir_all(stuck.join("inner")).unwrap();

        let path = store.save(&checkpoint(1)).unwrap();
        assert!(path.is_file());
        assert!(stuck.exists());
        assert_eq!(store.load(None).unwrap().unwrap().version, 1);
    }
}
