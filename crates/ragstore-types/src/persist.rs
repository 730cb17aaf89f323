//! Atomic file persistence.
//!
//! Every persisted file (disk-tier records, the disk-tier index, index
//! checkpoints) is written the same way:
//! 1) write `<name>.tmp` next to the target
//! 2) fsync the temp file
//! 3) rename over the target (atomic on POSIX)
//! 4) fsync the directory, best effort
//!
//! A crash before step 3 leaves the previous file untouched.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Format version written into every persisted JSON document.
pub const FORMAT_VERSION: &str = "1.0";

/// Suffix used for in-flight writes.
pub const TMP_SUFFIX: &str = ".tmp";

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Serialize `value` as JSON and atomically write it to `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Read and decode a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: String,
        values: Vec<u32>,
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_tmp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("deeper").join("x.json");
        write_atomic(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_json_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        let doc = Doc {
            version: FORMAT_VERSION.to_string(),
            values: vec![1, 2, 3],
        };

        write_json_atomic(&path, &doc).unwrap();
        let decoded: Doc = read_json(&path).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_read_json_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        fs::write(&path, b"{not json").unwrap();

        let result: Result<Doc, _> = read_json(&path);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_remove_if_exists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.json");
        assert!(!remove_if_exists(&path).unwrap());

        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
