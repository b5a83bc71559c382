//! Backup-then-overwrite JSON document persistence
//!
//! Every durable artifact in Conveyor (intake ledgers, flow registry entries,
//! snapshots) is a single pretty-printed JSON document on disk. Writes keep
//! the previous version as a `.bak` sibling and go through a temp file plus
//! rename, so a crash mid-write leaves either the old document or the new
//! one, never a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{FlowError, Result};

/// Load a JSON document from `path`.
///
/// Returns `Ok(None)` when the file does not exist; any other IO or parse
/// failure is an error.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let doc = serde_json::from_str(&contents)?;
            Ok(Some(doc))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FlowError::Io(e)),
    }
}

/// Load a JSON document, failing if it does not exist.
pub fn load_required<T: DeserializeOwned>(path: &Path) -> Result<T> {
    load_document(path)?
        .ok_or_else(|| FlowError::DocumentNotFound(path.display().to_string()))
}

/// Store a JSON document at `path`, preserving the previous version.
///
/// If a document already exists it is first copied to `{path}.bak`. The new
/// contents are then written to a `{path}.tmp` sibling and renamed into
/// place. Parent directories are created as needed.
pub fn store_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if path.exists() {
        let backup = backup_path(path);
        fs::copy(path, &backup)?;
        debug!(path = %path.display(), backup = %backup.display(), "Backed up document");
    }

    let tmp = sibling_with_suffix(path, ".tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

/// The `.bak` sibling kept by [`store_document`] for a given path.
pub fn backup_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".bak")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u64,
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<Sample> = load_document(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_store_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let doc = Sample {
            name: "orders".to_string(),
            count: 3,
        };

        store_document(&path, &doc).unwrap();
        let loaded: Sample = load_required(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/sample.json");

        store_document(&path, &Sample {
            name: "x".to_string(),
            count: 0,
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_overwrite_keeps_backup_of_previous_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");

        store_document(&path, &Sample {
            name: "first".to_string(),
            count: 1,
        })
        .unwrap();
        store_document(&path, &Sample {
            name: "second".to_string(),
            count: 2,
        })
        .unwrap();

        let current: Sample = load_required(&path).unwrap();
        assert_eq!(current.name, "second");

        let backup: Sample = load_required(&backup_path(&path)).unwrap();
        assert_eq!(backup.name, "first");
    }

    #[test]
    fn test_no_backup_on_first_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");

        store_document(&path, &Sample {
            name: "only".to_string(),
            count: 1,
        })
        .unwrap();
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_load_required_missing_is_error() {
        let dir = tempdir().unwrap();
        let err = load_required::<Sample>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, FlowError::DocumentNotFound(_)));
    }

    #[test]
    fn test_load_corrupt_document_is_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_document::<Sample>(&path).unwrap_err();
        assert!(matches!(err, FlowError::Serialization(_)));
    }
}
