//! Atomic file writes and JSON load/save for the local run store.
//!
//! Every run manifest is rewritten after each logging call, so writes go to a
//! `.tmp` sibling first and are renamed into place.

use crate::error::Result;
use std::io;
use std::path::Path;

/// Atomically write JSON data to a file.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())?;
    Ok(())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Manifest {
        run: String,
        steps: u32,
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");

        let data = Manifest {
            run: "run-1".into(),
            steps: 12,
        };

        atomic_write_json(&path, &data).unwrap();
        let loaded: Option<Manifest> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(data));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proj").join("run-1").join("run.json");
        atomic_write(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Manifest> = load_json(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_corrupt_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_json::<Manifest>(&path).unwrap_err();
        assert!(matches!(err, TrackerError::Serialization(_)));
    }

    #[test]
    fn test_write_into_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::create_dir(&path).unwrap();
        let err = atomic_write_json(&path, &Manifest { run: "r".into(), steps: 1 }).unwrap_err();
        assert!(matches!(err, TrackerError::Io(_)));
    }
}
