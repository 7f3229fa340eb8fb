//! Whole-file JSON persistence helpers.
//!
//! Every persisted document in rolegate (impediment log, backlog store) is a
//! single JSON value rewritten in full. Writes go to a temp file in the same
//! directory and are renamed over the target, so readers never observe a
//! half-written file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, RolegateError};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// Creates missing parent directories.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RolegateError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

/// Read a JSON array from `path`, treating a missing or unparsable file as empty.
///
/// A leading UTF-8 byte-order mark is tolerated.
pub fn read_json_array_or_empty<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "unreadable JSON file, treating as empty");
            }
            return Vec::new();
        }
    };
    let text = text.trim_start_matches('\u{feff}');
    match serde_json::from_str::<Vec<T>>(text) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt JSON file, treating as empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("items.json");
        write_json_atomic(&path, &vec![1u32, 2, 3]).unwrap();
        let items: Vec<u32> = read_json_array_or_empty(&path);
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<u32> = read_json_array_or_empty(&dir.path().join("absent.json"));
        assert!(items.is_empty());
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let items: Vec<u32> = read_json_array_or_empty(&path);
        assert!(items.is_empty());
    }

    #[test]
    fn bom_prefixed_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.json");
        std::fs::write(&path, "\u{feff}[4, 5]").unwrap();
        let items: Vec<u32> = read_json_array_or_empty(&path);
        assert_eq!(items, vec![4, 5]);
    }
}
