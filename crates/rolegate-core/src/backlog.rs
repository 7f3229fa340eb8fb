//! JSON-backed work backlog.
//!
//! Items live in a single JSON array rewritten atomically on every change.
//! Ids start at 1 and are always one past the current maximum, so ids freed
//! by hand-editing the file are never reused while a higher id exists.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::{read_json_array_or_empty, write_json_atomic};
use crate::error::{Result, RolegateError};

/// Default backlog location, relative to the working directory.
pub const DEFAULT_BACKLOG_PATH: &str = ".continue/backlog.json";

/// Status given to newly added items.
pub const STATUS_OPEN: &str = "open";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    STATUS_OPEN.to_string()
}

/// A backlog persisted at `path`. Loaded once; every mutation persists.
#[derive(Debug)]
pub struct BacklogStore {
    path: PathBuf,
    items: Vec<BacklogItem>,
}

impl BacklogStore {
    /// Open the backlog at `path`. A missing or corrupt file is an empty backlog.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = read_json_array_or_empty(&path);
        debug!(path = %path.display(), items = items.len(), "backlog loaded");
        Self { path, items }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[BacklogItem] {
        &self.items
    }

    pub fn get(&self, id: u64) -> Option<&BacklogItem> {
        self.items.iter().find(|it| it.id == id)
    }

    pub fn add(
        &mut self,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Result<BacklogItem> {
        let id = self.items.iter().map(|it| it.id).max().unwrap_or(0) + 1;
        let item = BacklogItem {
            id,
            title: title.into(),
            description,
            status: default_status(),
        };
        self.items.push(item.clone());
        self.persist()?;
        Ok(item)
    }

    pub fn update_status(&mut self, id: u64, status: impl Into<String>) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|it| it.id == id)
            .ok_or(RolegateError::BacklogItemNotFound(id))?;
        item.status = status.into();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_sequential_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");

        let mut store = BacklogStore::open(&path);
        let a = store.add("write docs", None).unwrap();
        let b = store.add("fix ci", Some("flaky test".into())).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.status, "open");

        let reopened = BacklogStore::open(&path);
        assert_eq!(reopened.list().len(), 2);
        assert_eq!(
            reopened.get(2).and_then(|it| it.description.as_deref()),
            Some("flaky test")
        );
    }

    #[test]
    fn test_ids_follow_the_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(&path, r#"[{"id": 7, "title": "old"}]"#).unwrap();

        let mut store = BacklogStore::open(&path);
        assert_eq!(store.get(7).map(|it| it.status.as_str()), Some("open"));
        assert_eq!(store.add("next", None).unwrap().id, 8);
    }

    #[test]
    fn test_update_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BacklogStore::open(dir.path().join("backlog.json"));
        let item = store.add("ship", None).unwrap();

        store.update_status(item.id, "done").unwrap();
        assert_eq!(store.get(item.id).unwrap().status, "done");

        let err = store.update_status(99, "done").unwrap_err();
        assert!(matches!(err, RolegateError::BacklogItemNotFound(99)));
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(&path, "not json").unwrap();

        let mut store = BacklogStore::open(&path);
        assert!(store.list().is_empty());
        assert_eq!(store.add("first", None).unwrap().id, 1);
    }
}
