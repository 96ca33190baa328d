//! Snapshot files: load and save (atomic) `{bookmarks, tags, edges}`.
//!
//! YAML by default; a `.json` extension selects JSON.

use super::memory::MemoryStore;
use super::Row;
use crate::core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The on-disk record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    #[serde(default)]
    pub bookmarks: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Row>>,
    #[serde(default)]
    pub edges: Vec<Row>,
}

impl Snapshot {
    pub fn into_store(self) -> MemoryStore {
        let store = MemoryStore::new()
            .with_bookmarks(self.bookmarks)
            .with_edges(self.edges);
        match self.tags {
            Some(tags) => store.with_tags(tags),
            None => store,
        }
    }

    pub fn from_store(store: &MemoryStore) -> Self {
        Self {
            bookmarks: store.bookmarks().to_vec(),
            tags: Some(store.tag_rows()),
            edges: store.edges().to_vec(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Load a snapshot file.
pub fn load(path: &Path) -> Result<Snapshot, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let invalid = |message: String| StoreError::Snapshot {
        path: path.display().to_string(),
        message,
    };
    if is_json(path) {
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    } else {
        serde_yaml_ng::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

/// Save a snapshot atomically (write to temp, then rename).
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let io = |p: &Path| {
        let p = p.display().to_string();
        move |source| StoreError::Io { path: p, source }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io(parent))?;
    }

    let content = if is_json(path) {
        serde_json::to_string_pretty(snapshot).map_err(|e| StoreError::Other(e.to_string()))?
    } else {
        serde_yaml_ng::to_string(snapshot).map_err(|e| StoreError::Other(e.to_string()))?
    };

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, content).map_err(io(&tmp_path))?;
    std::fs::rename(&tmp_path, path).map_err(io(path))?;
    Ok(())
}
