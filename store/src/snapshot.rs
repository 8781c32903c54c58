//! Snapshots for persisting and restoring store contents.
//!
//! Uses `BTreeMap` so the serialized form has a stable ordering.

use crate::{error::Result, CollectionName, Document, DocumentId, NodeId, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Version of the snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every document in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub format_version: u32,
    /// Node that wrote the snapshot
    pub node_id: NodeId,
    /// Logical clock counter at export time
    pub counter: u64,
    pub collections: BTreeMap<CollectionName, BTreeMap<DocumentId, Document>>,
}

impl StoreSnapshot {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: node_id.into(),
            counter: 0,
            collections: BTreeMap::new(),
        }
    }

    pub fn add_document(&mut self, collection: &str, document: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(document.id().to_string(), document);
    }

    /// Count documents across all collections.
    pub fn document_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StoreError::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Write the snapshot to `path`, replacing any previous file atomically.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a snapshot from `path`. Returns `None` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        for (collection, documents) in &self.collections {
            for (id, document) in documents {
                if id != document.id() {
                    return Err(StoreError::InvalidSnapshot(format!(
                        "document key '{}' in '{}' does not match its _id '{}'",
                        id,
                        collection,
                        document.id()
                    )));
                }
            }
        }
        Ok(())
    }
}
