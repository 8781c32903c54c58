//! Documents and their revisions.

use crate::{error::Result, DocumentId, NodeId, StoreError, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// Logical revision of a document, used to order concurrent writes.
///
/// Ordering rules:
/// 1. Higher counter wins
/// 2. If counters are equal, lexicographically higher node id wins
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub counter: u64,
    pub node_id: NodeId,
}

impl Revision {
    pub fn new(node_id: impl Into<NodeId>, counter: u64) -> Self {
        Self {
            counter,
            node_id: node_id.into(),
        }
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A stored document: a JSON object with a string `_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document fields, always including `_id`
    fields: Map<String, Value>,
    /// Revision of the last write
    pub revision: Revision,
    /// Wall-clock time of the last write (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl Document {
    /// Build a document from a JSON value.
    ///
    /// A missing `_id` is filled with a fresh UUID; a present `_id` must be a
    /// non-empty string.
    pub fn from_value(value: Value, revision: Revision, updated_at: Timestamp) -> Result<Self> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::InvalidDocument(format!(
                    "expected an object, got {}",
                    type_name(&other)
                )))
            }
        };

        match fields.get(ID_FIELD) {
            None | Some(Value::Null) => {
                fields.insert(
                    ID_FIELD.to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
            }
            Some(Value::String(id)) if !id.is_empty() => {}
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "_id must be a non-empty string, got {}",
                    other
                )))
            }
        }

        Ok(Self {
            fields,
            revision,
            updated_at,
        })
    }

    /// The document id.
    pub fn id(&self) -> &str {
        self.fields
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Look up a field. Dotted paths descend into nested objects.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a field. Dotted paths create intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        if path == ID_FIELD {
            return Err(StoreError::InvalidDocument("_id is immutable".into()));
        }
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop().unwrap_or(path);
        let mut target = &mut self.fields;
        for part in parts {
            let entry = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            target = entry
                .as_object_mut()
                .ok_or_else(|| StoreError::InvalidDocument(format!("cannot descend into {}", part)))?;
        }
        target.insert(last.to_string(), value);
        Ok(())
    }

    /// Record a new write.
    pub fn touch(&mut self, revision: Revision, updated_at: Timestamp) {
        self.revision = revision;
        self.updated_at = updated_at;
    }

    /// All fields as a JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The document as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
