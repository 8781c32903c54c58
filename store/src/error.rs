//! Error types for the document store.

use crate::{CollectionName, DocumentId};
use thiserror::Error;

/// All possible errors from the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    // Statement errors
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("missing query argument: :{0}")]
    MissingParameter(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Mutation errors
    #[error("document already exists in '{collection}': {id}")]
    DuplicateId {
        collection: CollectionName,
        id: DocumentId,
    },

    // Lifecycle errors
    #[error("handle already closed")]
    Closed,

    #[error("sync error: {0}")]
    Sync(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("io error: {0}")]
    Io(String),
}

impl StoreError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        StoreError::Parse {
            offset,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
