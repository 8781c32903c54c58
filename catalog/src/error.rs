//! Error types for the catalog layer.

use cinesync_store::StoreError;

/// A document that could not be read as a movie.
///
/// Contained: decoding falls back to defaults and logs this instead of
/// returning it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// A single dataset record that could not be imported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImportRecordError {
    #[error("record {index} is not a movie: {source}")]
    Malformed { index: usize, source: DecodeError },

    #[error("record {index} ('{title}') was rejected by the store: {source}")]
    Rejected {
        index: usize,
        title: String,
        source: StoreError,
    },
}

/// Catalog error type.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Movie not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preferences error: {0}")]
    Preferences(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
