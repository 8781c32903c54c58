//! # Cinesync Catalog
//!
//! Reactive data access and sync control for a movie catalog stored in a
//! [`cinesync_store::Store`].
//!
//! - [`model`] - the `Movie` document and its tolerant decoding
//! - [`query`] - list queries derived from the filter, and fixed statements
//! - [`repository`] - live observation, reads, mutations and sync lifecycle
//! - [`controller`] - filter state, persisted sync preference, first-run import
//! - [`importer`] - streaming import of the bundled dataset
//! - [`editor`] - create/edit form state
//! - [`detail`] - single movie view with watched toggle and delete
//!
//! ```no_run
//! use cinesync_catalog::{
//!     AssetDir, BulkImporter, CatalogController, CatalogRepository, MemoryPreferences,
//! };
//! use cinesync_store::Store;
//! use std::sync::Arc;
//!
//! # async fn run() -> cinesync_catalog::Result<()> {
//! let repository = Arc::new(CatalogRepository::new(Arc::new(Store::new("device_1"))));
//! let controller = CatalogController::new(
//!     repository.clone(),
//!     Arc::new(MemoryPreferences::new()),
//!     BulkImporter::new(repository),
//!     Arc::new(AssetDir::new("./assets")),
//! );
//! controller.start().await?;
//!
//! let movies = controller.movies();
//! println!("{} movies", movies.borrow().len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod detail;
pub mod editor;
pub mod error;
pub mod importer;
pub mod live;
pub mod model;
pub mod preferences;
pub mod query;
pub mod repository;

pub use backend::DocumentStore;
pub use config::{Config, ConfigError};
pub use controller::CatalogController;
pub use detail::MovieDetail;
pub use editor::{MovieEditor, MovieForm};
pub use error::{CatalogError, DecodeError, ImportRecordError, Result};
pub use importer::{
    AssetDir, BulkImporter, DatasetSource, ImportProgress, ImportStats, LogProgress,
    SilentProgress, DATASET_NAME, DEFAULT_BATCH_SIZE,
};
pub use live::{MovieStream, Snapshot};
pub use model::{Movie, MovieFields, RawId};
pub use preferences::{FilePreferences, MemoryPreferences, PreferenceStore, Preferences};
pub use query::{build_query, CatalogFilter};
pub use repository::{BatchOutcome, CatalogRepository, MutationOutcome};
