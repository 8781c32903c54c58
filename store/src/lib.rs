//! # Cinesync Store
//!
//! An embedded, local-first document store with live queries and
//! peer-to-peer replication.
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A document is a JSON object stored in a named collection and identified by
//! its `_id` field. Every write stamps the document with a [`Revision`]
//! (logical counter plus node id) so replicas agree on the newest version.
//!
//! ### Statements
//!
//! All reads and writes go through a small query language (see [`dql`]):
//!
//! ```text
//! SELECT * FROM movies WHERE watched = true AND NOT deleted ORDER BY title ASC
//! INSERT INTO movies INITIAL DOCUMENTS (:doc)
//! UPDATE movies SET watched = :watched WHERE _id = :id
//! ```
//!
//! Values are always bound through named arguments.
//!
//! ### Observers
//!
//! [`Store::register_observer`] runs a query now and again after every change
//! to its collection. Deliveries to one observer never go backwards.
//!
//! ### Sync
//!
//! Stores sharing a [`SyncHub`] replicate documents matching their
//! [`SyncSubscription`]s while sync is started. Concurrent writes resolve by
//! revision: the higher one wins.
//!
//! ## Quick Start
//!
//! ```rust
//! use cinesync_store::{Args, Store};
//! use serde_json::json;
//!
//! let store = Store::new("device_1");
//!
//! let mut args = Args::new();
//! args.insert("doc".into(), json!({"_id": "m1", "title": "Heat", "watched": false}));
//! store.execute("INSERT INTO movies DOCUMENTS (:doc)", &args).unwrap();
//!
//! let result = store
//!     .execute("SELECT * FROM movies WHERE NOT watched", &Args::new())
//!     .unwrap();
//! assert_eq!(result.items.len(), 1);
//! assert_eq!(result.items[0].value()["title"], "Heat");
//! ```

pub mod document;
pub mod dql;
pub mod error;
pub mod observer;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use document::{Document, Revision, ID_FIELD};
pub use dql::{parse, Args, Statement};
pub use error::{Result, StoreError};
pub use observer::{ObserverCallback, StoreObserver};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, QueryResult, QueryResultItem, Store};
pub use sync::{PeerMessage, SyncHub, SyncSubscription};

/// Unique identifier for a document.
pub type DocumentId = String;

/// Name of a collection.
pub type CollectionName = String;

/// Identifier of a store instance (device).
pub type NodeId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
