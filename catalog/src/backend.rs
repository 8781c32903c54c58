//! The store boundary the catalog is written against.

use cinesync_store::{
    Args, ObserverCallback, QueryResult, Store, StoreError, StoreObserver, SyncSubscription,
};

/// Operations the catalog needs from a document store.
///
/// Calls may block; the repository runs them on the blocking pool.
pub trait DocumentStore: Send + Sync + 'static {
    fn execute(&self, statement: &str, args: &Args) -> Result<QueryResult, StoreError>;

    fn register_observer(
        &self,
        statement: &str,
        args: Args,
        callback: ObserverCallback,
    ) -> Result<StoreObserver, StoreError>;

    fn register_subscription(
        &self,
        statement: &str,
        args: Args,
    ) -> Result<SyncSubscription, StoreError>;

    fn start_sync(&self) -> Result<(), StoreError>;

    fn stop_sync(&self) -> Result<(), StoreError>;

    fn is_sync_active(&self) -> bool;
}

impl DocumentStore for Store {
    fn execute(&self, statement: &str, args: &Args) -> Result<QueryResult, StoreError> {
        Store::execute(self, statement, args)
    }

    fn register_observer(
        &self,
        statement: &str,
        args: Args,
        callback: ObserverCallback,
    ) -> Result<StoreObserver, StoreError> {
        Store::register_observer(self, statement, args, callback)
    }

    fn register_subscription(
        &self,
        statement: &str,
        args: Args,
    ) -> Result<SyncSubscription, StoreError> {
        Store::register_subscription(self, statement, args)
    }

    fn start_sync(&self) -> Result<(), StoreError> {
        Store::start_sync(self)
    }

    fn stop_sync(&self) -> Result<(), StoreError> {
        Store::stop_sync(self)
    }

    fn is_sync_active(&self) -> bool {
        Store::is_sync_active(self)
    }
}
