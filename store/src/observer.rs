//! Live query observers.
//!
//! An observer re-runs its query after every change to its collection and
//! hands the fresh result to a callback. Deliveries to one observer are
//! serialized and never go backwards: a result computed at an older change
//! sequence than the last delivered one is dropped.

use crate::dql::{Args, Select};
use crate::QueryResult;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Callback invoked with every new result of an observed query.
///
/// Callbacks run on the thread that caused the change and must not execute
/// statements against the same store.
pub type ObserverCallback = Box<dyn Fn(QueryResult) + Send + Sync>;

pub(crate) struct ObserverEntry {
    pub id: u64,
    pub query: Select,
    pub args: Args,
    callback: ObserverCallback,
    closed: AtomicBool,
    /// Sequence of the last delivered result; the lock serializes deliveries
    last_delivered: Mutex<Option<u64>>,
}

impl ObserverEntry {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver a result unless the observer is closed or already saw a newer one.
    pub fn deliver(&self, result: QueryResult) -> bool {
        let mut last = match self.last_delivered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_closed() {
            return false;
        }
        if matches!(*last, Some(seq) if seq >= result.sequence) {
            return false;
        }
        *last = Some(result.sequence);
        (self.callback)(result);
        true
    }
}

/// All registered observers of one store.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    entries: DashMap<u64, Arc<ObserverEntry>>,
}

impl ObserverRegistry {
    pub fn register(
        self: &Arc<Self>,
        query: Select,
        args: Args,
        callback: ObserverCallback,
    ) -> (Arc<ObserverEntry>, StoreObserver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(ObserverEntry {
            id,
            query,
            args,
            callback,
            closed: AtomicBool::new(false),
            last_delivered: Mutex::new(None),
        });
        self.entries.insert(id, entry.clone());
        tracing::debug!(observer_id = id, "Observer registered");

        let handle = StoreObserver {
            entry: entry.clone(),
            registry: Arc::downgrade(self),
        };
        (entry, handle)
    }

    /// Observers watching a collection.
    pub fn for_collection(&self, collection: &str) -> Vec<Arc<ObserverEntry>> {
        self.entries
            .iter()
            .filter(|e| e.query.collection == collection && !e.is_closed())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn remove(&self, id: u64) {
        if self.entries.remove(&id).is_some() {
            tracing::debug!(observer_id = id, "Observer closed");
        }
    }
}

/// Handle to a registered observer. Closing it (or dropping it) stops
/// further deliveries.
pub struct StoreObserver {
    entry: Arc<ObserverEntry>,
    registry: Weak<ObserverRegistry>,
}

impl StoreObserver {
    /// Stop deliveries and release the registration.
    ///
    /// A delivery that is already running on another thread may still
    /// complete; nothing new starts after this returns.
    pub fn close(&self) {
        if self.entry.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.entry.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.entry.is_closed()
    }
}

impl Drop for StoreObserver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StoreObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreObserver")
            .field("id", &self.entry.id)
            .field("collection", &self.entry.query.collection)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dql::{parse, Statement};
    use std::sync::atomic::AtomicUsize;

    fn select(stmt: &str) -> Select {
        match parse(stmt).unwrap() {
            Statement::Select(s) => s,
            _ => panic!("expected select"),
        }
    }

    fn result(sequence: u64) -> QueryResult {
        QueryResult {
            items: vec![],
            mutated_document_ids: vec![],
            sequence,
        }
    }

    fn counting_registry() -> (Arc<ObserverRegistry>, Arc<AtomicUsize>, ObserverCallback) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let callback: ObserverCallback = Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(ObserverRegistry::default()), calls, callback)
    }

    #[test]
    fn deliveries_are_monotonic() {
        let (registry, calls, callback) = counting_registry();
        let (entry, _handle) =
            registry.register(select("SELECT * FROM movies"), Args::new(), callback);

        assert!(entry.deliver(result(2)));
        assert!(!entry.deliver(result(1)));
        assert!(!entry.deliver(result(2)));
        assert!(entry.deliver(result(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_stops_delivery_and_unregisters() {
        let (registry, calls, callback) = counting_registry();
        let (entry, handle) =
            registry.register(select("SELECT * FROM movies"), Args::new(), callback);
        assert_eq!(registry.count(), 1);

        handle.close();
        assert!(handle.is_closed());
        assert_eq!(registry.count(), 0);
        assert!(!entry.deliver(result(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_closes() {
        let (registry, _calls, callback) = counting_registry();
        let (_entry, handle) =
            registry.register(select("SELECT * FROM movies"), Args::new(), callback);
        drop(handle);
        assert_eq!(registry.count(), 0);
        assert!(registry.for_collection("movies").is_empty());
    }

    #[test]
    fn filters_by_collection() {
        let (registry, _calls, callback) = counting_registry();
        let (_entry, _handle) =
            registry.register(select("SELECT * FROM movies"), Args::new(), callback);
        assert_eq!(registry.for_collection("movies").len(), 1);
        assert!(registry.for_collection("people").is_empty());
    }

    #[test]
    fn concurrent_register_and_close() {
        let registry = Arc::new(ObserverRegistry::default());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (_entry, handle) = registry.register(
                            select("SELECT * FROM movies"),
                            Args::new(),
                            Box::new(|_| {}),
                        );
                        assert!(!registry.for_collection("movies").is_empty());
                        handle.close();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.count(), 0);
    }
}
