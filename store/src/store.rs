//! Store - the document container.
//!
//! The store holds every collection, executes statements, notifies live
//! observers after each change and, while sync is active, exchanges
//! documents with peers through a [`SyncHub`].

use crate::dql::{self, Args, Insert, Select, Statement, Update};
use crate::observer::{ObserverCallback, ObserverRegistry, StoreObserver};
use crate::sync::{PeerMessage, Subscription, SubscriptionRegistry, SyncHub, SyncSubscription};
use crate::{
    error::Result, CollectionName, Document, DocumentId, NodeId, Revision, StoreError,
    StoreSnapshot, Timestamp,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::JoinHandle;

/// Documents of one collection, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    documents: BTreeMap<DocumentId, Document>,
}

impl Collection {
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn insert(&mut self, document: Document) {
        self.documents.insert(document.id().to_string(), document);
    }
}

/// One document in a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResultItem {
    value: Value,
}

impl QueryResultItem {
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Canonical JSON representation of the document.
    pub fn json_string(&self) -> String {
        self.value.to_string()
    }
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matching documents (empty for mutations)
    pub items: Vec<QueryResultItem>,
    /// Ids of documents changed by a mutation
    pub mutated_document_ids: Vec<DocumentId>,
    /// Store change sequence this result reflects
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<CollectionName, Collection>,
    /// Logical clock counter used for document revisions
    counter: u64,
    /// Incremented once per applied change
    sequence: u64,
}

impl State {
    fn run_select(&self, select: &Select, args: &Args) -> QueryResult {
        let mut matches: Vec<&Document> = self
            .collections
            .get(&select.collection)
            .map(|c| {
                c.documents
                    .values()
                    .filter(|d| select.filter.as_ref().map_or(true, |f| f.matches(d, args)))
                    .collect()
            })
            .unwrap_or_default();

        dql::sort_documents(&mut matches, &select.order_by);
        if let Some(limit) = select.limit {
            matches.truncate(limit);
        }

        QueryResult {
            items: matches
                .into_iter()
                .map(|d| QueryResultItem {
                    value: d.to_value(),
                })
                .collect(),
            mutated_document_ids: Vec::new(),
            sequence: self.sequence,
        }
    }

    fn next_revision(&mut self, node_id: &str) -> Revision {
        self.counter += 1;
        Revision::new(node_id, self.counter)
    }

    fn mutation_result(&self, ids: Vec<DocumentId>) -> QueryResult {
        QueryResult {
            items: Vec::new(),
            mutated_document_ids: ids,
            sequence: self.sequence,
        }
    }
}

#[derive(Default)]
struct SyncState {
    active: bool,
    hub: Option<Arc<SyncHub>>,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    node_id: NodeId,
    state: RwLock<State>,
    observers: Arc<ObserverRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    sync: Mutex<SyncState>,
}

/// Handle to a document store. Cloning is cheap and shares the same data.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create an empty store that syncs with nobody.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self::build(node_id.into(), None)
    }

    /// Create an empty store that replicates through `hub` while sync is active.
    pub fn with_hub(node_id: impl Into<NodeId>, hub: Arc<SyncHub>) -> Self {
        Self::build(node_id.into(), Some(hub))
    }

    fn build(node_id: NodeId, hub: Option<Arc<SyncHub>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_id,
                state: RwLock::new(State::default()),
                observers: Arc::new(ObserverRegistry::default()),
                subscriptions: Arc::new(SubscriptionRegistry::default()),
                sync: Mutex::new(SyncState {
                    hub,
                    ..SyncState::default()
                }),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// Execute a statement with named arguments.
    pub fn execute(&self, statement: &str, args: &Args) -> Result<QueryResult> {
        let parsed = dql::parse(statement)?;
        check_args(&parsed, args)?;

        let result = match &parsed {
            Statement::Select(select) => Ok(self.inner.read().run_select(select, args)),
            Statement::Insert(insert) => self.inner.apply_insert(insert, args),
            Statement::Update(update) => self.inner.apply_update(update, args),
        }?;

        tracing::trace!(
            collection = %parsed.collection(),
            items = result.items.len(),
            mutated = result.mutated_document_ids.len(),
            "Executed statement"
        );
        Ok(result)
    }

    /// Register a live query. The callback receives the current result right
    /// away and a fresh one after every change to the collection.
    pub fn register_observer(
        &self,
        statement: &str,
        args: Args,
        callback: ObserverCallback,
    ) -> Result<StoreObserver> {
        let query = parse_select(statement, "observers")?;
        check_args(&Statement::Select(query.clone()), &args)?;

        let (entry, handle) = self.inner.observers.register(query, args, callback);
        let initial = self.inner.read().run_select(&entry.query, &entry.args);
        entry.deliver(initial);
        Ok(handle)
    }

    /// Declare documents this peer wants to replicate.
    pub fn register_subscription(&self, statement: &str, args: Args) -> Result<SyncSubscription> {
        let query = parse_select(statement, "subscriptions")?;
        check_args(&Statement::Select(query.clone()), &args)?;

        let handle = self.inner.subscriptions.register(Subscription { query, args });

        // Ask peers again so documents matching the new query arrive
        let sync = self.inner.lock_sync();
        if let (true, Some(hub)) = (sync.active, sync.hub.as_ref()) {
            hub.broadcast_except(
                &self.inner.node_id,
                PeerMessage::RequestState {
                    from: self.inner.node_id.clone(),
                },
            );
        }
        Ok(handle)
    }

    /// Start background replication. Does nothing if already active.
    pub fn start_sync(&self) -> Result<()> {
        let mut sync = self.inner.lock_sync();
        if sync.active {
            return Ok(());
        }

        let node_id = self.inner.node_id.clone();
        if let Some(hub) = sync.hub.clone() {
            let (tx, rx) = mpsc::channel();
            hub.register(node_id.clone(), tx);

            let worker = spawn_worker(Arc::downgrade(&self.inner), hub.clone(), rx).map_err(|e| {
                hub.unregister(&node_id);
                StoreError::Sync(format!("failed to spawn sync worker: {}", e))
            })?;
            sync.worker = Some(worker);

            hub.broadcast_except(
                &node_id,
                PeerMessage::RequestState {
                    from: node_id.clone(),
                },
            );
            for (collection, documents) in self.inner.all_documents() {
                hub.broadcast_except(
                    &node_id,
                    PeerMessage::Documents {
                        from: node_id.clone(),
                        collection,
                        documents,
                    },
                );
            }
        }

        sync.active = true;
        tracing::info!(node_id = %node_id, "Sync started");
        Ok(())
    }

    /// Stop background replication. Does nothing if not active.
    pub fn stop_sync(&self) -> Result<()> {
        let worker = {
            let mut sync = self.inner.lock_sync();
            if !sync.active {
                return Ok(());
            }
            sync.active = false;
            if let Some(hub) = &sync.hub {
                hub.unregister(&self.inner.node_id);
            }
            sync.worker.take()
        };

        // The worker exits once the hub drops its sender
        if let Some(worker) = worker {
            worker
                .join()
                .map_err(|_| StoreError::Sync("sync worker panicked".into()))?;
        }

        tracing::info!(node_id = %self.inner.node_id, "Sync stopped");
        Ok(())
    }

    pub fn is_sync_active(&self) -> bool {
        self.inner.lock_sync().active
    }

    /// Number of documents in a collection, including soft-deleted ones.
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .collections
            .get(collection)
            .map_or(0, Collection::len)
    }

    /// Number of open observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.count()
    }

    /// Number of open sync subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.count()
    }

    /// Export every document.
    pub fn export_state(&self) -> StoreSnapshot {
        let state = self.inner.read();
        let mut snapshot = StoreSnapshot::new(self.inner.node_id.clone());
        snapshot.counter = state.counter;
        for (name, collection) in &state.collections {
            for document in collection.documents.values() {
                snapshot.add_document(name, document.clone());
            }
        }
        snapshot
    }

    /// Replace the store contents with a snapshot and notify observers.
    pub fn import_state(&self, snapshot: StoreSnapshot) {
        let touched: BTreeSet<CollectionName> = {
            let mut state = self.inner.write();
            let mut touched: BTreeSet<CollectionName> =
                state.collections.keys().cloned().collect();
            touched.extend(snapshot.collections.keys().cloned());

            state.collections = snapshot
                .collections
                .into_iter()
                .map(|(name, documents)| (name, Collection { documents }))
                .collect();
            state.counter = state.counter.max(snapshot.counter);
            state.sequence += 1;
            touched
        };

        for collection in &touched {
            self.inner.notify(collection);
        }
    }

    /// Persist the store contents to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.export_state();
        snapshot.save_to(path)?;
        tracing::info!(
            path = %path.display(),
            documents = snapshot.document_count(),
            "Store snapshot saved"
        );
        Ok(())
    }

    /// Load contents from a file written by [`Store::save_to`].
    ///
    /// Returns `false` if the file does not exist.
    pub fn load_from(&self, path: &Path) -> Result<bool> {
        match StoreSnapshot::load_from(path)? {
            Some(snapshot) => {
                tracing::info!(
                    path = %path.display(),
                    documents = snapshot.document_count(),
                    "Store snapshot loaded"
                );
                self.import_state(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("node_id", &self.inner.node_id)
            .field("sync_active", &self.is_sync_active())
            .finish()
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_insert(&self, insert: &Insert, args: &Args) -> Result<QueryResult> {
        let timestamp = now_millis();
        let (result, changed) = {
            let mut state = self.write();

            let mut documents = Vec::with_capacity(insert.documents.len());
            for operand in &insert.documents {
                let value = operand.resolve(None, args).clone();
                let revision = state.next_revision(&self.node_id);
                documents.push(Document::from_value(value, revision, timestamp)?);
            }

            let collection = state
                .collections
                .entry(insert.collection.clone())
                .or_default();

            if !insert.initial {
                let mut seen = HashSet::new();
                for document in &documents {
                    if collection.contains(document.id()) || !seen.insert(document.id()) {
                        return Err(StoreError::DuplicateId {
                            collection: insert.collection.clone(),
                            id: document.id().to_string(),
                        });
                    }
                }
            }

            let mut changed = Vec::new();
            for document in documents {
                if collection.contains(document.id()) {
                    tracing::trace!(id = %document.id(), "Initial document already present");
                    continue;
                }
                changed.push(document.clone());
                collection.insert(document);
            }

            if !changed.is_empty() {
                state.sequence += 1;
            }
            let ids = changed.iter().map(|d| d.id().to_string()).collect();
            (state.mutation_result(ids), changed)
        };

        self.after_local_change(&insert.collection, changed);
        Ok(result)
    }

    fn apply_update(&self, update: &Update, args: &Args) -> Result<QueryResult> {
        if update.assignments.iter().any(|(path, _)| path == crate::ID_FIELD) {
            return Err(StoreError::InvalidDocument("_id is immutable".into()));
        }

        let timestamp = now_millis();
        let (result, changed) = {
            let mut state = self.write();
            let State {
                collections,
                counter,
                sequence,
            } = &mut *state;

            let mut changed = Vec::new();
            if let Some(collection) = collections.get_mut(&update.collection) {
                for document in collection.documents.values_mut() {
                    let selected = update
                        .filter
                        .as_ref()
                        .map_or(true, |f| f.matches(document, args));
                    if !selected {
                        continue;
                    }

                    // Right-hand sides see the document as it was before the update
                    let values: Vec<(&str, Value)> = update
                        .assignments
                        .iter()
                        .map(|(path, operand)| {
                            (path.as_str(), operand.resolve(Some(document), args).clone())
                        })
                        .collect();
                    for (path, value) in values {
                        document.set(path, value)?;
                    }

                    *counter += 1;
                    document.touch(Revision::new(self.node_id.clone(), *counter), timestamp);
                    changed.push(document.clone());
                }
            }

            if !changed.is_empty() {
                *sequence += 1;
            }
            let ids = changed.iter().map(|d| d.id().to_string()).collect();
            (state.mutation_result(ids), changed)
        };

        self.after_local_change(&update.collection, changed);
        Ok(result)
    }

    /// Apply documents received from a peer. Only subscribed documents with a
    /// newer revision than the local copy are kept.
    fn apply_remote(&self, from: &str, collection: &str, documents: Vec<Document>) {
        let applied = {
            let mut state = self.write();
            let mut applied = 0usize;
            for document in documents {
                if !self.subscriptions.wants(collection, &document) {
                    continue;
                }
                state.counter = state.counter.max(document.revision.counter);
                let target = state.collections.entry(collection.to_string()).or_default();
                if let Some(existing) = target.get(document.id()) {
                    if existing.revision >= document.revision {
                        continue;
                    }
                }
                target.insert(document);
                applied += 1;
            }
            if applied > 0 {
                state.sequence += 1;
            }
            applied
        };

        if applied > 0 {
            tracing::debug!(
                from = %from,
                collection = %collection,
                applied,
                "Applied remote documents"
            );
            self.notify(collection);
        }
    }

    fn all_documents(&self) -> Vec<(CollectionName, Vec<Document>)> {
        self.read()
            .collections
            .iter()
            .map(|(name, c)| (name.clone(), c.documents.values().cloned().collect()))
            .collect()
    }

    fn after_local_change(&self, collection: &str, changed: Vec<Document>) {
        if changed.is_empty() {
            return;
        }
        self.notify(collection);

        let hub = {
            let sync = self.lock_sync();
            if sync.active {
                sync.hub.clone()
            } else {
                None
            }
        };
        if let Some(hub) = hub {
            hub.broadcast_except(
                &self.node_id,
                PeerMessage::Documents {
                    from: self.node_id.clone(),
                    collection: collection.to_string(),
                    documents: changed,
                },
            );
        }
    }

    /// Re-run every observer of a collection and deliver the results.
    fn notify(&self, collection: &str) {
        for entry in self.observers.for_collection(collection) {
            let result = self.read().run_select(&entry.query, &entry.args);
            entry.deliver(result);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Leaving the hub ends the worker; it is detached, not joined, since
        // the last reference may be dropped on the worker thread itself.
        let sync = self.lock_sync();
        if let (true, Some(hub)) = (sync.active, sync.hub.as_ref()) {
            hub.unregister(&self.node_id);
        }
    }
}

fn spawn_worker(
    inner: Weak<Inner>,
    hub: Arc<SyncHub>,
    rx: Receiver<PeerMessage>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("cinesync-sync".into())
        .spawn(move || {
            for message in rx {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match message {
                    PeerMessage::Documents {
                        from,
                        collection,
                        documents,
                    } => inner.apply_remote(&from, &collection, documents),
                    PeerMessage::RequestState { from } => {
                        for (collection, documents) in inner.all_documents() {
                            hub.send_to(
                                &from,
                                PeerMessage::Documents {
                                    from: inner.node_id.clone(),
                                    collection,
                                    documents,
                                },
                            );
                        }
                    }
                }
            }
            tracing::debug!("Sync worker stopped");
        })
}

fn parse_select(statement: &str, what: &str) -> Result<Select> {
    match dql::parse(statement)? {
        Statement::Select(select) => Ok(select),
        _ => Err(StoreError::parse(
            0,
            format!("{} require a SELECT statement", what),
        )),
    }
}

fn check_args(statement: &Statement, args: &Args) -> Result<()> {
    match statement.params().into_iter().find(|name| !args.contains_key(*name)) {
        Some(missing) => Err(StoreError::MissingParameter(missing.to_string())),
        None => Ok(()),
    }
}

fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
