//! In-process peer replication.
//!
//! A [`SyncHub`] connects stores that run in the same process. While sync is
//! active, a store publishes every local change to the hub, which forwards it
//! to the other registered peers. Each peer keeps only documents matching one
//! of its open [`SyncSubscription`]s, and only when the incoming revision is
//! newer than its own copy.

use crate::dql::{Args, Select};
use crate::{CollectionName, Document, NodeId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

/// Message exchanged between peers.
#[derive(Debug, Clone)]
pub enum PeerMessage {
    /// Document states from another peer
    Documents {
        from: NodeId,
        collection: CollectionName,
        documents: Vec<Document>,
    },
    /// A peer asks for everything the receiver holds
    RequestState { from: NodeId },
}

/// Routes messages between the stores of one process.
///
/// Thread-safe and shared via `Arc`.
#[derive(Debug, Default)]
pub struct SyncHub {
    peers: DashMap<NodeId, Sender<PeerMessage>>,
}

impl SyncHub {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a peer. Replaces an earlier registration with the same id.
    pub fn register(&self, node_id: NodeId, sender: Sender<PeerMessage>) {
        tracing::info!(node_id = %node_id, "Peer joined sync hub");
        self.peers.insert(node_id, sender);
    }

    /// Remove a peer, dropping its sender.
    pub fn unregister(&self, node_id: &str) {
        if self.peers.remove(node_id).is_some() {
            tracing::info!(node_id = %node_id, "Peer left sync hub");
        }
    }

    /// Send a message to every peer except `sender`.
    ///
    /// Returns the number of peers that received the message.
    pub fn broadcast_except(&self, sender: &str, message: PeerMessage) -> usize {
        let mut sent_count = 0;
        for entry in self.peers.iter() {
            if entry.key() != sender && entry.value().send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::trace!(sender = %sender, recipients = sent_count, "Broadcast to peers");
        sent_count
    }

    /// Send a message to one peer.
    pub fn send_to(&self, node_id: &str, message: PeerMessage) -> bool {
        self.peers
            .get(node_id)
            .map(|peer| peer.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// A query describing documents this peer wants to receive.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub query: Select,
    pub args: Args,
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: DashMap<u64, Subscription>,
}

impl SubscriptionRegistry {
    pub fn register(self: &Arc<Self>, subscription: Subscription) -> SyncSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            subscription_id = id,
            collection = %subscription.query.collection,
            "Sync subscription registered"
        );
        self.entries.insert(id, subscription);
        SyncSubscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Whether any open subscription wants this document.
    pub fn wants(&self, collection: &str, doc: &Document) -> bool {
        self.entries.iter().any(|entry| {
            let s = entry.value();
            s.query.collection == collection
                && s.query
                    .filter
                    .as_ref()
                    .map(|f| f.matches(doc, &s.args))
                    .unwrap_or(true)
        })
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }
}

/// Handle to a sync subscription. Closing or dropping it stops replication
/// of documents that only it matched.
#[derive(Debug)]
pub struct SyncSubscription {
    id: u64,
    registry: Weak<SubscriptionRegistry>,
}

impl SyncSubscription {
    pub fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                tracing::debug!(subscription_id = self.id, "Sync subscription closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| !r.entries.contains_key(&self.id))
            .unwrap_or(true)
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dql::{parse, Statement};
    use crate::Revision;
    use serde_json::json;
    use std::sync::mpsc;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value, Revision::new("n", 1), 0).unwrap()
    }

    fn subscription(stmt: &str) -> Subscription {
        match parse(stmt).unwrap() {
            Statement::Select(query) => Subscription {
                query,
                args: Args::new(),
            },
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn register_unregister() {
        let hub = SyncHub::new();
        let (tx, _rx) = mpsc::channel();
        hub.register("node-1".into(), tx);
        assert_eq!(hub.peer_count(), 1);
        hub.unregister("node-1");
        assert_eq!(hub.peer_count(), 0);
    }

    #[test]
    fn broadcast_skips_sender() {
        let hub = SyncHub::new();
        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();
        hub.register("node-1".into(), tx1);
        hub.register("node-2".into(), tx2);

        let sent = hub.broadcast_except(
            "node-1",
            PeerMessage::RequestState {
                from: "node-1".into(),
            },
        );
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(
            rx2.try_recv(),
            Ok(PeerMessage::RequestState { from }) if from == "node-1"
        ));
    }

    #[test]
    fn send_to_unknown_peer() {
        let hub = SyncHub::new();
        assert!(!hub.send_to(
            "ghost",
            PeerMessage::RequestState {
                from: "node-1".into()
            }
        ));
    }

    #[test]
    fn subscriptions_filter_documents() {
        let registry = Arc::new(SubscriptionRegistry::default());
        let watched = doc(json!({"_id": "1", "watched": true}));
        let unwatched = doc(json!({"_id": "2"}));

        assert!(!registry.wants("movies", &watched));

        let handle = registry.register(subscription("SELECT * FROM movies WHERE watched = true"));
        assert!(registry.wants("movies", &watched));
        assert!(!registry.wants("movies", &unwatched));
        assert!(!registry.wants("people", &watched));

        handle.close();
        assert!(handle.is_closed());
        assert!(!registry.wants("movies", &watched));
    }

    #[test]
    fn dropping_subscription_closes_it() {
        let registry = Arc::new(SubscriptionRegistry::default());
        let handle = registry.register(subscription("SELECT * FROM movies"));
        assert_eq!(registry.count(), 1);
        drop(handle);
        assert_eq!(registry.count(), 0);
    }
}
