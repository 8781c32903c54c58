//! Live movie lists.

use crate::model::Movie;
use cinesync_store::StoreObserver;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One delivery of a live query.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Store change sequence the list reflects
    pub sequence: u64,
    pub movies: Vec<Movie>,
}

/// An open observation of a movie query.
///
/// Yields the full decoded list after every change. Dropping the stream
/// closes the underlying observer.
pub struct MovieStream {
    query: String,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    observer: Option<StoreObserver>,
}

impl MovieStream {
    pub(crate) fn new(
        query: String,
        rx: mpsc::UnboundedReceiver<Snapshot>,
        observer: StoreObserver,
    ) -> Self {
        Self {
            query,
            rx,
            observer: Some(observer),
        }
    }

    /// The observed query.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Next delivery, including its change sequence.
    ///
    /// Returns `None` once the stream is closed and drained.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Close the observer. Deliveries already queued can still be read.
    pub fn close(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.close();
            tracing::debug!(query = %self.query, "Closed movies observer");
        }
    }

    /// Hand the observer handle to the caller, who then decides when the
    /// store stops delivering. The stream keeps yielding what arrives.
    pub(crate) fn detach_observer(&mut self) -> Option<StoreObserver> {
        self.observer.take()
    }

    pub fn is_closed(&self) -> bool {
        self.observer.is_none()
    }
}

impl Stream for MovieStream {
    type Item = Vec<Movie>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .rx
            .poll_recv(cx)
            .map(|snapshot| snapshot.map(|s| s.movies))
    }
}

impl Drop for MovieStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MovieStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovieStream")
            .field("query", &self.query)
            .field("closed", &self.is_closed())
            .finish()
    }
}
