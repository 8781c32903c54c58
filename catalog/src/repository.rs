//! Catalog repository - every interaction with the document store.
//!
//! Store calls may block, so each one runs on tokio's blocking pool. Failures
//! are logged here with the operation and movie id, then returned.

use crate::backend::DocumentStore;
use crate::error::{CatalogError, Result};
use crate::live::{MovieStream, Snapshot};
use crate::model::{Movie, MovieFields};
use crate::query;
use cinesync_store::{Args, ObserverCallback, QueryResult, StoreError, SyncSubscription};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Result of a single mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Documents the statement changed; 0 when the id did not match
    pub affected: usize,
}

/// Result of an insert-if-absent batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub inserted: usize,
    /// Records whose id was already present
    pub skipped_existing: usize,
    /// Position within the batch and the store's reason
    pub failures: Vec<(usize, StoreError)>,
}

/// Data access for the movie collection.
pub struct CatalogRepository<S> {
    store: Arc<S>,
    subscription: Mutex<Option<SyncSubscription>>,
}

impl<S: DocumentStore> CatalogRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            subscription: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Open a live observation of `query`.
    ///
    /// The stream yields the current list right away and a new one after each
    /// change to the collection.
    pub async fn observe(&self, query: &str) -> Result<MovieStream> {
        tracing::debug!(query = %query, "Registering movies observer");

        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ObserverCallback = Box::new(move |result: QueryResult| {
            let movies: Vec<Movie> = result
                .items
                .iter()
                .map(|item| Movie::decode(item.value()))
                .collect();
            tracing::debug!(count = movies.len(), sequence = result.sequence, "Observer received movies");
            // A closed receiver means the stream was dropped
            let _ = tx.send(Snapshot {
                sequence: result.sequence,
                movies,
            });
        });

        let statement = query.to_string();
        let observer = self
            .blocking(move |store| store.register_observer(&statement, Args::new(), callback))
            .await
            .inspect_err(|e| tracing::error!(query = %query, error = %e, "Unable to observe movies"))?;

        Ok(MovieStream::new(query.to_string(), rx, observer))
    }

    /// Fetch one movie, failing with [`CatalogError::NotFound`] if absent.
    pub async fn fetch(&self, id: &str) -> Result<Movie> {
        let args = id_args(id);
        let result = self
            .blocking(move |store| store.execute(query::SELECT_BY_ID, &args))
            .await?;
        result
            .items
            .first()
            .map(|item| Movie::decode(item.value()))
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Fetch one movie. Absence and failures both yield `None`.
    pub async fn get_by_id(&self, id: &str) -> Option<Movie> {
        tracing::debug!(id = %id, "Fetching movie by id");
        match self.fetch(id).await {
            Ok(movie) => {
                tracing::debug!(id = %id, title = %movie.title, year = movie.year, "Found movie");
                Some(movie)
            }
            Err(CatalogError::NotFound(_)) => {
                tracing::warn!(id = %id, "Movie not found");
                None
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Unable to fetch movie by id");
                None
            }
        }
    }

    /// Insert a new movie. Fails if its id already exists.
    pub async fn insert(&self, movie: &Movie) -> Result<MutationOutcome> {
        tracing::debug!(id = %movie.id, title = %movie.title, "Inserting movie");
        let mut args = Args::new();
        args.insert("doc".into(), movie.to_document());
        self.mutate("insert", &movie.id, query::INSERT, args).await
    }

    /// Replace every editable field of a movie.
    pub async fn update(&self, id: &str, fields: &MovieFields) -> Result<MutationOutcome> {
        tracing::debug!(id = %id, title = %fields.title, "Updating movie");
        let mut args = fields.to_args();
        args.insert("id".into(), json!(id));
        self.mutate("update", id, query::UPDATE_FIELDS, args).await
    }

    pub async fn toggle_watched(&self, id: &str, watched: bool) -> Result<MutationOutcome> {
        tracing::debug!(id = %id, watched, "Setting watched flag");
        let mut args = id_args(id);
        args.insert("watched".into(), json!(watched));
        self.mutate("toggle_watched", id, query::SET_WATCHED, args).await
    }

    /// Mark a movie deleted. The document stays in the store.
    pub async fn soft_delete(&self, id: &str) -> Result<MutationOutcome> {
        tracing::debug!(id = %id, "Soft-deleting movie");
        self.mutate("soft_delete", id, query::SOFT_DELETE, id_args(id))
            .await
    }

    /// Insert each document unless its id already exists.
    ///
    /// A failing record does not stop the batch; it is reported in
    /// [`BatchOutcome::failures`].
    pub async fn insert_if_absent(&self, documents: Vec<Value>) -> Result<BatchOutcome> {
        let outcome = self
            .store_task(move |store| {
                let mut outcome = BatchOutcome::default();
                for (index, document) in documents.into_iter().enumerate() {
                    let mut args = Args::new();
                    args.insert("doc".into(), document);
                    match store.execute(query::INSERT_INITIAL, &args) {
                        Ok(result) if result.mutated_document_ids.is_empty() => {
                            outcome.skipped_existing += 1
                        }
                        Ok(_) => outcome.inserted += 1,
                        Err(e) => outcome.failures.push((index, e)),
                    }
                }
                outcome
            })
            .await?;

        tracing::trace!(
            inserted = outcome.inserted,
            skipped = outcome.skipped_existing,
            failed = outcome.failures.len(),
            "Inserted batch"
        );
        Ok(outcome)
    }

    /// Start sync and subscribe to the whole catalog.
    ///
    /// Any earlier subscription is closed first.
    pub async fn start_sync(&self) -> Result<()> {
        tracing::debug!("Starting sync");
        if let Some(previous) = self.lock_subscription().take() {
            previous.close();
        }

        let subscription = self
            .blocking(|store| {
                store.start_sync()?;
                store.register_subscription(query::SYNC_SUBSCRIPTION, Args::new())
            })
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Unable to start sync"))?;

        *self.lock_subscription() = Some(subscription);
        tracing::info!("Sync started and subscription registered");
        Ok(())
    }

    /// Close the subscription and stop sync.
    pub async fn stop_sync(&self) -> Result<()> {
        tracing::debug!("Stopping sync");
        if let Some(subscription) = self.lock_subscription().take() {
            subscription.close();
        }

        self.blocking(|store| store.stop_sync())
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Unable to stop sync"))?;

        tracing::info!("Sync stopped");
        Ok(())
    }

    pub fn is_sync_active(&self) -> bool {
        self.store.is_sync_active()
    }

    async fn mutate(
        &self,
        operation: &'static str,
        id: &str,
        statement: &'static str,
        args: Args,
    ) -> Result<MutationOutcome> {
        match self
            .blocking(move |store| store.execute(statement, &args))
            .await
        {
            Ok(result) => {
                let outcome = MutationOutcome {
                    affected: result.mutated_document_ids.len(),
                };
                if outcome.affected == 0 {
                    tracing::warn!(operation, id = %id, "Mutation matched no movie");
                } else {
                    tracing::debug!(operation, id = %id, "Mutation applied");
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(operation, id = %id, error = %e, "Mutation failed");
                Err(e)
            }
        }
    }

    /// Run a fallible store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&S) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.store_task(f).await??)
    }

    async fn store_task<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await?)
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<SyncSubscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn id_args(id: &str) -> Args {
    let mut args = Args::new();
    args.insert("id".into(), json!(id));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinesync_store::Store;
    use futures::StreamExt;
    use std::time::Duration;

    fn repository() -> CatalogRepository<Store> {
        CatalogRepository::new(Arc::new(Store::new("test-node")))
    }

    fn movie(id: &str, title: &str) -> Movie {
        Movie {
            title: title.into(),
            ..Movie::with_id(id)
        }
    }

    async fn next(stream: &mut MovieStream) -> Vec<Movie> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for delivery")
            .expect("stream ended")
    }

    fn titles(movies: &[Movie]) -> Vec<&str> {
        movies.iter().map(|m| m.title.as_str()).collect()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let repo = repository();
        let outcome = repo.insert(&movie("m-1", "Heat")).await.unwrap();
        assert_eq!(outcome.affected, 1);

        let found = repo.get_by_id("m-1").await.unwrap();
        assert_eq!(found.title, "Heat");
        assert!(repo.get_by_id("missing").await.is_none());
        assert!(matches!(
            repo.fetch("missing").await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_is_returned() {
        let repo = repository();
        repo.insert(&movie("m-1", "Heat")).await.unwrap();
        let err = repo.insert(&movie("m-1", "Heat")).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Store(StoreError::DuplicateId { .. })
        ));
    }

    #[tokio::test]
    async fn mutations_on_missing_id_affect_nothing() {
        let repo = repository();
        assert_eq!(repo.toggle_watched("ghost", true).await.unwrap().affected, 0);
        assert_eq!(repo.soft_delete("ghost").await.unwrap().affected, 0);
    }

    #[tokio::test]
    async fn update_replaces_fields_but_keeps_id() {
        let repo = repository();
        repo.insert(&movie("m-1", "Heat")).await.unwrap();

        let mut fields = repo.get_by_id("m-1").await.unwrap().fields();
        fields.title = "Heat (1995)".into();
        fields.genres = vec!["Crime".into()];
        fields.watched = true;
        assert_eq!(repo.update("m-1", &fields).await.unwrap().affected, 1);

        let updated = repo.get_by_id("m-1").await.unwrap();
        assert_eq!(updated.id, "m-1");
        assert_eq!(updated.fields(), fields);
        assert!(!updated.deleted);
    }

    #[tokio::test]
    async fn observe_follows_changes() {
        let repo = repository();
        repo.insert(&movie("m-1", "Heat")).await.unwrap();

        let mut stream = repo.observe(&query::build_query(false, false)).await.unwrap();
        assert_eq!(titles(&next(&mut stream).await), vec!["Heat"]);

        repo.insert(&movie("m-2", "Alien")).await.unwrap();
        assert_eq!(titles(&next(&mut stream).await), vec!["Alien", "Heat"]);

        repo.soft_delete("m-1").await.unwrap();
        assert_eq!(titles(&next(&mut stream).await), vec!["Alien"]);
    }

    #[tokio::test]
    async fn snapshots_carry_increasing_sequences() {
        let repo = repository();
        let mut stream = repo.observe(&query::build_query(false, false)).await.unwrap();
        let first = stream.next_snapshot().await.unwrap();
        repo.insert(&movie("m-1", "Heat")).await.unwrap();
        let second = stream.next_snapshot().await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(second.movies.len(), 1);
    }

    #[tokio::test]
    async fn dropping_stream_closes_observer() {
        let repo = repository();
        let stream = repo.observe(query::SYNC_SUBSCRIPTION).await.unwrap();
        assert_eq!(repo.store().observer_count(), 1);
        drop(stream);
        assert_eq!(repo.store().observer_count(), 0);
    }

    #[tokio::test]
    async fn closed_stream_ends_after_queued_items() {
        let repo = repository();
        let mut stream = repo.observe(query::SYNC_SUBSCRIPTION).await.unwrap();
        stream.close();
        assert!(stream.is_closed());
        repo.insert(&movie("m-1", "Heat")).await.unwrap();

        // Only the initial delivery was queued before closing
        assert!(next(&mut stream).await.is_empty());
        let end = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn invalid_query_is_an_error() {
        let repo = repository();
        assert!(matches!(
            repo.observe("SELECT FROM").await,
            Err(CatalogError::Store(StoreError::Parse { .. }))
        ));
    }

    #[tokio::test]
    async fn insert_if_absent_counts() {
        let repo = repository();
        repo.insert(&movie("m-1", "Heat")).await.unwrap();

        let outcome = repo
            .insert_if_absent(vec![
                movie("m-1", "Heat").to_document(),
                movie("m-2", "Alien").to_document(),
                json!({"_id": 42}),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped_existing, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 2);
    }

    #[tokio::test]
    async fn sync_lifecycle() {
        let repo = repository();
        assert!(!repo.is_sync_active());

        repo.start_sync().await.unwrap();
        assert!(repo.is_sync_active());
        assert_eq!(repo.store().subscription_count(), 1);

        // Restarting replaces the subscription instead of adding one
        repo.start_sync().await.unwrap();
        assert_eq!(repo.store().subscription_count(), 1);

        repo.stop_sync().await.unwrap();
        assert!(!repo.is_sync_active());
        assert_eq!(repo.store().subscription_count(), 0);
    }
}
