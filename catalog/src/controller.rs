//! Filter and sync state for the catalog list.
//!
//! The controller owns which query is live, republishes its results, keeps
//! the persisted sync preference consistent with the store's sync state and
//! runs the first-launch import.
//!
//! State is published through `watch` channels so any number of views can
//! follow it.

use crate::backend::DocumentStore;
use crate::detail::MovieDetail;
use crate::editor::{save_movie, MovieEditor};
use crate::error::Result;
use crate::importer::{BulkImporter, DatasetSource, ImportStats};
use crate::live::MovieStream;
use crate::model::{Movie, MovieFields};
use crate::preferences::{PreferenceStore, DATA_IMPORTED, SYNC_ENABLED};
use crate::query::CatalogFilter;
use crate::repository::{CatalogRepository, MutationOutcome};
use cinesync_store::StoreObserver;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The live observation currently feeding `movies`.
#[derive(Default)]
struct Observation {
    /// Bumped on every filter change; deliveries from older ones are dropped
    generation: u64,
    observer: Option<StoreObserver>,
    task: Option<JoinHandle<()>>,
}

impl Observation {
    /// Close the store observer now and stop forwarding.
    fn release(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.close();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Guarded by the sync critical section.
#[derive(Default)]
struct SyncControl {
    /// Set once the user chose a value; the startup restore then stands down
    user_choice: bool,
}

struct Shared<S, P> {
    repository: Arc<CatalogRepository<S>>,
    preferences: Arc<P>,
    importer: BulkImporter<S>,
    dataset: Arc<dyn DatasetSource>,
    movies: watch::Sender<Vec<Movie>>,
    filter: watch::Sender<CatalogFilter>,
    sync_enabled: watch::Sender<bool>,
    import_completed: watch::Sender<bool>,
    errors: watch::Sender<Option<String>>,
    observation: Mutex<Observation>,
    sync: tokio::sync::Mutex<SyncControl>,
}

impl<S, P> Shared<S, P> {
    fn lock_observation(&self) -> MutexGuard<'_, Observation> {
        self.observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a list if it belongs to the current observation.
    fn publish_movies(&self, generation: u64, movies: Vec<Movie>) -> bool {
        let observation = self.lock_observation();
        if observation.generation != generation {
            tracing::debug!(generation, current = observation.generation, "Discarding stale movie list");
            return false;
        }
        tracing::debug!(count = movies.len(), "Received movies from observer");
        self.movies.send_replace(movies);
        true
    }

    fn report<T>(&self, context: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!(error = %e, "{} failed", context);
            self.errors.send_replace(Some(format!("{}: {}", context, e)));
        }
        result
    }
}

impl<S, P> Drop for Shared<S, P> {
    fn drop(&mut self) {
        self.lock_observation().release();
    }
}

/// Orchestrates the catalog list, its filter and peer sync.
pub struct CatalogController<S, P> {
    shared: Arc<Shared<S, P>>,
}

impl<S, P> Clone for CatalogController<S, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DocumentStore, P: PreferenceStore> CatalogController<S, P> {
    pub fn new(
        repository: Arc<CatalogRepository<S>>,
        preferences: Arc<P>,
        importer: BulkImporter<S>,
        dataset: Arc<dyn DatasetSource>,
    ) -> Self {
        let (movies, _) = watch::channel(Vec::new());
        let (filter, _) = watch::channel(CatalogFilter::default());
        let (sync_enabled, _) = watch::channel(true);
        let (import_completed, _) = watch::channel(false);
        let (errors, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                repository,
                preferences,
                importer,
                dataset,
                movies,
                filter,
                sync_enabled,
                import_completed,
                errors,
                observation: Mutex::new(Observation::default()),
                sync: tokio::sync::Mutex::new(SyncControl::default()),
            }),
        }
    }

    pub fn repository(&self) -> &Arc<CatalogRepository<S>> {
        &self.shared.repository
    }

    /// The list for the current filter.
    pub fn movies(&self) -> watch::Receiver<Vec<Movie>> {
        self.shared.movies.subscribe()
    }

    pub fn filter(&self) -> watch::Receiver<CatalogFilter> {
        self.shared.filter.subscribe()
    }

    pub fn sync_enabled(&self) -> watch::Receiver<bool> {
        self.shared.sync_enabled.subscribe()
    }

    pub fn import_completed(&self) -> watch::Receiver<bool> {
        self.shared.import_completed.subscribe()
    }

    /// The last failure worth showing to the user.
    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.shared.errors.subscribe()
    }

    /// Open the list observation, then run the first-launch import and the
    /// sync restore side by side.
    ///
    /// Fails only if the observation cannot be opened. Import and sync
    /// failures are logged and published on [`errors`](Self::errors).
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Catalog controller starting");
        self.restart_observation(|_| {}).await?;

        let (import, sync) = tokio::join!(self.run_first_import(), self.restore_sync());
        let _ = self.shared.report("First launch import", import);
        let _ = self.shared.report("Restoring sync", sync);

        tracing::info!("Catalog controller started");
        Ok(())
    }

    pub async fn set_show_watched(&self, enabled: bool) -> Result<()> {
        tracing::debug!(enabled, "Filter: show watched");
        self.restart_observation(|f| f.show_watched = enabled).await
    }

    pub async fn set_show_deleted(&self, enabled: bool) -> Result<()> {
        tracing::debug!(enabled, "Filter: show deleted");
        self.restart_observation(|f| f.show_deleted = enabled).await
    }

    /// Persist the sync preference and bring the store's sync in line.
    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        tracing::debug!(enabled, "Set sync enabled");
        let mut control = self.shared.sync.lock().await;
        control.user_choice = true;

        let persisted = self
            .shared
            .preferences
            .edit(move |p| p.set(SYNC_ENABLED, enabled))
            .await;
        self.shared.report("Saving sync preference", persisted)?;

        let result = self.apply_sync(enabled).await;
        self.shared.report("Changing sync", result)
    }

    pub async fn toggle_watched(&self, id: &str, watched: bool) -> Result<MutationOutcome> {
        tracing::debug!(id = %id, watched, "Toggling watched");
        let result = self.shared.repository.toggle_watched(id, watched).await;
        self.shared.report("Updating watched", result)
    }

    pub async fn delete(&self, id: &str) -> Result<MutationOutcome> {
        tracing::debug!(id = %id, "User requested delete");
        let result = self.shared.repository.soft_delete(id).await;
        self.shared.report("Deleting movie", result)
    }

    pub async fn get_movie(&self, id: &str) -> Option<Movie> {
        self.shared.repository.get_by_id(id).await
    }

    /// Save a new movie (`id` is `None`) or update an existing one.
    ///
    /// Returns the id of the saved movie.
    pub async fn save(&self, id: Option<&str>, fields: MovieFields) -> Result<String> {
        let result = save_movie(&self.shared.repository, id, fields).await;
        self.shared.report("Saving movie", result)
    }

    /// A new edit session backed by this catalog.
    pub fn editor(&self) -> MovieEditor<S> {
        MovieEditor::new(Arc::clone(&self.shared.repository))
    }

    pub fn detail(&self) -> MovieDetail<S> {
        MovieDetail::new(Arc::clone(&self.shared.repository))
    }

    /// Apply `change` to the filter and replace the live observation with
    /// one for the result.
    ///
    /// The previous store observer is closed before the new one is opened.
    async fn restart_observation(&self, change: impl FnOnce(&mut CatalogFilter)) -> Result<()> {
        let (filter, generation) = {
            let mut observation = self.shared.lock_observation();
            self.shared.filter.send_if_modified(|f| {
                let before = *f;
                change(f);
                *f != before
            });
            let filter = *self.shared.filter.borrow();
            observation.generation += 1;
            observation.release();
            (filter, observation.generation)
        };

        tracing::debug!(
            show_watched = filter.show_watched,
            show_deleted = filter.show_deleted,
            generation,
            "Starting observer"
        );
        let stream = self.shared.repository.observe(&filter.query()).await;
        let mut stream = self.shared.report("Loading movies", stream)?;
        let observer = stream.detach_observer();

        let mut observation = self.shared.lock_observation();
        if observation.generation == generation {
            observation.observer = observer;
            observation.task = Some(tokio::spawn(forward_movies(
                Arc::downgrade(&self.shared),
                generation,
                stream,
            )));
        } else if let Some(observer) = observer {
            // A newer filter change won the race
            observer.close();
        }
        Ok(())
    }

    async fn run_first_import(&self) -> Result<Option<ImportStats>> {
        let preferences = self.shared.preferences.read_all().await?;
        if preferences.data_imported() {
            tracing::debug!("Movies already imported, skipping");
            self.shared.import_completed.send_replace(true);
            return Ok(None);
        }

        tracing::info!("First launch detected, importing movies from assets");
        let stats = self
            .shared
            .importer
            .import_from(self.shared.dataset.as_ref())
            .await?;

        self.shared
            .preferences
            .edit(|p| p.set(DATA_IMPORTED, true))
            .await?;
        self.shared.import_completed.send_replace(true);
        tracing::info!(
            imported = stats.imported,
            failed = stats.failed,
            skipped_existing = stats.skipped_existing,
            "Import flag saved to preferences"
        );
        Ok(Some(stats))
    }

    /// Apply the persisted sync preference unless the user already chose.
    async fn restore_sync(&self) -> Result<()> {
        let control = self.shared.sync.lock().await;
        if control.user_choice {
            tracing::debug!("Sync preference already set by user, skipping restore");
            return Ok(());
        }

        let enabled = self.shared.preferences.read_all().await?.sync_enabled();
        tracing::info!(enabled, "Restoring sync preference");
        let result = self.apply_sync(enabled).await;
        drop(control);
        result
    }

    /// Must run inside the sync critical section.
    async fn apply_sync(&self, enabled: bool) -> Result<()> {
        self.shared.sync_enabled.send_replace(enabled);
        let active = self.shared.repository.is_sync_active();
        match (enabled, active) {
            (true, false) => {
                tracing::debug!("Enabling sync");
                self.shared.repository.start_sync().await
            }
            (false, true) => {
                tracing::debug!("Disabling sync");
                self.shared.repository.stop_sync().await
            }
            _ => {
                tracing::debug!(enabled, "Sync already in requested state");
                Ok(())
            }
        }
    }
}

async fn forward_movies<S, P>(shared: Weak<Shared<S, P>>, generation: u64, mut stream: MovieStream) {
    while let Some(movies) = stream.next().await {
        let Some(strong) = shared.upgrade() else {
            break;
        };
        if !strong.publish_movies(generation, movies) {
            break;
        }
    }
    tracing::debug!(generation, query = %stream.query(), "Movie observation ended");
}
