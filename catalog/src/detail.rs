//! Single movie view with quick actions.

use crate::backend::DocumentStore;
use crate::error::{CatalogError, Result};
use crate::model::Movie;
use crate::repository::{CatalogRepository, MutationOutcome};
use std::sync::Arc;

/// Detail state for a single movie.
pub struct MovieDetail<S> {
    repository: Arc<CatalogRepository<S>>,
    movie: Option<Movie>,
    loaded: bool,
}

impl<S: DocumentStore> MovieDetail<S> {
    pub fn new(repository: Arc<CatalogRepository<S>>) -> Self {
        Self {
            repository,
            movie: None,
            loaded: false,
        }
    }

    /// Load the movie. Only the first call reads the store.
    pub async fn load(&mut self, id: &str) -> Option<&Movie> {
        if !self.loaded {
            self.loaded = true;
            tracing::debug!(id = %id, "Loading movie detail");
            self.movie = self.repository.get_by_id(id).await;
            match &self.movie {
                Some(movie) => tracing::debug!(title = %movie.title, "Movie detail loaded"),
                None => tracing::warn!(id = %id, "Movie not found for detail"),
            }
        }
        self.movie.as_ref()
    }

    pub fn movie(&self) -> Option<&Movie> {
        self.movie.as_ref()
    }

    /// Flip the watched flag locally, then persist it.
    ///
    /// The local flag is restored if the store rejects the change.
    pub async fn toggle_watched(&mut self) -> Result<MutationOutcome> {
        let Some(movie) = self.movie.as_mut() else {
            return Ok(MutationOutcome::default());
        };
        movie.watched = !movie.watched;
        let (id, watched) = (movie.id.clone(), movie.watched);
        tracing::debug!(id = %id, watched, "Toggling watched from detail");

        let result = self.repository.toggle_watched(&id, watched).await;
        if result.is_err() {
            if let Some(movie) = self.movie.as_mut() {
                movie.watched = !watched;
            }
        }
        result
    }

    /// Soft-delete the shown movie.
    pub async fn delete(&self) -> Result<MutationOutcome> {
        let movie = self
            .movie
            .as_ref()
            .ok_or_else(|| CatalogError::NotFound("no movie loaded".into()))?;
        tracing::debug!(id = %movie.id, title = %movie.title, "Deleting movie from detail");
        self.repository.soft_delete(&movie.id).await
    }
}
