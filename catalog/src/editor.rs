//! Create and edit forms for a single movie.
//!
//! Form fields are plain text as typed by the user. Numbers that do not
//! parse are stored as 0 (unknown); list fields are comma separated.

use crate::backend::DocumentStore;
use crate::error::{CatalogError, Result};
use crate::model::{new_movie_id, Movie, MovieFields};
use crate::repository::{CatalogRepository, MutationOutcome};
use std::sync::Arc;

/// Text state of the edit form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieForm {
    pub title: String,
    pub year: String,
    pub plot: String,
    pub genres: String,
    pub rated: String,
    pub runtime: String,
    pub poster: String,
    pub directors: String,
    pub cast: String,
    pub imdb_rating: String,
    pub watched: bool,
}

impl MovieForm {
    /// Fill the form from a stored movie. Unknown numbers show as blank.
    pub fn from_movie(movie: &Movie) -> Self {
        Self {
            title: movie.title.clone(),
            year: blank_if_zero(movie.year),
            plot: movie.plot.clone(),
            genres: movie.genres.join(", "),
            rated: movie.rated.clone(),
            runtime: blank_if_zero(movie.runtime),
            poster: movie.poster.clone(),
            directors: movie.directors.join(", "),
            cast: movie.cast.join(", "),
            imdb_rating: if movie.imdb_rating > 0.0 {
                movie.imdb_rating.to_string()
            } else {
                String::new()
            },
            watched: movie.watched,
        }
    }

    /// Convert the typed text into movie fields.
    pub fn to_fields(&self) -> MovieFields {
        MovieFields {
            title: self.title.clone(),
            year: self.year.trim().parse().unwrap_or(0),
            plot: self.plot.clone(),
            genres: split_list(&self.genres),
            rated: self.rated.clone(),
            runtime: self.runtime.trim().parse().unwrap_or(0),
            poster: self.poster.clone(),
            directors: split_list(&self.directors),
            cast: split_list(&self.cast),
            imdb_rating: self
                .imdb_rating
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .unwrap_or(0.0),
            watched: self.watched,
        }
    }
}

fn blank_if_zero(n: u32) -> String {
    if n > 0 {
        n.to_string()
    } else {
        String::new()
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Editing session for one movie, or for a new one.
pub struct MovieEditor<S> {
    repository: Arc<CatalogRepository<S>>,
    /// Id of the stored movie being edited; `None` creates a new movie on save
    id: Option<String>,
    form: MovieForm,
    can_delete: bool,
    loaded: bool,
}

impl<S: DocumentStore> MovieEditor<S> {
    pub fn new(repository: Arc<CatalogRepository<S>>) -> Self {
        Self {
            repository,
            id: None,
            form: MovieForm::default(),
            can_delete: false,
            loaded: false,
        }
    }

    /// Load the movie to edit, or prepare a blank form when `id` is `None`.
    ///
    /// Only the first call has an effect. Returns whether a stored movie was
    /// loaded.
    pub async fn load(&mut self, id: Option<&str>) -> bool {
        if self.loaded {
            return self.id.is_some();
        }
        self.loaded = true;
        self.can_delete = id.is_some();

        let Some(id) = id else {
            tracing::debug!("Setting up for new movie");
            return false;
        };

        match self.repository.get_by_id(id).await {
            Some(movie) => {
                tracing::debug!(id = %movie.id, title = %movie.title, "Loaded movie for editing");
                self.form = MovieForm::from_movie(&movie);
                self.id = Some(movie.id);
                true
            }
            None => false,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn can_delete(&self) -> bool {
        self.can_delete
    }

    pub fn form(&self) -> &MovieForm {
        &self.form
    }

    /// Apply a change to the form.
    pub fn update(&mut self, f: impl FnOnce(&mut MovieForm)) {
        f(&mut self.form);
    }

    /// Save the form, inserting a new movie or updating the loaded one.
    ///
    /// Returns the id of the saved movie.
    pub async fn save(&mut self) -> Result<String> {
        let fields = self.form.to_fields();
        let id = save_movie(&self.repository, self.id.as_deref(), fields).await?;
        self.id = Some(id.clone());
        self.can_delete = true;
        Ok(id)
    }

    /// Soft-delete the loaded movie. Does nothing for an unsaved movie.
    pub async fn delete(&self) -> Result<MutationOutcome> {
        match &self.id {
            Some(id) => {
                tracing::debug!(id = %id, "Deleting movie");
                self.repository.soft_delete(id).await
            }
            None => Ok(MutationOutcome::default()),
        }
    }
}

/// Insert `fields` as a new movie with a fresh id, or update `id`.
///
/// Updating an id that matches no document fails with
/// [`CatalogError::NotFound`].
pub(crate) async fn save_movie<S: DocumentStore>(
    repository: &CatalogRepository<S>,
    id: Option<&str>,
    fields: MovieFields,
) -> Result<String> {
    match id {
        Some(id) => {
            tracing::debug!(id = %id, title = %fields.title, "Updating existing movie");
            let outcome = repository.update(id, &fields).await?;
            if outcome.affected == 0 {
                tracing::warn!(id = %id, "No movie to update");
                return Err(CatalogError::NotFound(id.to_string()));
            }
            Ok(id.to_string())
        }
        None => {
            let movie = Movie::from_fields(new_movie_id(), fields);
            tracing::debug!(id = %movie.id, title = %movie.title, "Saving new movie");
            repository.insert(&movie).await?;
            Ok(movie.id)
        }
    }
}
