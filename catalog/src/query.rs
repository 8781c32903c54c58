//! Statements issued against the movie collection.
//!
//! The list query is derived from the two filter flags; everything else is a
//! fixed, parameterized statement.

use serde::{Deserialize, Serialize};

/// Look up one movie. Binds `:id`.
pub const SELECT_BY_ID: &str = "SELECT * FROM movies WHERE _id = :id";

/// Insert one movie. Binds `:doc`.
pub const INSERT: &str = "INSERT INTO movies DOCUMENTS (:doc)";

/// Insert one movie unless its id already exists. Binds `:doc`.
pub const INSERT_INITIAL: &str = "INSERT INTO movies INITIAL DOCUMENTS (:doc)";

/// Replace every editable field. Binds `:id` and the field names.
pub const UPDATE_FIELDS: &str = "UPDATE movies SET title = :title, year = :year, plot = :plot, \
     genres = :genres, rated = :rated, runtime = :runtime, poster = :poster, \
     directors = :directors, cast = :cast, imdbRating = :imdbRating, watched = :watched \
     WHERE _id = :id";

/// Set the watched flag. Binds `:id` and `:watched`.
pub const SET_WATCHED: &str = "UPDATE movies SET watched = :watched WHERE _id = :id";

/// Soft-delete one movie. Binds `:id`.
pub const SOFT_DELETE: &str = "UPDATE movies SET deleted = true WHERE _id = :id";

/// Replication subscription covering the whole catalog.
pub const SYNC_SUBSCRIPTION: &str = "SELECT * FROM movies";

/// Which movies the list shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogFilter {
    /// Only watched movies
    pub show_watched: bool,
    /// Only soft-deleted movies instead of live ones
    pub show_deleted: bool,
}

impl CatalogFilter {
    pub fn new(show_watched: bool, show_deleted: bool) -> Self {
        Self {
            show_watched,
            show_deleted,
        }
    }

    /// The list query for this filter.
    pub fn query(&self) -> String {
        build_query(self.show_watched, self.show_deleted)
    }
}

/// Build the list query for the given flags.
///
/// Deleted and live movies are mutually exclusive views. Results are always
/// ordered by title.
pub fn build_query(show_watched: bool, show_deleted: bool) -> String {
    let mut clauses = Vec::with_capacity(2);
    if show_watched {
        clauses.push("watched = true");
    }
    clauses.push(if show_deleted {
        "deleted = true"
    } else {
        "NOT deleted"
    });
    format!(
        "SELECT * FROM movies WHERE {} ORDER BY title ASC",
        clauses.join(" AND ")
    )
}
