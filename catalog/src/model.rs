//! Movie document model.
//!
//! Documents written by older clients or imported from dumps do not always
//! agree on field shapes, so decoding is tolerant: every field falls back to
//! its default instead of failing the whole record.

use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Collection holding the catalog.
pub const COLLECTION: &str = "movies";

/// Identifier as found in stored or imported records.
///
/// Variants are tried in order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Plain(String),
    Wrapped {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl RawId {
    /// The identifier, if it is usable (non-empty).
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            RawId::Plain(id) => id,
            RawId::Wrapped { oid } => oid,
        };
        (!id.trim().is_empty()).then_some(id)
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    /// Stored as `_id`; never changes after creation
    pub id: String,
    pub title: String,
    /// Release year, 0 when unknown
    pub year: u32,
    pub plot: String,
    pub genres: Vec<String>,
    /// Content rating such as "PG-13"
    pub rated: String,
    /// Minutes, 0 when unknown
    pub runtime: u32,
    pub poster: String,
    pub directors: Vec<String>,
    pub cast: Vec<String>,
    /// 0 when unknown
    pub imdb_rating: f64,
    pub watched: bool,
    /// Soft-delete marker
    pub deleted: bool,
}

impl Default for Movie {
    fn default() -> Self {
        Self::with_id(new_movie_id())
    }
}

/// Generate an identifier for a new movie.
pub fn new_movie_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Movie {
    /// An empty movie with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            year: 0,
            plot: String::new(),
            genres: Vec::new(),
            rated: String::new(),
            runtime: 0,
            poster: String::new(),
            directors: Vec::new(),
            cast: Vec::new(),
            imdb_rating: 0.0,
            watched: false,
            deleted: false,
        }
    }

    /// Build a movie from editable fields. The result is never deleted.
    pub fn from_fields(id: impl Into<String>, fields: MovieFields) -> Self {
        Self {
            id: id.into(),
            title: fields.title,
            year: fields.year,
            plot: fields.plot,
            genres: fields.genres,
            rated: fields.rated,
            runtime: fields.runtime,
            poster: fields.poster,
            directors: fields.directors,
            cast: fields.cast,
            imdb_rating: fields.imdb_rating,
            watched: fields.watched,
            deleted: false,
        }
    }

    /// Decode a stored document. Never fails: anything that is not an object
    /// yields a default movie and a logged warning.
    pub fn decode(value: &Value) -> Self {
        match Self::try_decode(value) {
            Ok(movie) => movie,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to decode movie, using defaults");
                Self::default()
            }
        }
    }

    /// Decode a document, failing only if it is not an object.
    pub fn try_decode(value: &Value) -> Result<Self, DecodeError> {
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::NotAnObject(kind_of(value)))?;

        let id = object
            .get("_id")
            .and_then(|raw| RawId::deserialize(raw).ok())
            .and_then(RawId::into_id)
            .unwrap_or_else(new_movie_id);

        let imdb_rating = object
            .get("imdbRating")
            .and_then(Value::as_f64)
            .or_else(|| value.pointer("/imdb/rating").and_then(Value::as_f64))
            .unwrap_or(0.0);

        let movie = Self {
            id,
            title: string_field(object, "title"),
            year: count_field(object, "year"),
            plot: string_field(object, "plot"),
            genres: list_field(object, "genres"),
            rated: string_field(object, "rated"),
            runtime: count_field(object, "runtime"),
            poster: string_field(object, "poster"),
            directors: list_field(object, "directors"),
            cast: list_field(object, "cast"),
            imdb_rating,
            watched: bool_field(object, "watched"),
            deleted: bool_field(object, "deleted"),
        };
        tracing::trace!(title = %movie.title, year = movie.year, "Decoded movie");
        Ok(movie)
    }

    /// Decode the canonical JSON text of a document.
    pub fn decode_json(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::decode(&value),
            Err(e) => {
                let error = DecodeError::Json(e.to_string());
                tracing::warn!(error = %error, "Unable to decode movie, using defaults");
                Self::default()
            }
        }
    }

    /// Encode every field, including `_id`.
    pub fn to_document(&self) -> Value {
        json!({
            "_id": self.id,
            "title": self.title,
            "year": self.year,
            "plot": self.plot,
            "genres": self.genres,
            "rated": self.rated,
            "runtime": self.runtime,
            "poster": self.poster,
            "directors": self.directors,
            "cast": self.cast,
            "imdbRating": self.imdb_rating,
            "watched": self.watched,
            "deleted": self.deleted,
        })
    }

    /// The editable fields of this movie.
    pub fn fields(&self) -> MovieFields {
        MovieFields {
            title: self.title.clone(),
            year: self.year,
            plot: self.plot.clone(),
            genres: self.genres.clone(),
            rated: self.rated.clone(),
            runtime: self.runtime,
            poster: self.poster.clone(),
            directors: self.directors.clone(),
            cast: self.cast.clone(),
            imdb_rating: self.imdb_rating,
            watched: self.watched,
        }
    }
}

/// Fields a full update may change. Excludes `_id` and the soft-delete marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieFields {
    pub title: String,
    pub year: u32,
    pub plot: String,
    pub genres: Vec<String>,
    pub rated: String,
    pub runtime: u32,
    pub poster: String,
    pub directors: Vec<String>,
    pub cast: Vec<String>,
    pub imdb_rating: f64,
    pub watched: bool,
}

impl MovieFields {
    /// Statement arguments named after the stored fields.
    pub fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("title".into(), json!(self.title));
        args.insert("year".into(), json!(self.year));
        args.insert("plot".into(), json!(self.plot));
        args.insert("genres".into(), json!(self.genres));
        args.insert("rated".into(), json!(self.rated));
        args.insert("runtime".into(), json!(self.runtime));
        args.insert("poster".into(), json!(self.poster));
        args.insert("directors".into(), json!(self.directors));
        args.insert("cast".into(), json!(self.cast));
        args.insert("imdbRating".into(), json!(self.imdb_rating));
        args.insert("watched".into(), json!(self.watched));
        args
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Non-negative integer field. Accepts integral floats; clamps negatives to 0.
fn count_field(object: &Map<String, Value>, key: &str) -> u32 {
    let Some(number) = object.get(key).filter(|v| v.is_number()) else {
        return 0;
    };
    if let Some(n) = number.as_u64() {
        return u32::try_from(n).unwrap_or(u32::MAX);
    }
    if number.as_i64().is_some() {
        return 0;
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f > 0.0 => f.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full_movie() -> Movie {
        Movie {
            id: "m-1".into(),
            title: "Arrival".into(),
            year: 2016,
            plot: "Linguist meets heptapods.".into(),
            genres: vec!["Drama".into(), "Sci-Fi".into()],
            rated: "PG-13".into(),
            runtime: 116,
            poster: "https://example.com/arrival.jpg".into(),
            directors: vec!["Denis Villeneuve".into()],
            cast: vec!["Amy Adams".into(), "Jeremy Renner".into()],
            imdb_rating: 7.9,
            watched: true,
            deleted: false,
        }
    }

    #[test]
    fn document_roundtrip() {
        let movie = full_movie();
        assert_eq!(Movie::decode(&movie.to_document()), movie);
        assert_eq!(Movie::decode_json(&movie.to_document().to_string()), movie);
    }

    #[test]
    fn raw_id_shapes() {
        let plain: RawId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(plain.into_id(), Some("abc".to_string()));

        let wrapped: RawId = serde_json::from_value(json!({"$oid": "573a1390"})).unwrap();
        assert_eq!(wrapped.into_id(), Some("573a1390".to_string()));

        let empty: RawId = serde_json::from_value(json!("")).unwrap();
        assert_eq!(empty.into_id(), None);

        assert!(serde_json::from_value::<RawId>(json!(42)).is_err());
    }

    #[test]
    fn decodes_legacy_shapes() {
        let movie = Movie::decode(&json!({
            "_id": {"$oid": "573a1390f29313caabcd4135"},
            "title": "Blacksmith Scene",
            "year": 1893.0,
            "runtime": -5,
            "genres": ["Short", 3, null],
            "cast": "Charles Kayser",
            "imdb": {"rating": 6.2, "votes": 1189}
        }));
        assert_eq!(movie.id, "573a1390f29313caabcd4135");
        assert_eq!(movie.year, 1893);
        assert_eq!(movie.runtime, 0);
        assert_eq!(movie.genres, vec!["Short"]);
        assert!(movie.cast.is_empty());
        assert_eq!(movie.imdb_rating, 6.2);
        assert!(!movie.watched);
        assert!(!movie.deleted);
    }

    #[test]
    fn top_level_rating_wins_over_nested() {
        let movie = Movie::decode(&json!({"imdbRating": 8.0, "imdb": {"rating": 5.0}}));
        assert_eq!(movie.imdb_rating, 8.0);
    }

    #[test]
    fn mismatched_types_fall_back_to_defaults() {
        let movie = Movie::decode(&json!({
            "_id": "m-2",
            "title": 12,
            "year": "1999",
            "watched": "yes",
            "imdbRating": "high"
        }));
        assert_eq!(movie.id, "m-2");
        assert_eq!(movie.title, "");
        assert_eq!(movie.year, 0);
        assert!(!movie.watched);
        assert_eq!(movie.imdb_rating, 0.0);
    }

    #[test]
    fn missing_id_gets_fresh_one() {
        let a = Movie::decode(&json!({"title": "A"}));
        let b = Movie::decode(&json!({"title": "B"}));
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn non_object_is_contained() {
        assert_eq!(
            Movie::try_decode(&json!([1, 2])),
            Err(DecodeError::NotAnObject("array"))
        );
        let movie = Movie::decode(&json!("text"));
        assert_eq!(movie.title, "");
        assert!(!movie.id.is_empty());

        let movie = Movie::decode_json("{not json");
        assert_eq!(movie.title, "");
    }

    #[test]
    fn fields_to_args_cover_update_parameters() {
        let args = full_movie().fields().to_args();
        for key in [
            "title", "year", "plot", "genres", "rated", "runtime", "poster", "directors", "cast",
            "imdbRating", "watched",
        ] {
            assert!(args.contains_key(key), "missing {}", key);
        }
        assert!(!args.contains_key("_id"));
        assert!(!args.contains_key("deleted"));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
            "[a-z$]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::hash_map(
                    prop_oneof![
                        Just("_id".to_string()),
                        Just("title".to_string()),
                        Just("year".to_string()),
                        Just("genres".to_string()),
                        Just("imdb".to_string()),
                        Just("rating".to_string()),
                        Just("$oid".to_string()),
                        "[a-z]{1,5}"
                    ],
                    inner,
                    0..6
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_decode_is_total(value in arb_json()) {
            let movie = Movie::decode(&value);
            prop_assert!(!movie.id.is_empty());
            let again = Movie::decode(&movie.to_document());
            prop_assert_eq!(again.title, movie.title);
            prop_assert_eq!(again.genres, movie.genres);
        }
    }
}
