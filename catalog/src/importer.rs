//! First-run import of the bundled movie dataset.
//!
//! The dataset is a single JSON array that can hold tens of thousands of
//! records. It is parsed incrementally on the blocking pool, one element in
//! memory at a time, and handed over in batches to the async inserter. Bad
//! records are counted and skipped; they never abort the import.

use crate::backend::DocumentStore;
use crate::error::{CatalogError, ImportRecordError, Result};
use crate::model::Movie;
use crate::repository::CatalogRepository;
use serde::de::{Deserializer, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Records per insert batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Name of the bundled dataset.
pub const DATASET_NAME: &str = "all_movies.json";

/// Batches parsed ahead of the inserter.
const PARSE_AHEAD: usize = 2;

/// Counts from one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub failed: usize,
    /// Records whose id was already in the store
    pub skipped_existing: usize,
}

impl ImportStats {
    /// Records handled so far.
    pub fn processed(&self) -> usize {
        self.imported + self.failed + self.skipped_existing
    }
}

/// Where bundled datasets come from.
pub trait DatasetSource: Send + Sync {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Datasets stored as files in a directory.
#[derive(Debug, Clone)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetSource for AssetDir {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.root.join(name))?;
        Ok(Box::new(file))
    }
}

/// Trait for receiving import progress updates.
pub trait ImportProgress: Send + Sync {
    /// Called after each batch is inserted.
    fn on_batch(&self, stats: &ImportStats);

    /// Called when the import is complete.
    fn on_complete(&self, stats: &ImportStats);
}

/// A no-op progress reporter that discards all updates.
pub struct SilentProgress;

impl ImportProgress for SilentProgress {
    fn on_batch(&self, _stats: &ImportStats) {}
    fn on_complete(&self, _stats: &ImportStats) {}
}

/// A progress reporter that logs every 1000 records.
#[derive(Default)]
pub struct LogProgress {
    reported: AtomicUsize,
}

impl LogProgress {
    const EVERY: usize = 1000;
}

impl ImportProgress for LogProgress {
    fn on_batch(&self, stats: &ImportStats) {
        let bucket = stats.processed() / Self::EVERY;
        if bucket > self.reported.swap(bucket, Ordering::Relaxed) {
            tracing::info!(
                processed = stats.processed(),
                imported = stats.imported,
                failed = stats.failed,
                "Import progress"
            );
        }
    }

    fn on_complete(&self, stats: &ImportStats) {
        tracing::info!(
            imported = stats.imported,
            failed = stats.failed,
            skipped_existing = stats.skipped_existing,
            "Import complete"
        );
    }
}

/// A parsed record, ready to insert, with its position in the dataset.
struct ParsedRecord {
    index: usize,
    document: std::result::Result<(String, Value), ImportRecordError>,
}

/// How the parser finished.
enum ParseEnd {
    Complete(usize),
    /// The stream broke after some records; the rest cannot be recovered
    Truncated { records: usize, error: String },
    /// The input is not a JSON array at all
    NotAnArray(String),
}

/// Streams a dataset into the catalog.
pub struct BulkImporter<S> {
    repository: Arc<CatalogRepository<S>>,
    batch_size: usize,
    progress: Arc<dyn ImportProgress>,
}

impl<S: DocumentStore> BulkImporter<S> {
    pub fn new(repository: Arc<CatalogRepository<S>>) -> Self {
        Self {
            repository,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: Arc::new(LogProgress::default()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: impl ImportProgress + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Import the well-known dataset from `source`.
    pub async fn import_from(&self, source: &dyn DatasetSource) -> Result<ImportStats> {
        tracing::debug!(dataset = DATASET_NAME, "Stream-reading bundled dataset");
        let reader = source.open(DATASET_NAME).map_err(|e| {
            tracing::error!(dataset = DATASET_NAME, error = %e, "Unable to open dataset");
            CatalogError::Dataset(format!("{}: {}", DATASET_NAME, e))
        })?;
        self.import_all(reader).await
    }

    /// Import every record of a JSON array.
    ///
    /// Fails only if the input is not an array or the store cannot be
    /// reached; bad records and a truncated stream keep the counts so far.
    pub async fn import_all<R>(&self, reader: R) -> Result<ImportStats>
    where
        R: Read + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Vec<ParsedRecord>>(PARSE_AHEAD);
        let batch_size = self.batch_size;
        let parser = tokio::task::spawn_blocking(move || parse_dataset(reader, batch_size, tx));

        let mut stats = ImportStats::default();
        while let Some(batch) = rx.recv().await {
            self.insert_batch(batch, &mut stats).await?;
            self.progress.on_batch(&stats);
        }

        match parser.await? {
            ParseEnd::Complete(records) => {
                tracing::debug!(records, "Dataset fully read");
            }
            ParseEnd::Truncated { records, error } => {
                tracing::error!(records, error = %error, "Dataset ended early, keeping records read so far");
            }
            ParseEnd::NotAnArray(error) => {
                tracing::error!(error = %error, "Dataset is not a JSON array");
                return Err(CatalogError::Dataset(error));
            }
        }

        self.progress.on_complete(&stats);
        Ok(stats)
    }

    async fn insert_batch(&self, batch: Vec<ParsedRecord>, stats: &mut ImportStats) -> Result<()> {
        let mut positions = Vec::with_capacity(batch.len());
        let mut documents = Vec::with_capacity(batch.len());
        for record in batch {
            match record.document {
                Ok((title, document)) => {
                    positions.push((record.index, title));
                    documents.push(document);
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, "Skipping dataset record");
                }
            }
        }
        if documents.is_empty() {
            return Ok(());
        }

        let outcome = self.repository.insert_if_absent(documents).await?;
        stats.imported += outcome.inserted;
        stats.skipped_existing += outcome.skipped_existing;
        for (position, source) in outcome.failures {
            stats.failed += 1;
            let (index, title) = positions.get(position).cloned().unwrap_or_default();
            let error = ImportRecordError::Rejected {
                index,
                title,
                source,
            };
            tracing::error!(error = %error, "Error inserting movie");
        }
        Ok(())
    }
}

/// Map a dataset element to the document to insert.
///
/// Imported movies always start unwatched and not deleted.
pub fn import_document(value: &Value) -> std::result::Result<Value, crate::error::DecodeError> {
    let mut movie = Movie::try_decode(value)?;
    movie.watched = false;
    movie.deleted = false;
    Ok(movie.to_document())
}

fn parse_dataset<R: Read>(
    reader: R,
    batch_size: usize,
    tx: mpsc::Sender<Vec<ParsedRecord>>,
) -> ParseEnd {
    let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let mut state = ReadState::default();
    let visitor = DatasetVisitor {
        batch_size,
        tx: &tx,
        state: &mut state,
    };

    let result = deserializer
        .deserialize_seq(visitor)
        .and_then(|()| deserializer.end());
    match result {
        Ok(()) => ParseEnd::Complete(state.records),
        Err(e) if !state.started => ParseEnd::NotAnArray(e.to_string()),
        Err(e) => ParseEnd::Truncated {
            records: state.records,
            error: e.to_string(),
        },
    }
}

#[derive(Default)]
struct ReadState {
    /// The top-level array was opened
    started: bool,
    records: usize,
}

struct DatasetVisitor<'a> {
    batch_size: usize,
    tx: &'a mpsc::Sender<Vec<ParsedRecord>>,
    state: &'a mut ReadState,
}

impl DatasetVisitor<'_> {
    /// Hand a batch to the inserter. `false` once the inserter is gone.
    fn flush(&self, batch: &mut Vec<ParsedRecord>) -> bool {
        if batch.is_empty() {
            return true;
        }
        self.tx.blocking_send(std::mem::take(batch)).is_ok()
    }
}

impl<'de> Visitor<'de> for DatasetVisitor<'_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of movie records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        self.state.started = true;
        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            match seq.next_element::<Value>() {
                Ok(Some(value)) => {
                    let index = self.state.records;
                    self.state.records += 1;
                    let document = import_document(&value)
                        .map(|doc| {
                            let title = doc["title"].as_str().unwrap_or_default().to_string();
                            (title, doc)
                        })
                        .map_err(|source| ImportRecordError::Malformed { index, source });
                    batch.push(ParsedRecord { index, document });

                    if batch.len() >= self.batch_size && !self.flush(&mut batch) {
                        return Err(serde::de::Error::custom("import cancelled"));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Keep what was read before the stream broke
                    self.flush(&mut batch);
                    return Err(e);
                }
            }
        }
        self.flush(&mut batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinesync_store::Store;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn importer(batch_size: usize) -> (Arc<CatalogRepository<Store>>, BulkImporter<Store>) {
        let repository = Arc::new(CatalogRepository::new(Arc::new(Store::new("test"))));
        let importer = BulkImporter::new(repository.clone())
            .with_batch_size(batch_size)
            .with_progress(SilentProgress);
        (repository, importer)
    }

    fn reader(text: &str) -> Cursor<Vec<u8>> {
        Cursor::new(text.as_bytes().to_vec())
    }

    #[test]
    fn import_document_normalizes() {
        let doc = import_document(&serde_json::json!({
            "_id": {"$oid": "abc"},
            "title": "Heat",
            "watched": true,
            "deleted": true,
            "imdb": {"rating": 8.3}
        }))
        .unwrap();
        assert_eq!(doc["_id"], "abc");
        assert_eq!(doc["watched"], false);
        assert_eq!(doc["deleted"], false);
        assert_eq!(doc["imdbRating"], 8.3);
        assert_eq!(doc["genres"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn counts_malformed_records() {
        let (repository, importer) = importer(2);
        let stats = importer
            .import_all(reader(
                r#"[{"_id":"a","title":"A"}, {"_id":"b","title":"B"}, 42, {"_id":"c","title":"C"}]"#,
            ))
            .await
            .unwrap();
        assert_eq!(
            stats,
            ImportStats {
                imported: 3,
                failed: 1,
                skipped_existing: 0
            }
        );
        assert!(repository.get_by_id("c").await.is_some());
    }

    #[tokio::test]
    async fn reimport_skips_existing() {
        let (_repository, importer) = importer(DEFAULT_BATCH_SIZE);
        let data = r#"[{"_id":"a","title":"A"}, {"_id":"b","title":"B"}]"#;
        importer.import_all(reader(data)).await.unwrap();
        let stats = importer.import_all(reader(data)).await.unwrap();
        assert_eq!(stats.imported, 0);
        assert_eq!(stats.skipped_existing, 2);
    }

    #[tokio::test]
    async fn truncated_stream_keeps_earlier_records() {
        let (repository, importer) = importer(1);
        let stats = importer
            .import_all(reader(r#"[{"_id":"a","title":"A"}, {"_id":"b","title":"B"}, {"_id": "#))
            .await
            .unwrap();
        assert_eq!(stats.imported, 2);
        assert!(repository.get_by_id("b").await.is_some());
    }

    #[tokio::test]
    async fn rejects_non_array() {
        let (_repository, importer) = importer(DEFAULT_BATCH_SIZE);
        assert!(matches!(
            importer.import_all(reader(r#"{"title":"A"}"#)).await,
            Err(CatalogError::Dataset(_))
        ));
        assert!(matches!(
            importer.import_all(reader("")).await,
            Err(CatalogError::Dataset(_))
        ));
    }

    #[tokio::test]
    async fn empty_array() {
        let (_repository, importer) = importer(DEFAULT_BATCH_SIZE);
        let stats = importer.import_all(reader("[]")).await.unwrap();
        assert_eq!(stats, ImportStats::default());
    }

    #[tokio::test]
    async fn missing_dataset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_repository, importer) = importer(DEFAULT_BATCH_SIZE);
        let result = importer.import_from(&AssetDir::new(dir.path())).await;
        assert!(matches!(result, Err(CatalogError::Dataset(_))));
    }

    #[tokio::test]
    async fn reads_from_asset_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DATASET_NAME),
            r#"[{"title":"No Id"}, {"_id":"x","title":"X"}]"#,
        )
        .unwrap();
        let (_repository, importer) = importer(DEFAULT_BATCH_SIZE);
        let stats = importer.import_from(&AssetDir::new(dir.path())).await.unwrap();
        assert_eq!(stats.imported, 2);
    }

    struct Recording(Mutex<Vec<ImportStats>>);

    impl ImportProgress for Recording {
        fn on_batch(&self, stats: &ImportStats) {
            self.0.lock().unwrap().push(*stats);
        }
        fn on_complete(&self, _stats: &ImportStats) {}
    }

    #[tokio::test]
    async fn reports_progress_per_batch() {
        let repository = Arc::new(CatalogRepository::new(Arc::new(Store::new("test"))));
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));

        struct Shared(Arc<Recording>);
        impl ImportProgress for Shared {
            fn on_batch(&self, stats: &ImportStats) {
                self.0.on_batch(stats)
            }
            fn on_complete(&self, stats: &ImportStats) {
                self.0.on_complete(stats)
            }
        }

        let importer = BulkImporter::new(repository)
            .with_batch_size(2)
            .with_progress(Shared(recording.clone()));
        let records: Vec<_> = (0..5)
            .map(|i| serde_json::json!({"_id": format!("m{}", i)}))
            .collect();
        importer
            .import_all(reader(&serde_json::to_string(&records).unwrap()))
            .await
            .unwrap();

        let seen: Vec<usize> = recording.0.lock().unwrap().iter().map(|s| s.imported).collect();
        assert_eq!(seen, vec![2, 4, 5]);
    }
}
