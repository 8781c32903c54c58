//! Persisted user preferences.
//!
//! A small keyed boolean store. Reads return a consistent copy of every key;
//! edits are applied atomically and persisted before they return.

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Whether peer sync should run. Defaults to `true` when never stored.
pub const SYNC_ENABLED: &str = "sync_enabled";

/// Whether the bundled dataset has been imported.
pub const DATA_IMPORTED: &str = "data_imported";

/// A copy of all stored preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences {
    values: BTreeMap<String, bool>,
}

impl Preferences {
    pub fn get(&self, key: &str) -> Option<bool> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: bool) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<bool> {
        self.values.remove(key)
    }

    pub fn sync_enabled(&self) -> bool {
        self.get(SYNC_ENABLED).unwrap_or(true)
    }

    pub fn data_imported(&self) -> bool {
        self.get(DATA_IMPORTED).unwrap_or(false)
    }
}

/// Storage for [`Preferences`].
pub trait PreferenceStore: Send + Sync + 'static {
    /// Read every stored key.
    fn read_all(&self) -> impl Future<Output = Result<Preferences>> + Send;

    /// Apply `f` to the stored preferences and persist the result.
    ///
    /// Edits are serialized; the returned value is what was persisted.
    fn edit<F>(&self, f: F) -> impl Future<Output = Result<Preferences>> + Send
    where
        F: FnOnce(&mut Preferences) + Send;
}

/// Preferences kept in a JSON file.
///
/// Writes go to a temporary file that is then renamed over the original, so
/// a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Preferences> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                CatalogError::Preferences(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(preferences)
            .map_err(|e| CatalogError::Preferences(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    async fn read_all(&self) -> Result<Preferences> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn edit<F>(&self, f: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut preferences = self.load().await?;
        f(&mut preferences);
        self.persist(&preferences).await?;
        tracing::debug!(path = %self.path.display(), "Preferences saved");
        Ok(preferences)
    }
}

/// In-memory preferences, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<Preferences>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(preferences: Preferences) -> Self {
        Self {
            values: Mutex::new(preferences),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    async fn read_all(&self) -> Result<Preferences> {
        Ok(self.values.lock().await.clone())
    }

    async fn edit<F>(&self, f: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences) + Send,
    {
        let mut values = self.values.lock().await;
        f(&mut *values);
        Ok(values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let preferences = Preferences::default();
        assert!(preferences.sync_enabled());
        assert!(!preferences.data_imported());
    }

    #[tokio::test]
    async fn memory_edit() {
        let store = MemoryPreferences::new();
        let saved = store.edit(|p| p.set(SYNC_ENABLED, false)).await.unwrap();
        assert!(!saved.sync_enabled());
        assert_eq!(store.read_all().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("preferences.json");

        let store = FilePreferences::new(&path);
        assert_eq!(store.read_all().await.unwrap(), Preferences::default());

        store
            .edit(|p| {
                p.set(SYNC_ENABLED, false);
                p.set(DATA_IMPORTED, true);
            })
            .await
            .unwrap();

        let reopened = FilePreferences::new(&path);
        let preferences = reopened.read_all().await.unwrap();
        assert!(!preferences.sync_enabled());
        assert!(preferences.data_imported());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{oops").unwrap();

        let store = FilePreferences::new(&path);
        assert!(matches!(
            store.read_all().await,
            Err(CatalogError::Preferences(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_edits_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FilePreferences::new(dir.path().join("p.json")));

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.edit(move |p| p.set(format!("key_{}", i), true)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let preferences = store.read_all().await.unwrap();
        for i in 0..10 {
            assert_eq!(preferences.get(&format!("key_{}", i)), Some(true));
        }
    }
}
