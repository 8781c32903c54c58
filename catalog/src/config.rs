//! Configuration management for the catalog binary.

use crate::importer::DEFAULT_BATCH_SIZE;
use std::env;
use std::path::PathBuf;

/// Catalog configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this device in the sync mesh
    pub node_id: String,
    /// Directory holding the store snapshot and preferences
    pub data_dir: PathBuf,
    /// Directory holding the bundled dataset
    pub assets_dir: PathBuf,
    /// Records per insert batch during the first-run import
    pub import_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a custom variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let node_id = lookup("CINESYNC_NODE_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let data_dir = lookup("CINESYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let assets_dir = lookup("CINESYNC_ASSETS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./assets"));

        let import_batch_size = match lookup("CINESYNC_IMPORT_BATCH_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => return Err(ConfigError::InvalidBatchSize(raw)),
            },
            None => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            node_id,
            data_dir,
            assets_dir,
            import_batch_size,
        })
    }

    /// Path of the persisted store snapshot.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    /// Path of the persisted preferences.
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid CINESYNC_IMPORT_BATCH_SIZE value: {0:?}")]
    InvalidBatchSize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(!config.node_id.is_empty());
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.assets_dir, PathBuf::from("./assets"));
        assert_eq!(config.import_batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.store_path(), PathBuf::from("./data/store.json"));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CINESYNC_NODE_ID", "phone"),
            ("CINESYNC_DATA_DIR", "/tmp/cine"),
            ("CINESYNC_IMPORT_BATCH_SIZE", "200"),
        ]))
        .unwrap();
        assert_eq!(config.node_id, "phone");
        assert_eq!(
            config.preferences_path(),
            PathBuf::from("/tmp/cine/preferences.json")
        );
        assert_eq!(config.import_batch_size, 200);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = Config::from_lookup(lookup(&[("CINESYNC_IMPORT_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBatchSize(_)));
        assert!(Config::from_lookup(lookup(&[("CINESYNC_IMPORT_BATCH_SIZE", "lots")])).is_err());
    }
}
