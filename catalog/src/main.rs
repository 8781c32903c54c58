//! Cinesync - movie catalog node with peer sync.
//!
//! Opens the local store, imports the bundled dataset on first launch,
//! restores the sync preference and keeps running until interrupted. The
//! store is saved on shutdown.

use cinesync_catalog::{
    AssetDir, BulkImporter, CatalogController, CatalogRepository, Config, FilePreferences,
    LogProgress,
};
use cinesync_store::Store;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cinesync=debug,cinesync_catalog=debug,cinesync_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        node_id = %config.node_id,
        data_dir = %config.data_dir.display(),
        "Starting Cinesync"
    );

    // Open the store
    let store = Store::new(config.node_id.clone());
    let store_path = config.store_path();
    if store.load_from(&store_path)? {
        tracing::info!(path = %store_path.display(), "Loaded store snapshot");
    }
    let store = Arc::new(store);

    // Build the catalog
    let repository = Arc::new(CatalogRepository::new(store.clone()));
    let preferences = Arc::new(FilePreferences::new(config.preferences_path()));
    let importer = BulkImporter::new(repository.clone())
        .with_batch_size(config.import_batch_size)
        .with_progress(LogProgress::default());
    let dataset = Arc::new(AssetDir::new(config.assets_dir.clone()));

    let controller = CatalogController::new(repository.clone(), preferences, importer, dataset);
    controller.start().await?;

    let mut movies = controller.movies();
    let mut errors = controller.errors();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = movies.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracing::info!(count = movies.borrow_and_update().len(), "Catalog updated");
                }
                changed = errors.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(message) = errors.borrow_and_update().clone() {
                        tracing::warn!(%message, "Catalog error");
                    }
                }
            }
        }
    });

    tracing::info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    watcher.abort();
    repository.stop_sync().await?;
    store.save_to(&store_path)?;
    tracing::info!(path = %store_path.display(), "Store saved");

    Ok(())
}
