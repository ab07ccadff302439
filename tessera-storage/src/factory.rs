//! Build storage and caches from configuration.

use std::path::Path;
use std::sync::Arc;

use tessera_core::{default_storage_config, CacheConfig, StorageConfig, Table, TesseraResult};
use tracing::{error, info};

use crate::backend::{BlobStorage, FileStorage, MemoryStorage};
use crate::cache::{CosmosCache, JsonCache, MemoryCache, NoopCache, PipelineCache};
use crate::cosmos::CosmosStorage;
use crate::PipelineStorage;

/// Build the storage described by `config`.
pub async fn load_storage(config: &StorageConfig) -> TesseraResult<Arc<dyn PipelineStorage>> {
    info!(backend = %config.storage_type(), "Loading storage");
    let storage: Arc<dyn PipelineStorage> = match config {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::File(settings) => Arc::new(FileStorage::new(
            settings.base_dir.as_deref().unwrap_or("."),
        )),
        StorageConfig::Blob(settings) => Arc::new(BlobStorage::connect(settings)?),
        StorageConfig::Cosmos(settings) => Arc::new(CosmosStorage::connect(settings).await?),
    };
    Ok(storage)
}

/// Build run storage, defaulting to files under `<root_dir>/output`.
pub async fn create_storage(
    config: Option<&StorageConfig>,
    root_dir: &Path,
) -> TesseraResult<Arc<dyn PipelineStorage>> {
    match config {
        Some(config) => load_storage(config).await,
        None => load_storage(&default_storage_config(root_dir)).await,
    }
}

/// Build the cache described by `config`. No configuration means no cache.
///
/// File caches live at `root_dir` joined with their `base_dir`, so an
/// absolute `base_dir` is used as is. Blob caches are rooted at their
/// `base_dir` child.
pub async fn load_cache(
    config: Option<&CacheConfig>,
    root_dir: &Path,
) -> TesseraResult<Arc<dyn PipelineCache>> {
    let Some(config) = config else {
        return Ok(Arc::new(NoopCache));
    };
    info!(cache = %config.cache_type(), "Loading cache");
    let cache: Arc<dyn PipelineCache> = match config {
        CacheConfig::None => Arc::new(NoopCache),
        CacheConfig::Memory => Arc::new(MemoryCache::new()),
        CacheConfig::File(settings) => {
            let base_dir = settings.base_dir.as_deref().unwrap_or_default();
            Arc::new(JsonCache::new(Arc::new(FileStorage::new(root_dir.join(base_dir)))))
        }
        CacheConfig::Blob(settings) => {
            let unrooted = tessera_core::BlobSettings {
                base_dir: None,
                ..settings.clone()
            };
            let storage = BlobStorage::connect(&unrooted)?.child(settings.base_dir.as_deref());
            Arc::new(JsonCache::new(storage))
        }
        CacheConfig::Cosmos(settings) => {
            let storage = CosmosStorage::connect(settings).await?;
            Arc::new(CosmosCache::new(storage).await?)
        }
    };
    Ok(cache)
}

/// Load table `name`, logging the attempt and any failure.
pub async fn load_table_from_storage(
    name: &str,
    storage: &dyn PipelineStorage,
) -> TesseraResult<Table> {
    info!(table = %name, "Reading table from storage");
    storage.load_table(name).await.map_err(|e| {
        error!(table = %name, error = %e, "Failed to load table from storage");
        e
    })
}
