//! Cache in a dedicated document-database container.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tessera_core::TesseraResult;
use tracing::debug;

use super::{DebugData, PipelineCache};
use crate::cosmos::{CosmosStorage, DocumentContainer, TtlCache};

/// Container holding cache documents (`{id, value}`).
pub const CACHE_CONTAINER: &str = "_cache";

/// Cache over a [`CosmosStorage`] database.
///
/// Reads are memoized for the life of the cache: populated on first miss,
/// refreshed by `set`, invalidated by `delete` and `clear`. A read that
/// overlaps a write to the same key is not memoized. The memo is unbounded.
/// `child` returns the same cache, so keys are not namespaced.
#[derive(Debug, Clone)]
pub struct CosmosCache {
    storage: CosmosStorage,
    memo: Arc<TtlCache<Value>>,
}

impl CosmosCache {
    /// Create the cache, making sure its container exists.
    pub async fn new(storage: CosmosStorage) -> TesseraResult<Self> {
        storage.ensure_container(CACHE_CONTAINER).await?;
        Ok(Self {
            storage,
            memo: Arc::new(TtlCache::session()),
        })
    }

    async fn container(&self) -> TesseraResult<DocumentContainer> {
        self.storage.ensure_container(CACHE_CONTAINER).await
    }
}

#[async_trait]
impl PipelineCache for CosmosCache {
    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        if let Some(value) = self.memo.get(key)? {
            return Ok(Some(value));
        }
        let ticket = self.memo.read_ticket(key)?;
        let Some(item) = self.container().await?.read(key).await? else {
            return Ok(None);
        };
        let value = item.get("value").cloned().unwrap_or(Value::Null);
        self.memo.fill(key, value.clone(), ticket)?;
        Ok(Some(value))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        debug_data: Option<DebugData>,
    ) -> TesseraResult<()> {
        if let Some(debug_data) = &debug_data {
            debug!(key = %key, fields = debug_data.len(), "Debug data is not persisted in the document cache");
        }
        let pending = self.memo.begin_write(key)?;
        self.container()
            .await?
            .upsert(&json!({ "id": key, "value": value }))
            .await?;
        pending.commit(Some(value))
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        let pending = self.memo.begin_write(key)?;
        self.container().await?.delete(key).await?;
        pending.commit(None)
    }

    async fn clear(&self) -> TesseraResult<()> {
        self.storage.drop_container(CACHE_CONTAINER).await?;
        self.memo.clear()
    }

    fn child(&self, _name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(self.clone())
    }
}
