//! Process-local cache.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{StorageError, TesseraResult};

use super::{DebugData, PipelineCache};
use crate::LruCache;

/// Cache held in an [`LruCache`] shared by all children.
///
/// Unbounded unless built with [`MemoryCache::with_capacity`]. Children use
/// the key prefix `"{name}:"` on the same LRU.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<LruCache<String, Value>>>,
    prefix: String,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(LruCache::unbounded())),
            prefix: String::new(),
        }
    }

    /// Bound the cache to `capacity` entries, evicting least recently used.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.entries = Arc::new(Mutex::new(LruCache::new(capacity)));
        self
    }

    /// Entries held by the shared LRU, across all children.
    pub fn len(&self) -> TesseraResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> TesseraResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn capacity(&self) -> TesseraResult<usize> {
        Ok(self.lock()?.capacity())
    }

    fn lock(&self) -> TesseraResult<MutexGuard<'_, LruCache<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl PipelineCache for MemoryCache {
    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        Ok(self.lock()?.get(&self.full_key(key)).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        _debug_data: Option<DebugData>,
    ) -> TesseraResult<()> {
        self.lock()?.set(self.full_key(key), value);
        Ok(())
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        Ok(self.lock()?.contains(&self.full_key(key)))
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        self.lock()?.delete(&self.full_key(key));
        Ok(())
    }

    /// Remove this view's entries. At the root that is everything.
    async fn clear(&self) -> TesseraResult<()> {
        let mut entries = self.lock()?;
        if self.prefix.is_empty() {
            entries.clear();
            return Ok(());
        }
        let scoped: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(self.prefix.as_str()))
            .cloned()
            .collect();
        for key in scoped {
            entries.delete(&key);
        }
        Ok(())
    }

    fn child(&self, name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(Self {
            entries: Arc::clone(&self.entries),
            prefix: format!("{}{}:", self.prefix, name),
        })
    }
}
