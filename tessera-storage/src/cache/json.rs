//! Cache persisted as JSON documents in a storage backend.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tessera_core::{Content, ReadAs, TesseraResult, TextEncoding};
use tracing::{debug, warn};

use super::{DebugData, PipelineCache};
use crate::PipelineStorage;

const RESULT_FIELD: &str = "result";

/// Cache storing each entry as `{"result": value, ...debug_data}` in a
/// [`PipelineStorage`].
///
/// Entries that cannot be decoded are deleted and reported as misses.
#[derive(Clone)]
pub struct JsonCache {
    storage: Arc<dyn PipelineStorage>,
    encoding: TextEncoding,
}

impl fmt::Debug for JsonCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCache")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl JsonCache {
    pub fn new(storage: Arc<dyn PipelineStorage>) -> Self {
        Self {
            storage,
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn decode(content: Content, encoding: TextEncoding) -> Option<Value> {
        let text = content.into_text(encoding).ok()?;
        let document: Value = serde_json::from_str(&text).ok()?;
        document.get(RESULT_FIELD).cloned()
    }
}

#[async_trait]
impl PipelineCache for JsonCache {
    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        let Some(content) = self.storage.get(key, ReadAs::Bytes).await? else {
            return Ok(None);
        };
        match Self::decode(content, self.encoding) {
            Some(value) => Ok(Some(value)),
            None => {
                warn!(key = %key, "Discarding undecodable cache entry");
                self.storage.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        debug_data: Option<DebugData>,
    ) -> TesseraResult<()> {
        let mut document = Map::new();
        document.insert(RESULT_FIELD.to_string(), value);
        if let Some(debug_data) = debug_data {
            debug!(key = %key, fields = debug_data.len(), "Caching with debug data");
            for (field, data) in debug_data {
                if field != RESULT_FIELD {
                    document.insert(field, data);
                }
            }
        }
        let text = serde_json::to_string(&Value::Object(document))?;
        self.storage
            .set(key, Content::Text(text), Some(self.encoding))
            .await
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        self.storage.has(key).await
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        self.storage.delete(key).await
    }

    async fn clear(&self) -> TesseraResult<()> {
        self.storage.clear().await
    }

    fn child(&self, name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(Self {
            storage: self.storage.child(Some(name)),
            encoding: self.encoding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use serde_json::json;

    fn cache() -> (Arc<MemoryStorage>, JsonCache) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = JsonCache::new(Arc::clone(&storage) as Arc<dyn PipelineStorage>);
        (storage, cache)
    }

    #[tokio::test]
    async fn test_result_is_wrapped_with_debug_data() {
        let (storage, cache) = cache();
        let mut debug_data = DebugData::new();
        debug_data.insert("input".to_string(), json!("prompt text"));
        cache
            .set("k", json!(["a", "b"]), Some(debug_data))
            .await
            .unwrap();

        let raw = storage.get_text("k").await.unwrap().unwrap();
        let document: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document, json!({"result": ["a", "b"], "input": "prompt text"}));
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_debug_data_cannot_shadow_result() {
        let (_storage, cache) = cache();
        let mut debug_data = DebugData::new();
        debug_data.insert("result".to_string(), json!("wrong"));
        cache.set("k", json!("right"), Some(debug_data)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("right")));
    }

    #[tokio::test]
    async fn test_corrupt_entries_are_deleted() {
        let (storage, cache) = cache();
        storage.set("bad", "{not json".into(), None).await.unwrap();
        storage
            .set("binary", Content::Binary(vec![0xFF, 0xFE]), None)
            .await
            .unwrap();
        storage.set("shape", "{\"other\": 1}".into(), None).await.unwrap();

        for key in ["bad", "binary", "shape"] {
            assert!(cache.get(key).await.unwrap().is_none());
            assert!(!storage.has(key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_child_uses_storage_child() {
        let (storage, cache) = cache();
        cache.child("summaries").set("k", json!(1), None).await.unwrap();
        assert!(storage.has("summaries/k").await.unwrap());
        assert!(!cache.has("k").await.unwrap());
    }
}
