use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::TesseraResult;

use super::{DebugData, PipelineCache};

/// A cache that stores nothing. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl NoopCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineCache for NoopCache {
    async fn get(&self, _key: &str) -> TesseraResult<Option<Value>> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: Value,
        _debug_data: Option<DebugData>,
    ) -> TesseraResult<()> {
        Ok(())
    }

    async fn has(&self, _key: &str) -> TesseraResult<bool> {
        Ok(false)
    }

    async fn delete(&self, _key: &str) -> TesseraResult<()> {
        Ok(())
    }

    async fn clear(&self) -> TesseraResult<()> {
        Ok(())
    }

    fn child(&self, _name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_never_hits() {
        let cache = NoopCache::new();
        cache.set("k", json!(1), None).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.has("k").await.unwrap());
        cache.delete("k").await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.child("x").get("k").await.unwrap().is_none());
    }
}
