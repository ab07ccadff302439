//! The cache contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tessera_core::TesseraResult;

/// Extra fields recorded next to a cached value, for inspection only.
pub type DebugData = Map<String, Value>;

/// Key/value cache of JSON values.
///
/// A miss is `Ok(None)`; deleting a missing key is a no-op. `child` returns
/// a namespaced view whose keys do not collide with the parent's, except
/// where an implementation documents otherwise.
#[async_trait]
pub trait PipelineCache: Send + Sync {
    async fn get(&self, key: &str) -> TesseraResult<Option<Value>>;

    /// Store `value`. `debug_data` may be persisted alongside it but is
    /// never returned by `get`.
    async fn set(&self, key: &str, value: Value, debug_data: Option<DebugData>)
        -> TesseraResult<()>;

    async fn has(&self, key: &str) -> TesseraResult<bool>;

    async fn delete(&self, key: &str) -> TesseraResult<()>;

    async fn clear(&self) -> TesseraResult<()>;

    fn child(&self, name: &str) -> Arc<dyn PipelineCache>;
}
