//! Property-Based Tests for Concurrent Access
//!
//! **Property 9: Read Cache Coherence**
//!
//! A read that fetched a value before a write to the same key completed
//! SHALL NOT put that value back into the local cache: once the write has
//! returned, reads through the same handle SHALL see the written value.
//!
//! **Property 10: Concurrent Writers**
//!
//! After concurrent writes to one key settle, a read through the writing
//! handle SHALL agree with a read through a fresh handle on the same
//! database.
//!
//! **Property 11: Bounded Memory Cache Under Contention**
//!
//! A memory cache of capacity C shared by many tasks SHALL never hold more
//! than C entries.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use tessera_storage::{
    CosmosCache, CosmosStorage, DocumentDatabase, DocumentQuery, InMemoryDocumentDatabase,
    MemoryCache, PipelineCache, PipelineStorage,
};
use tessera_test_utils::TesseraResult;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

// ============================================================================
// GATED DATABASE
// ============================================================================

struct Gate {
    fetched: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Emulator wrapper that can hold one point read after it has fetched its
/// result, until the test releases it.
struct GatedDatabase {
    inner: InMemoryDocumentDatabase,
    gate: Mutex<Option<Gate>>,
}

impl GatedDatabase {
    /// Returns the receiver signalled once the next point read has fetched,
    /// and the sender that lets it return.
    fn new(inner: InMemoryDocumentDatabase) -> (Arc<Self>, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (fetched_tx, fetched_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let db = Arc::new(Self {
            inner,
            gate: Mutex::new(Some(Gate {
                fetched: fetched_tx,
                release: release_rx,
            })),
        });
        (db, fetched_rx, release_tx)
    }

    fn take_gate(&self, query: &DocumentQuery) -> Option<Gate> {
        match query {
            DocumentQuery::ById(_) => self.gate.lock().unwrap().take(),
            _ => None,
        }
    }
}

#[async_trait]
impl DocumentDatabase for GatedDatabase {
    fn database_name(&self) -> &str {
        self.inner.database_name()
    }

    async fn list_containers(&self) -> TesseraResult<Vec<String>> {
        self.inner.list_containers().await
    }

    async fn create_container(&self, name: &str, partition_key_path: &str) -> TesseraResult<()> {
        self.inner.create_container(name, partition_key_path).await
    }

    async fn delete_container(&self, name: &str) -> TesseraResult<()> {
        self.inner.delete_container(name).await
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        item: &Value,
    ) -> TesseraResult<()> {
        self.inner.upsert_item(container, partition_key, item).await
    }

    async fn delete_item(&self, container: &str, id: &str, partition_key: &str) -> TesseraResult<()> {
        self.inner.delete_item(container, id, partition_key).await
    }

    async fn query_items(&self, container: &str, query: &DocumentQuery) -> TesseraResult<Vec<Value>> {
        let gate = self.take_gate(query);
        let items = self.inner.query_items(container, query).await?;
        if let Some(gate) = gate {
            let _ = gate.fetched.send(());
            let _ = gate.release.await;
        }
        Ok(items)
    }
}

// ============================================================================
// READ CACHE COHERENCE
// ============================================================================

/// **Property 9: Read Cache Coherence** (storage)
#[tokio::test]
async fn test_read_overlapping_write_does_not_cache_stale_value() {
    let inner = InMemoryDocumentDatabase::new("graphrag");
    inner.insert_container("_raw");
    inner
        .upsert_item("_raw", "k", &json!({"id": "k", "value": "v1", "encoded": false}))
        .await
        .unwrap();
    let (db, fetched, release) = GatedDatabase::new(inner);
    let storage = CosmosStorage::open(db).await.unwrap();

    let reader = tokio::spawn({
        let storage = storage.clone();
        async move { storage.get_text("k").await }
    });
    fetched.await.unwrap();

    storage.set("k", "v2".into(), None).await.unwrap();
    release.send(()).unwrap();
    let overlapped = reader.await.unwrap().unwrap();
    assert_eq!(overlapped.as_deref(), Some("v1"));

    assert_eq!(storage.get_text("k").await.unwrap().as_deref(), Some("v2"));
}

/// **Property 9: Read Cache Coherence** (storage delete)
#[tokio::test]
async fn test_read_overlapping_delete_does_not_resurrect_value() {
    let inner = InMemoryDocumentDatabase::new("graphrag");
    inner.insert_container("_raw");
    inner
        .upsert_item("_raw", "k", &json!({"id": "k", "value": "v1", "encoded": false}))
        .await
        .unwrap();
    let (db, fetched, release) = GatedDatabase::new(inner);
    let storage = CosmosStorage::open(db).await.unwrap();

    let reader = tokio::spawn({
        let storage = storage.clone();
        async move { storage.get_text("k").await }
    });
    fetched.await.unwrap();

    storage.delete("k").await.unwrap();
    release.send(()).unwrap();
    reader.await.unwrap().unwrap();

    assert!(!storage.has("k").await.unwrap());
}

/// **Property 9: Read Cache Coherence** (document cache)
#[tokio::test]
async fn test_cache_read_overlapping_write_does_not_memoize_stale_value() {
    let inner = InMemoryDocumentDatabase::new("graphrag");
    inner.insert_container("_cache");
    inner
        .upsert_item("_cache", "k", &json!({"id": "k", "value": "v1"}))
        .await
        .unwrap();
    let (db, fetched, release) = GatedDatabase::new(inner);
    let storage = CosmosStorage::open(db).await.unwrap();
    let cache = CosmosCache::new(storage).await.unwrap();

    let reader = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get("k").await }
    });
    fetched.await.unwrap();

    cache.set("k", json!("v2"), None).await.unwrap();
    release.send(()).unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), Some(json!("v1")));

    assert_eq!(cache.get("k").await.unwrap(), Some(json!("v2")));
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// **Property 10: Concurrent Writers** (storage)
    #[test]
    fn prop_concurrent_storage_writes_agree_with_database(
        values in prop::collection::vec("[a-z]{1,8}", 2..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let db = InMemoryDocumentDatabase::new("graphrag");
            let storage = CosmosStorage::open(Arc::new(db.clone())).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let mut tasks = Vec::new();
            for value in values.clone() {
                let storage = storage.clone();
                tasks.push(tokio::spawn(async move {
                    storage.set("k", value.into(), None).await?;
                    storage.get_text("k").await
                }));
            }
            for task in tasks {
                task.await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }

            let fresh = CosmosStorage::open(Arc::new(db.clone())).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let settled = fresh.get_text("k").await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let local = storage.get_text("k").await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(settled.as_ref().is_some_and(|v| values.contains(v)));
            prop_assert_eq!(local, settled);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 10: Concurrent Writers** (document cache)
    #[test]
    fn prop_concurrent_cache_writes_agree_with_database(
        values in prop::collection::vec(any::<i64>(), 2..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let db = InMemoryDocumentDatabase::new("graphrag");
            let storage = CosmosStorage::open(Arc::new(db.clone())).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let cache = CosmosCache::new(storage).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let mut tasks = Vec::new();
            for value in values.clone() {
                let cache = cache.clone();
                tasks.push(tokio::spawn(async move {
                    cache.set("k", json!(value), None).await?;
                    cache.get("k").await
                }));
            }
            for task in tasks {
                task.await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }

            let fresh = CosmosCache::new(
                CosmosStorage::open(Arc::new(db.clone())).await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?,
            )
            .await
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let settled = fresh.get("k").await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let local = cache.get("k").await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(settled.is_some());
            prop_assert_eq!(local, settled);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// MEMORY CACHE UNDER CONTENTION
// ============================================================================

/// **Property 11: Bounded Memory Cache Under Contention**
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_cache_stays_bounded_under_contention() {
    const CAPACITY: usize = 16;
    let cache = MemoryCache::new().with_capacity(CAPACITY);

    let mut tasks = Vec::new();
    for worker in 0..8usize {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            let child = cache.child("worker");
            for n in 0..200usize {
                let key = format!("k{}", (worker * 31 + n) % 64);
                cache.set(&key, json!(n), None).await.unwrap();
                child.set(&key, json!(worker), None).await.unwrap();
                cache.get(&key).await.unwrap();
                if n % 7 == 0 {
                    cache.delete(&key).await.unwrap();
                }
                assert!(cache.len().unwrap() <= CAPACITY);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(cache.len().unwrap() <= CAPACITY);
    assert_eq!(cache.capacity().unwrap(), CAPACITY);
}
