//! TESSERA Test Utilities
//!
//! Shared test infrastructure for the TESSERA workspace:
//! - Proptest generators for keys, stored values and cached JSON
//! - Fixtures for every storage backend, runnable without network access
//! - Assertions for TESSERA error variants
//! - Test tracing setup

use std::sync::{Arc, Once};

use tempfile::TempDir;

// Re-export core types for convenience
pub use tessera_core::{
    ConfigError, Content, ReadAs, StorageError, TesseraError, TesseraResult, TextEncoding,
};
pub use tessera_storage::{
    BlobStorage, CosmosStorage, FileStorage, InMemoryDocumentDatabase, MemoryStorage,
    PipelineStorage,
};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-writer `tracing` subscriber, filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for storage keys and values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// A relative key of one to three `/`-separated segments.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z0-9_]{1,8}", 1..=3).prop_map(|segments| segments.join("/"))
    }

    /// A key without separators.
    pub fn arb_flat_key() -> impl Strategy<Value = String> {
        "[a-z0-9_]{1,12}(\\.[a-z]{2,4})?"
    }

    pub fn arb_text() -> impl Strategy<Value = String> {
        "\\PC{0,64}"
    }

    pub fn arb_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..256)
    }

    pub fn arb_content() -> impl Strategy<Value = Content> {
        prop_oneof![
            arb_text().prop_map(Content::Text),
            arb_bytes().prop_map(Content::Binary),
        ]
    }

    /// Encodings that can represent any string.
    pub fn arb_lossless_encoding() -> impl Strategy<Value = TextEncoding> {
        prop_oneof![Just(TextEncoding::Utf8), Just(TextEncoding::Utf16Le)]
    }

    /// Cached values: JSON scalars, arrays and shallow objects.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,32}".prop_map(Value::String),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-to-use storage backends for tests.

    use super::*;
    use object_store::memory::InMemory;

    /// File storage rooted in a fresh temporary directory. Keep the
    /// `TempDir` alive for as long as the storage is used.
    pub fn temp_file_storage() -> (TempDir, FileStorage) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let storage = FileStorage::new(dir.path().join("output"));
        (dir, storage)
    }

    /// Blob storage over an in-memory object store.
    pub fn memory_blob_storage() -> BlobStorage {
        BlobStorage::new(Arc::new(InMemory::new()), "test-container", "")
    }

    /// Document storage over the in-process emulator. The returned database
    /// handle shares state with the storage.
    pub async fn emulated_cosmos() -> (InMemoryDocumentDatabase, CosmosStorage) {
        let db = InMemoryDocumentDatabase::new("tessera-test");
        let storage = CosmosStorage::open(Arc::new(db.clone()))
            .await
            .expect("open emulated database");
        (db, storage)
    }

    /// A named backend under test.
    pub struct BackendFixture {
        pub name: &'static str,
        pub storage: Arc<dyn PipelineStorage>,
        _dir: Option<TempDir>,
    }

    /// One instance of every backend.
    pub async fn all_backends() -> Vec<BackendFixture> {
        let (dir, file) = temp_file_storage();
        let (_db, cosmos) = emulated_cosmos().await;
        vec![
            BackendFixture {
                name: "memory",
                storage: Arc::new(MemoryStorage::new()),
                _dir: None,
            },
            BackendFixture {
                name: "file",
                storage: Arc::new(file),
                _dir: Some(dir),
            },
            BackendFixture {
                name: "blob",
                storage: Arc::new(memory_blob_storage()),
                _dir: None,
            },
            BackendFixture {
                name: "cosmos",
                storage: Arc::new(cosmos),
                _dir: None,
            },
        ]
    }

    /// Backends whose children are isolated key spaces.
    pub async fn hierarchical_backends() -> Vec<BackendFixture> {
        all_backends()
            .await
            .into_iter()
            .filter(|b| b.name != "cosmos")
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for TESSERA results.

    use super::*;

    /// Assert that a TesseraResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Storage(StorageError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a TesseraResult is an ItemTooLarge storage error.
    #[track_caller]
    pub fn assert_item_too_large<T: std::fmt::Debug>(result: &TesseraResult<T>, key: &str) {
        match result {
            Err(TesseraError::Storage(StorageError::ItemTooLarge { key: k, size, limit })) => {
                assert_eq!(k, key, "Wrong key in ItemTooLarge error");
                assert!(size > limit, "Reported size {} within limit {}", size, limit);
            }
            other => panic!("Expected ItemTooLarge for {}, got: {:?}", key, other),
        }
    }

    /// Assert that a TesseraResult is a MissingRequired config error for
    /// `field`.
    #[track_caller]
    pub fn assert_missing_required<T: std::fmt::Debug>(result: &TesseraResult<T>, field: &str) {
        match result {
            Err(TesseraError::Config(ConfigError::MissingRequired { field: f })) => {
                assert_eq!(f, field, "Wrong field in MissingRequired error");
            }
            other => panic!("Expected MissingRequired({}), got: {:?}", field, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
