//! TESSERA Storage - Storage and Cache Contracts with Pluggable Backends
//!
//! Defines the [`PipelineStorage`] and [`PipelineCache`] abstractions used by
//! the pipeline, their backends (memory, filesystem, blob container,
//! document database), the [`LruCache`] building block, and the factories
//! that build a backend from typed configuration.

pub mod backend;
pub mod cache;
pub mod connection_string;
pub mod cosmos;
pub mod credential;
pub mod factory;
pub mod lru;

pub use backend::{BlobStorage, FileStorage, MemoryStorage};
pub use cache::{CosmosCache, DebugData, JsonCache, MemoryCache, NoopCache, PipelineCache};
pub use cosmos::{
    CosmosConnection, CosmosCredentialSource, CosmosStorage, DocumentContainer, DocumentDatabase,
    DocumentQuery, InMemoryDocumentDatabase, RestDocumentDatabase, MAX_ITEM_LENGTH,
};
pub use credential::{AccessToken, ManagedIdentityCredential, TokenCredential};
pub use factory::{create_storage, load_cache, load_storage, load_table_from_storage};
pub use lru::LruCache;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use regex::Regex;
use tessera_core::{Content, ReadAs, StorageError, Table, TesseraResult, TextEncoding};

/// Named capture groups of a [`FindOptions::pattern`] match.
pub type Metadata = HashMap<String, String>;

/// Lazy sequence of `(key, metadata)` pairs produced by
/// [`PipelineStorage::find`].
pub type FindStream<'a> = BoxStream<'a, TesseraResult<(String, Metadata)>>;

// ============================================================================
// FIND OPTIONS
// ============================================================================

/// Parameters of a [`PipelineStorage::find`] discovery scan.
///
/// `pattern` is searched (unanchored) in each candidate key, relative to the
/// storage root. Its named groups become the item's [`Metadata`]. Every
/// `file_filter` regex must match its metadata value from the start.
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub pattern: Regex,
    pub base_dir: Option<String>,
    pub file_filter: Option<HashMap<String, Regex>>,
    pub max_count: Option<usize>,
}

impl FindOptions {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            base_dir: None,
            file_filter: None,
            max_count: None,
        }
    }

    /// Restrict the scan to keys under `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<String>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Require the named group `group` to match `filter`.
    pub fn with_filter(mut self, group: impl Into<String>, filter: Regex) -> Self {
        self.file_filter
            .get_or_insert_with(HashMap::new)
            .insert(group.into(), filter);
        self
    }

    /// Stop after `max_count` matches.
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Match `key`, returning its metadata when the pattern and every filter
    /// accept it.
    pub fn matches(&self, key: &str) -> Option<Metadata> {
        let captures = self.pattern.captures(key)?;
        let metadata: Metadata = self
            .pattern
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        let accepted = self.file_filter.iter().flatten().all(|(group, filter)| {
            metadata
                .get(group)
                .and_then(|value| filter.find(value))
                .is_some_and(|m| m.start() == 0)
        });
        accepted.then_some(metadata)
    }

    pub fn limit(&self) -> usize {
        self.max_count.unwrap_or(usize::MAX)
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Durable key/value storage used by the pipeline.
///
/// Every backend honours the same contract:
/// - `get` on a missing key returns `Ok(None)`, never an error
/// - `set` overwrites an existing key, including its text/binary kind
/// - `delete` on a missing key is a no-op
/// - `clear` destroys the whole backing collection of this scope
///
/// `child` scoping depends on the backend. Memory, file and blob storage
/// root the child under a sub-path; the document database has no hierarchy
/// and returns a handle to the same collection.
#[async_trait]
pub trait PipelineStorage: Send + Sync {
    /// Get the value for `key` as bytes or decoded text.
    async fn get(&self, key: &str, read: ReadAs) -> TesseraResult<Option<Content>>;

    /// Store `value` under `key`. Text is encoded with `encoding`
    /// (or UTF-8) on backends that store bytes. The document database keeps
    /// text as a JSON string and ignores `encoding`.
    async fn set(
        &self,
        key: &str,
        value: Content,
        encoding: Option<TextEncoding>,
    ) -> TesseraResult<()>;

    async fn has(&self, key: &str) -> TesseraResult<bool>;

    async fn delete(&self, key: &str) -> TesseraResult<()>;

    /// Destroy the backing collection and any local memoization.
    async fn clear(&self) -> TesseraResult<()>;

    /// Every key in this scope. May scan the whole collection.
    async fn keys(&self) -> TesseraResult<Vec<String>>;

    /// Discover keys matching `options`. Intended for reporting and
    /// debugging, not as a query language.
    async fn find(&self, options: FindOptions) -> TesseraResult<FindStream<'_>>;

    /// A scoped view on the same backing store. `None` returns a view of
    /// this scope.
    fn child(&self, name: Option<&str>) -> Arc<dyn PipelineStorage>;

    /// Load a whole named table.
    ///
    /// By default the entry called `name` is read as bytes and parsed with
    /// the format implied by its extension.
    async fn load_table(&self, name: &str) -> TesseraResult<Table> {
        read_table_entry(self, name).await
    }

    /// Get `key` as UTF-8 text.
    async fn get_text(&self, key: &str) -> TesseraResult<Option<String>> {
        match self.get(key, ReadAs::text()).await? {
            Some(content) => Ok(Some(content.into_text(TextEncoding::Utf8)?)),
            None => Ok(None),
        }
    }

    /// Get `key` as raw bytes.
    async fn get_bytes(&self, key: &str) -> TesseraResult<Option<Vec<u8>>> {
        match self.get(key, ReadAs::Bytes).await? {
            Some(content) => Ok(Some(content.into_bytes(TextEncoding::Utf8)?)),
            None => Ok(None),
        }
    }
}

/// Read entry `name` as bytes and parse it as a table.
pub(crate) async fn read_table_entry<S>(storage: &S, name: &str) -> TesseraResult<Table>
where
    S: PipelineStorage + ?Sized,
{
    let bytes = storage
        .get_bytes(name)
        .await?
        .ok_or_else(|| StorageError::NotFound {
            resource: name.to_string(),
        })?;
    Table::parse(name, &bytes)
}

/// Reshape a stored value into what the caller asked for.
pub(crate) fn reshape(content: Content, read: ReadAs) -> TesseraResult<Content> {
    Ok(content.read_as(read)?)
}

/// Join two `/`-separated key segments, ignoring empty ones.
pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, key),
    }
}
