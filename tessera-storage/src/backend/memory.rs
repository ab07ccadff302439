//! In-process storage backed by a shared map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tessera_core::{Content, ReadAs, StorageError, TesseraResult, TextEncoding};

use crate::{join_key, reshape, FindOptions, FindStream, PipelineStorage};

/// Storage held in memory for the lifetime of the process.
///
/// Binary values and UTF-8 text are kept exactly as written. Text stored
/// with another encoding is kept as its encoded bytes, the way the file and
/// blob backends would write it. Children share the same map under a `name/`
/// key prefix.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, Content>>>,
    prefix: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn read_entries(
        &self,
    ) -> TesseraResult<std::sync::RwLockReadGuard<'_, HashMap<String, Content>>> {
        self.entries
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_entries(
        &self,
    ) -> TesseraResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Content>>> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Keys in this scope, relative to the scope.
    fn scoped_keys(&self) -> TesseraResult<Vec<String>> {
        let entries = self.read_entries()?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl PipelineStorage for MemoryStorage {
    async fn get(&self, key: &str, read: ReadAs) -> TesseraResult<Option<Content>> {
        let value = self.read_entries()?.get(&self.full_key(key)).cloned();
        value.map(|content| reshape(content, read)).transpose()
    }

    async fn set(
        &self,
        key: &str,
        value: Content,
        encoding: Option<TextEncoding>,
    ) -> TesseraResult<()> {
        let value = match (value, encoding) {
            (Content::Text(text), Some(encoding)) if encoding != TextEncoding::Utf8 => {
                Content::Binary(encoding.encode(&text)?)
            }
            (value, _) => value,
        };
        self.write_entries()?.insert(self.full_key(key), value);
        Ok(())
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        Ok(self.read_entries()?.contains_key(&self.full_key(key)))
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        self.write_entries()?.remove(&self.full_key(key));
        Ok(())
    }

    async fn clear(&self) -> TesseraResult<()> {
        let mut entries = self.write_entries()?;
        if self.prefix.is_empty() {
            entries.clear();
        } else {
            entries.retain(|k, _| !k.starts_with(self.prefix.as_str()));
        }
        Ok(())
    }

    async fn keys(&self) -> TesseraResult<Vec<String>> {
        self.scoped_keys()
    }

    async fn find(&self, options: FindOptions) -> TesseraResult<FindStream<'_>> {
        let base = options
            .base_dir
            .as_deref()
            .map(|dir| join_key(dir, ""))
            .unwrap_or_default();
        let limit = options.limit();
        let matched: Vec<_> = self
            .scoped_keys()?
            .into_iter()
            .filter(|key| base.is_empty() || key.starts_with(&format!("{}/", base)))
            .filter_map(|key| options.matches(&key).map(|metadata| Ok((key, metadata))))
            .take(limit)
            .collect();
        Ok(stream::iter(matched).boxed())
    }

    fn child(&self, name: Option<&str>) -> Arc<dyn PipelineStorage> {
        let prefix = match name.map(|n| n.trim_matches('/')).filter(|n| !n.is_empty()) {
            Some(name) => format!("{}{}/", self.prefix, name),
            None => self.prefix.clone(),
        };
        Arc::new(Self {
            entries: Arc::clone(&self.entries),
            prefix,
        })
    }
}
