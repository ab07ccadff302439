//! Storage in a blob container.
//!
//! The backend talks to any [`ObjectStore`]; [`BlobStorage::connect`] builds
//! an Azure Blob client from [`BlobSettings`]. Keys map to blob names under
//! an optional path prefix inside the container.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{StreamExt, TryStreamExt};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as BlobPath;
use object_store::{ObjectStore, PutPayload};
use tessera_core::{
    BlobSettings, ConfigError, Content, ReadAs, StorageError, TesseraError, TesseraResult,
    TextEncoding,
};
use tracing::{debug, info};

use crate::connection_string::ConnectionString;
use crate::{join_key, reshape, FindOptions, FindStream, PipelineStorage};

#[derive(Debug, Clone)]
pub struct BlobStorage {
    store: Arc<dyn ObjectStore>,
    container: String,
    prefix: String,
    encoding: TextEncoding,
}

impl BlobStorage {
    /// Wrap an existing object store. `prefix` is the path inside the
    /// container that this storage is rooted at.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        container: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            prefix: join_key(&prefix.into(), ""),
            encoding: TextEncoding::Utf8,
        }
    }

    /// Connect to an Azure Blob container.
    ///
    /// Credentials come from `connection_string` when present. Otherwise
    /// `storage_account_blob_url` names the account and the ambient managed
    /// identity is used.
    pub fn connect(settings: &BlobSettings) -> TesseraResult<Self> {
        let container = settings
            .container_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "container_name".to_string(),
            })?;

        let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);
        match (
            settings.connection_string.as_deref().filter(|c| !c.is_empty()),
            settings
                .storage_account_blob_url
                .as_deref()
                .filter(|u| !u.is_empty()),
        ) {
            (Some(connection_string), _) => {
                builder = apply_connection_string(builder, connection_string)?;
            }
            (None, Some(url)) => {
                builder = builder.with_url(url);
            }
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    field: "connection_string or storage_account_blob_url".to_string(),
                }
                .into())
            }
        }

        let store = builder.build().map_err(|e| ConfigError::InvalidValue {
            field: "blob".to_string(),
            value: container.to_string(),
            reason: e.to_string(),
        })?;
        info!(container = %container, "Connected to blob container");
        Ok(Self::new(
            Arc::new(store),
            container,
            settings.base_dir.clone().unwrap_or_default(),
        ))
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn location(&self, key: &str) -> BlobPath {
        BlobPath::from(join_key(&self.prefix, key))
    }

    fn scope(&self) -> Option<BlobPath> {
        (!self.prefix.is_empty()).then(|| BlobPath::from(self.prefix.as_str()))
    }

    fn relative_key(&self, location: &BlobPath) -> String {
        let full = location.as_ref();
        if self.prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
            .to_string()
    }
}

fn apply_connection_string(
    builder: MicrosoftAzureBuilder,
    connection_string: &str,
) -> TesseraResult<MicrosoftAzureBuilder> {
    let cs = ConnectionString::parse(connection_string);
    if cs
        .get("UseDevelopmentStorage")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return Ok(builder.with_use_emulator(true));
    }

    let account = cs
        .get("AccountName")
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "connection_string".to_string(),
            value: "<redacted>".to_string(),
            reason: "missing AccountName".to_string(),
        })?;
    let mut builder = builder.with_account(account);
    if let Some(key) = cs.get("AccountKey") {
        builder = builder.with_access_key(key);
    }
    if let Some(endpoint) = cs.get("BlobEndpoint") {
        builder = builder.with_endpoint(endpoint.to_string());
    }
    Ok(builder)
}

fn blob_error(err: object_store::Error) -> TesseraError {
    match err {
        object_store::Error::NotFound { path, .. } => {
            StorageError::NotFound { resource: path }.into()
        }
        other => StorageError::Transport {
            reason: other.to_string(),
        }
        .into(),
    }
}

#[async_trait]
impl PipelineStorage for BlobStorage {
    async fn get(&self, key: &str, read: ReadAs) -> TesseraResult<Option<Content>> {
        let result = match self.store.get(&self.location(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(blob_error(e)),
        };
        let bytes = result.bytes().await.map_err(blob_error)?;
        reshape(Content::Binary(bytes.to_vec()), read).map(Some)
    }

    async fn set(
        &self,
        key: &str,
        value: Content,
        encoding: Option<TextEncoding>,
    ) -> TesseraResult<()> {
        let bytes = value.into_bytes(encoding.unwrap_or(self.encoding))?;
        self.store
            .put(&self.location(key), PutPayload::from(bytes))
            .await
            .map_err(blob_error)?;
        Ok(())
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(blob_error(e)),
        }
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        match self.store.delete(&self.location(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(blob_error(e)),
        }
    }

    /// Delete every blob under this storage's prefix.
    async fn clear(&self) -> TesseraResult<()> {
        debug!(container = %self.container, prefix = %self.prefix, "Clearing blob storage");
        let scope = self.scope();
        let locations = self
            .store
            .list(scope.as_ref())
            .map_ok(|meta| meta.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_for_each(|_| future::ready(Ok(())))
            .await
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(()),
                other => Err(blob_error(other)),
            })
    }

    async fn keys(&self) -> TesseraResult<Vec<String>> {
        let scope = self.scope();
        let metas: Vec<_> = self
            .store
            .list(scope.as_ref())
            .try_collect()
            .await
            .map_err(blob_error)?;
        Ok(metas
            .iter()
            .map(|meta| self.relative_key(&meta.location))
            .collect())
    }

    async fn find(&self, options: FindOptions) -> TesseraResult<FindStream<'_>> {
        let base = match options.base_dir.as_deref() {
            Some(dir) if !dir.is_empty() => Some(self.location(dir)),
            _ => self.scope(),
        };
        debug!(container = %self.container, pattern = %options.pattern, "Searching blob storage");
        let limit = options.limit();
        let stream = self
            .store
            .list(base.as_ref())
            .map_err(blob_error)
            .try_filter_map(move |meta| {
                let key = self.relative_key(&meta.location);
                let matched = options.matches(&key).map(|metadata| (key, metadata));
                future::ready(Ok(matched))
            })
            .take(limit)
            .boxed();
        Ok(stream)
    }

    fn child(&self, name: Option<&str>) -> Arc<dyn PipelineStorage> {
        let prefix = match name.filter(|n| !n.is_empty()) {
            Some(name) => join_key(&self.prefix, name),
            None => self.prefix.clone(),
        };
        Arc::new(Self {
            store: Arc::clone(&self.store),
            container: self.container.clone(),
            prefix,
            encoding: self.encoding,
        })
    }
}
