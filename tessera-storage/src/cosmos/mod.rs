//! Document-database storage.
//!
//! [`CosmosStorage`] keeps raw values in a `_raw` container, one document per
//! key (`{id, value, encoded}`), and whole tables in `_<table>` containers.
//! Every container is partitioned by document id. Reads go through a local
//! TTL cache that only keeps values no concurrent write could have
//! superseded.

mod client;
mod emulator;
mod rest;
mod ttl;

pub use client::{DocumentContainer, DocumentDatabase, DocumentQuery, MAX_ITEM_LENGTH, PARTITION_KEY_PATH};
pub use emulator::InMemoryDocumentDatabase;
pub use rest::{RestDocumentDatabase, COSMOS_SCOPE};
pub use ttl::DEFAULT_CACHE_TTL;
pub(crate) use ttl::TtlCache;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tessera_core::{
    resolve_optional, resolve_required, ConfigError, Content, CosmosSettings, EncodingError, Env,
    ProcessEnv, ReadAs, Source, StorageError, Table, TesseraResult, TextEncoding,
};
use tracing::{debug, info};

use crate::connection_string::ConnectionString;
use crate::credential::{ManagedIdentityCredential, TokenCredential};
use crate::{read_table_entry, reshape, FindOptions, FindStream, PipelineStorage};
use client::is_conflict;

/// Container holding raw key/value documents.
pub const RAW_CONTAINER: &str = "_raw";

/// System properties the service adds to every document.
const SYSTEM_PROPERTIES: [&str; 5] = ["_rid", "_self", "_etag", "_attachments", "_ts"];

// ============================================================================
// CONNECTION RESOLUTION
// ============================================================================

/// How requests are authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum CosmosCredentialSource {
    AccountKey(String),
    /// Managed identity of the hosting resource.
    Ambient,
}

impl fmt::Debug for CosmosCredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountKey(_) => f.write_str("AccountKey([REDACTED])"),
            Self::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Fully resolved connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosConnection {
    pub database: String,
    pub endpoint: String,
    pub credential: CosmosCredentialSource,
}

impl CosmosConnection {
    /// Resolve settings against the environment.
    ///
    /// Explicit settings win over environment variables; empty values count
    /// as absent:
    /// - database: `database_name`, `GRAPH_DATABASE_ID`, `COSMOS_DATABASE_ID`
    /// - connection string: `connection_string`, `COSMOS_CONNECTION_STRING`
    /// - otherwise host: `account_name`, `COSMOS_ACCOUNT_NAME`,
    ///   `COSMOS_ACCOUNT_HOST`; key: `account_key`, `COSMOS_ACCOUNT_KEY`,
    ///   falling back to the ambient managed identity.
    pub fn resolve(settings: &CosmosSettings, env: &dyn Env) -> Result<Self, ConfigError> {
        let database = resolve_required(
            "database_name",
            &[
                Source::Explicit(settings.database_name.as_deref()),
                Source::Env("GRAPH_DATABASE_ID"),
                Source::Env("COSMOS_DATABASE_ID"),
            ],
            env,
        )?;

        let connection_string = resolve_optional(
            &[
                Source::Explicit(settings.connection_string.as_deref()),
                Source::Env("COSMOS_CONNECTION_STRING"),
            ],
            env,
        );
        if let Some(connection_string) = connection_string {
            let cs = ConnectionString::parse(&connection_string);
            let invalid = |reason: &str| ConfigError::InvalidValue {
                field: "connection_string".to_string(),
                value: "<redacted>".to_string(),
                reason: reason.to_string(),
            };
            let endpoint = cs
                .get("AccountEndpoint")
                .ok_or_else(|| invalid("missing AccountEndpoint"))?;
            let key = cs
                .get("AccountKey")
                .ok_or_else(|| invalid("missing AccountKey"))?;
            return Ok(Self {
                database,
                endpoint: endpoint.to_string(),
                credential: CosmosCredentialSource::AccountKey(key.to_string()),
            });
        }

        let host = resolve_required(
            "account_name",
            &[
                Source::Explicit(settings.account_name.as_deref()),
                Source::Env("COSMOS_ACCOUNT_NAME"),
                Source::Env("COSMOS_ACCOUNT_HOST"),
            ],
            env,
        )?;
        let credential = resolve_optional(
            &[
                Source::Explicit(settings.account_key.as_deref()),
                Source::Env("COSMOS_ACCOUNT_KEY"),
            ],
            env,
        )
        .map(CosmosCredentialSource::AccountKey)
        .unwrap_or(CosmosCredentialSource::Ambient);

        Ok(Self {
            database,
            endpoint: normalize_host(&host),
            credential,
        })
    }
}

/// `acct` -> `https://acct.documents.azure.com:443/`
fn normalize_host(host: &str) -> String {
    let mut endpoint = if host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };
    if !endpoint.contains('.') {
        endpoint.push_str(".documents.azure.com:443/");
    }
    endpoint
}

// ============================================================================
// STORAGE
// ============================================================================

/// Storage on a document database.
///
/// Clones share the database handle, the known-container set and the local
/// cache.
#[derive(Clone)]
pub struct CosmosStorage {
    db: Arc<dyn DocumentDatabase>,
    containers: Arc<RwLock<HashSet<String>>>,
    local: Arc<TtlCache<Content>>,
}

impl fmt::Debug for CosmosStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosStorage")
            .field("database", &self.db.database_name())
            .field("cache_ttl", &self.local.ttl())
            .finish()
    }
}

impl CosmosStorage {
    /// Open storage on `db`, loading the names of its existing containers.
    pub async fn open(db: Arc<dyn DocumentDatabase>) -> TesseraResult<Self> {
        let known: HashSet<String> = db.list_containers().await?.into_iter().collect();
        info!(
            backend = "cosmos",
            database = %db.database_name(),
            containers = known.len(),
            "Opened document storage"
        );
        Ok(Self {
            db,
            containers: Arc::new(RwLock::new(known)),
            local: Arc::new(TtlCache::new(DEFAULT_CACHE_TTL)),
        })
    }

    /// Connect using settings and the process environment.
    pub async fn connect(settings: &CosmosSettings) -> TesseraResult<Self> {
        Self::connect_with(settings, &ProcessEnv).await
    }

    /// Connect using settings and an explicit environment.
    pub async fn connect_with(settings: &CosmosSettings, env: &dyn Env) -> TesseraResult<Self> {
        let connection = CosmosConnection::resolve(settings, env)?;
        let db = match connection.credential {
            CosmosCredentialSource::AccountKey(key) => RestDocumentDatabase::with_master_key(
                connection.endpoint,
                connection.database,
                &key,
            )?,
            CosmosCredentialSource::Ambient => {
                let credential: Arc<dyn TokenCredential> =
                    Arc::new(ManagedIdentityCredential::from_env(env));
                RestDocumentDatabase::with_credential(
                    connection.endpoint,
                    connection.database,
                    credential,
                )
            }
        };
        Self::open(Arc::new(db)).await
    }

    /// Replace the local read cache with one using `ttl`.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.local = Arc::new(TtlCache::new(ttl));
        self
    }

    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        &self.db
    }

    fn is_known(&self, name: &str) -> TesseraResult<bool> {
        Ok(self
            .containers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains(name))
    }

    /// Handle to container `name`.
    ///
    /// Returns `None` when the container does not exist and
    /// `create_if_missing` is false.
    pub async fn container(
        &self,
        name: &str,
        create_if_missing: bool,
    ) -> TesseraResult<Option<DocumentContainer>> {
        if self.is_known(name)? {
            return Ok(Some(DocumentContainer::new(Arc::clone(&self.db), name)));
        }
        if !create_if_missing {
            return Ok(None);
        }
        match self.db.create_container(name, PARTITION_KEY_PATH).await {
            Ok(()) => debug!(container = %name, "Created container"),
            Err(e) if is_conflict(&e) => {}
            Err(e) => return Err(e),
        }
        self.containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(name.to_string());
        Ok(Some(DocumentContainer::new(Arc::clone(&self.db), name)))
    }

    /// Handle to container `name`, creating it when missing.
    pub async fn ensure_container(&self, name: &str) -> TesseraResult<DocumentContainer> {
        self.container(name, true)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound {
                    resource: name.to_string(),
                }
                .into()
            })
    }

    /// Delete container `name`. It is recreated on next use.
    pub async fn drop_container(&self, name: &str) -> TesseraResult<()> {
        match self.db.delete_container(name).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        self.containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(name);
        debug!(container = %name, "Dropped container");
        Ok(())
    }

    /// Write `table` into container `_<stem of name>`, one document per row.
    ///
    /// Rows without an `id` get their index; numeric ids become strings.
    /// Returns the number of rows written.
    pub async fn write_table(&self, name: &str, table: &Table) -> TesseraResult<usize> {
        let container = self.ensure_container(&table_container_name(name)).await?;
        for (index, row) in table.rows.iter().enumerate() {
            let mut document = row.clone();
            let id = match document.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => index.to_string(),
            };
            document.insert("id".to_string(), Value::String(id));
            container.upsert(&Value::Object(document)).await?;
        }
        debug!(table = %name, rows = table.len(), "Wrote table");
        Ok(table.len())
    }

    async fn raw(&self) -> TesseraResult<DocumentContainer> {
        self.ensure_container(RAW_CONTAINER).await
    }
}

/// `create_final_nodes.parquet` -> `_create_final_nodes`
fn table_container_name(name: &str) -> String {
    let stem = match name.find('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    format!("_{}", stem)
}

fn encode_raw_item(key: &str, value: &Content) -> Value {
    match value {
        Content::Text(text) => json!({ "id": key, "value": text, "encoded": false }),
        Content::Binary(bytes) => {
            json!({ "id": key, "value": BASE64.encode(bytes), "encoded": true })
        }
    }
}

fn decode_raw_item(item: &Value) -> TesseraResult<Content> {
    let value = item.get("value").and_then(Value::as_str).unwrap_or_default();
    if item.get("encoded").and_then(Value::as_bool).unwrap_or(false) {
        let bytes = BASE64
            .decode(value)
            .map_err(|e| EncodingError::InvalidBase64 {
                reason: e.to_string(),
            })?;
        Ok(Content::Binary(bytes))
    } else {
        Ok(Content::Text(value.to_string()))
    }
}

fn strip_system_properties(item: Value) -> Option<Map<String, Value>> {
    match item {
        Value::Object(mut fields) => {
            for property in SYSTEM_PROPERTIES {
                fields.remove(property);
            }
            Some(fields)
        }
        _ => None,
    }
}

#[async_trait]
impl PipelineStorage for CosmosStorage {
    async fn get(&self, key: &str, read: ReadAs) -> TesseraResult<Option<Content>> {
        if let Some(content) = self.local.get(key)? {
            return reshape(content, read).map(Some);
        }
        let ticket = self.local.read_ticket(key)?;
        let Some(item) = self.raw().await?.read(key).await? else {
            return Ok(None);
        };
        let content = decode_raw_item(&item)?;
        self.local.fill(key, content.clone(), ticket)?;
        reshape(content, read).map(Some)
    }

    async fn set(
        &self,
        key: &str,
        value: Content,
        _encoding: Option<TextEncoding>,
    ) -> TesseraResult<()> {
        let pending = self.local.begin_write(key)?;
        self.raw().await?.upsert(&encode_raw_item(key, &value)).await?;
        pending.commit(Some(value))
    }

    async fn has(&self, key: &str) -> TesseraResult<bool> {
        Ok(self.get(key, ReadAs::Bytes).await?.is_some())
    }

    async fn delete(&self, key: &str) -> TesseraResult<()> {
        let pending = self.local.begin_write(key)?;
        self.raw().await?.delete(key).await?;
        pending.commit(None)
    }

    async fn clear(&self) -> TesseraResult<()> {
        self.drop_container(RAW_CONTAINER).await?;
        self.local.clear()
    }

    async fn keys(&self) -> TesseraResult<Vec<String>> {
        let items = self.raw().await?.query(&DocumentQuery::Ids).await?;
        Ok(items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn find(&self, options: FindOptions) -> TesseraResult<FindStream<'_>> {
        let query = DocumentQuery::IdMatches(options.pattern.as_str().to_string());
        let items = self.raw().await?.query(&query).await?;
        let base = options
            .base_dir
            .as_deref()
            .map(|dir| dir.trim_matches('/'))
            .filter(|dir| !dir.is_empty())
            .map(|dir| format!("{}/", dir));

        let matched: Vec<_> = items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .filter(|id| base.as_deref().map_or(true, |b| id.starts_with(b)))
            .filter_map(|id| options.matches(id).map(|metadata| Ok((id.to_string(), metadata))))
            .take(options.limit())
            .collect();
        Ok(stream::iter(matched).boxed())
    }

    /// The database has no hierarchy; every child is this storage.
    fn child(&self, _name: Option<&str>) -> Arc<dyn PipelineStorage> {
        Arc::new(self.clone())
    }

    /// Rows of container `_<stem>` when it exists, the `_raw` entry
    /// otherwise.
    async fn load_table(&self, name: &str) -> TesseraResult<Table> {
        let container_name = table_container_name(name);
        match self.container(&container_name, false).await? {
            Some(container) => {
                let items = container.query(&DocumentQuery::All).await?;
                let rows: Vec<_> = items.into_iter().filter_map(strip_system_properties).collect();
                debug!(table = %name, container = %container_name, rows = rows.len(), "Loaded table");
                Ok(Table::new(rows))
            }
            None => read_table_entry(self, name).await,
        }
    }
}
