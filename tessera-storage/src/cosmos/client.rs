//! Document database client seam.
//!
//! [`DocumentDatabase`] is the minimal set of database operations the
//! document-database backend needs. [`RestDocumentDatabase`] talks to the
//! service; [`InMemoryDocumentDatabase`] emulates it in-process.
//!
//! [`RestDocumentDatabase`]: super::RestDocumentDatabase
//! [`InMemoryDocumentDatabase`]: super::InMemoryDocumentDatabase

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tessera_core::{StorageError, TesseraResult};

/// Largest serialized document accepted by [`DocumentContainer::upsert`]
/// (1.8 MiB).
pub const MAX_ITEM_LENGTH: usize = 1_887_436;

/// Partition key path of every container this crate creates.
pub const PARTITION_KEY_PATH: &str = "/id";

/// Queries issued against a container. All are parameterized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentQuery {
    /// Every document (cross-partition).
    All,
    /// Only the `id` of every document (cross-partition).
    Ids,
    /// The document with this id (single partition).
    ById(String),
    /// Ids matching a regular expression (cross-partition).
    IdMatches(String),
}

impl DocumentQuery {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::All => "SELECT * FROM c",
            Self::Ids => "SELECT c.id FROM c",
            Self::ById(_) => "SELECT * FROM c WHERE c.id = @id",
            Self::IdMatches(_) => "SELECT c.id FROM c WHERE RegexMatch(c.id, @pattern)",
        }
    }

    pub fn parameters(&self) -> Vec<Value> {
        match self {
            Self::All | Self::Ids => Vec::new(),
            Self::ById(id) => vec![json!({ "name": "@id", "value": id })],
            Self::IdMatches(pattern) => vec![json!({ "name": "@pattern", "value": pattern })],
        }
    }

    /// The partition the query is confined to, if any.
    pub fn partition_key(&self) -> Option<&str> {
        match self {
            Self::ById(id) => Some(id.as_str()),
            Self::All | Self::Ids | Self::IdMatches(_) => None,
        }
    }

    pub fn is_cross_partition(&self) -> bool {
        self.partition_key().is_none()
    }

    /// Request body in the service's query format.
    pub fn to_body(&self) -> Value {
        json!({ "query": self.sql(), "parameters": self.parameters() })
    }
}

/// Operations on one database.
///
/// Missing containers and documents are reported as
/// [`StorageError::NotFound`]; creating an existing container as
/// `StorageError::Backend { status: 409, .. }`.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    fn database_name(&self) -> &str;

    async fn list_containers(&self) -> TesseraResult<Vec<String>>;

    async fn create_container(&self, name: &str, partition_key_path: &str) -> TesseraResult<()>;

    async fn delete_container(&self, name: &str) -> TesseraResult<()>;

    async fn upsert_item(&self, container: &str, partition_key: &str, item: &Value)
        -> TesseraResult<()>;

    async fn delete_item(&self, container: &str, id: &str, partition_key: &str)
        -> TesseraResult<()>;

    async fn query_items(&self, container: &str, query: &DocumentQuery)
        -> TesseraResult<Vec<Value>>;
}

pub(crate) fn is_conflict(err: &tessera_core::TesseraError) -> bool {
    matches!(
        err,
        tessera_core::TesseraError::Storage(StorageError::Backend { status: 409, .. })
    )
}

/// Handle to one container, partitioned by document id.
#[derive(Clone)]
pub struct DocumentContainer {
    db: Arc<dyn DocumentDatabase>,
    name: String,
}

impl std::fmt::Debug for DocumentContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentContainer")
            .field("database", &self.db.database_name())
            .field("name", &self.name)
            .finish()
    }
}

impl DocumentContainer {
    pub fn new(db: Arc<dyn DocumentDatabase>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace `item`, which must carry a string `id`.
    ///
    /// Documents whose serialized form exceeds [`MAX_ITEM_LENGTH`] are
    /// rejected before any request is made.
    pub async fn upsert(&self, item: &Value) -> TesseraResult<()> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::InvalidKey {
                key: item.get("id").map(Value::to_string).unwrap_or_default(),
                reason: "document id must be a string".to_string(),
            })?;
        let size = serde_json::to_vec(item)?.len();
        if size > MAX_ITEM_LENGTH {
            return Err(StorageError::ItemTooLarge {
                key: id.to_string(),
                size,
                limit: MAX_ITEM_LENGTH,
            }
            .into());
        }
        self.db.upsert_item(&self.name, id, item).await
    }

    /// Point lookup by id.
    pub async fn read(&self, id: &str) -> TesseraResult<Option<Value>> {
        match self.query(&DocumentQuery::ById(id.to_string())).await {
            Ok(items) => Ok(items.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete by id. A missing document is not an error.
    pub async fn delete(&self, id: &str) -> TesseraResult<()> {
        match self.db.delete_item(&self.name, id, id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn query(&self, query: &DocumentQuery) -> TesseraResult<Vec<Value>> {
        self.db.query_items(&self.name, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmos::InMemoryDocumentDatabase;

    fn container() -> DocumentContainer {
        let db = InMemoryDocumentDatabase::new("db");
        db.insert_container("docs");
        DocumentContainer::new(Arc::new(db), "docs")
    }

    #[test]
    fn test_query_shapes() {
        let by_id = DocumentQuery::ById("a'b".to_string());
        assert_eq!(by_id.sql(), "SELECT * FROM c WHERE c.id = @id");
        assert_eq!(by_id.parameters(), vec![json!({"name": "@id", "value": "a'b"})]);
        assert_eq!(by_id.partition_key(), Some("a'b"));
        assert!(DocumentQuery::All.is_cross_partition());
        assert_eq!(DocumentQuery::Ids.sql(), "SELECT c.id FROM c");
        assert!(DocumentQuery::Ids.parameters().is_empty());
        assert!(DocumentQuery::Ids.is_cross_partition());
        assert!(DocumentQuery::IdMatches("^x".to_string())
            .sql()
            .starts_with("SELECT c.id FROM c"));
        assert_eq!(
            DocumentQuery::IdMatches("^x".to_string()).to_body()["parameters"][0]["value"],
            json!("^x")
        );
    }

    #[tokio::test]
    async fn test_upsert_rejects_oversized_documents() {
        let container = container();
        let item = json!({ "id": "big", "value": "x".repeat(MAX_ITEM_LENGTH) });
        let err = container.upsert(&item).await.unwrap_err();
        assert!(matches!(
            err,
            tessera_core::TesseraError::Storage(StorageError::ItemTooLarge { ref key, limit, .. })
                if key == "big" && limit == MAX_ITEM_LENGTH
        ));
        assert!(container.read("big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_requires_string_id() {
        let container = container();
        assert!(container.upsert(&json!({ "id": 7 })).await.is_err());
        assert!(container.upsert(&json!({ "value": 1 })).await.is_err());
    }

    #[tokio::test]
    async fn test_read_and_idempotent_delete() {
        let container = container();
        container.upsert(&json!({ "id": "a", "value": 1 })).await.unwrap();
        assert_eq!(container.read("a").await.unwrap().unwrap()["value"], json!(1));
        container.delete("a").await.unwrap();
        container.delete("a").await.unwrap();
        assert!(container.read("a").await.unwrap().is_none());
    }
}
