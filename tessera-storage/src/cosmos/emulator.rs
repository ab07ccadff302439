//! In-process document database.
//!
//! Behaves like the service for everything the storage layer relies on:
//! containers partitioned by id, 404 for missing containers and documents,
//! 409 when creating an existing container, system properties on stored
//! documents, and regex id queries.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tessera_core::{StorageError, TesseraResult};

use super::client::{DocumentDatabase, DocumentQuery};

type Containers = HashMap<String, BTreeMap<String, Value>>;

/// Shared-state emulator. Clones see the same data, so a test can keep a
/// handle while the storage under test owns another.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentDatabase {
    name: String,
    containers: Arc<RwLock<Containers>>,
    queries: Arc<AtomicUsize>,
}

impl InMemoryDocumentDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containers: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an empty container directly, bypassing the client API.
    pub fn insert_container(&self, name: &str) {
        if let Ok(mut containers) = self.containers.write() {
            containers.entry(name.to_string()).or_default();
        }
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers
            .read()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn not_found(resource: String) -> tessera_core::TesseraError {
        StorageError::NotFound { resource }.into()
    }
}

#[async_trait]
impl DocumentDatabase for InMemoryDocumentDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn list_containers(&self) -> TesseraResult<Vec<String>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut names: Vec<String> = containers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_container(&self, name: &str, _partition_key_path: &str) -> TesseraResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if containers.contains_key(name) {
            return Err(StorageError::Backend {
                status: 409,
                message: format!("container {} already exists", name),
            }
            .into());
        }
        containers.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> TesseraResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(format!("dbs/{}/colls/{}", self.name, name)))
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        item: &Value,
    ) -> TesseraResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let documents = containers
            .get_mut(container)
            .ok_or_else(|| Self::not_found(format!("dbs/{}/colls/{}", self.name, container)))?;

        let mut stored = item.clone();
        if let Value::Object(fields) = &mut stored {
            let ts = chrono::Utc::now().timestamp();
            fields.insert("_rid".to_string(), json!(format!("rid-{}", partition_key)));
            fields.insert("_etag".to_string(), json!(format!("\"{}\"", ts)));
            fields.insert("_ts".to_string(), json!(ts));
        }
        documents.insert(partition_key.to_string(), stored);
        Ok(())
    }

    async fn delete_item(
        &self,
        container: &str,
        id: &str,
        _partition_key: &str,
    ) -> TesseraResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let documents = containers
            .get_mut(container)
            .ok_or_else(|| Self::not_found(format!("dbs/{}/colls/{}", self.name, container)))?;
        documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(format!("dbs/{}/colls/{}/docs/{}", self.name, container, id)))
    }

    async fn query_items(
        &self,
        container: &str,
        query: &DocumentQuery,
    ) -> TesseraResult<Vec<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let containers = self
            .containers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let documents = containers
            .get(container)
            .ok_or_else(|| Self::not_found(format!("dbs/{}/colls/{}", self.name, container)))?;

        let items = match query {
            DocumentQuery::All => documents.values().cloned().collect(),
            DocumentQuery::Ids => documents.keys().map(|id| json!({ "id": id })).collect(),
            DocumentQuery::ById(id) => documents.get(id).cloned().into_iter().collect(),
            DocumentQuery::IdMatches(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| StorageError::Backend {
                    status: 400,
                    message: format!("invalid RegexMatch pattern: {}", e),
                })?;
                documents
                    .keys()
                    .filter(|id| regex.is_match(id))
                    .map(|id| json!({ "id": id }))
                    .collect()
            }
        };
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_container_lifecycle() {
        let db = InMemoryDocumentDatabase::new("db");
        db.create_container("a", "/id").await.unwrap();
        let err = db.create_container("a", "/id").await.unwrap_err();
        assert!(crate::cosmos::client::is_conflict(&err));
        assert_eq!(db.list_containers().await.unwrap(), vec!["a".to_string()]);

        db.delete_container("a").await.unwrap();
        assert!(db.delete_container("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_documents_get_system_properties() {
        let db = InMemoryDocumentDatabase::new("db");
        db.insert_container("c");
        db.upsert_item("c", "x", &json!({ "id": "x" })).await.unwrap();
        let items = db.query_items("c", &DocumentQuery::All).await.unwrap();
        assert!(items[0].get("_ts").is_some());
        assert_eq!(db.query_count(), 1);

        let ids = db.query_items("c", &DocumentQuery::Ids).await.unwrap();
        assert_eq!(ids, vec![json!({ "id": "x" })]);
    }

    #[tokio::test]
    async fn test_regex_query() {
        let db = InMemoryDocumentDatabase::new("db");
        db.insert_container("c");
        for id in ["run/1.txt", "run/2.csv", "other.txt"] {
            db.upsert_item("c", id, &json!({ "id": id })).await.unwrap();
        }
        let items = db
            .query_items("c", &DocumentQuery::IdMatches(r"\.txt$".to_string()))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.as_object().unwrap().len() == 1));
        assert!(db
            .query_items("missing", &DocumentQuery::All)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
