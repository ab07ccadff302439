//! Document database REST client.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tessera_core::{EncodingError, StorageError, TesseraResult};
use tracing::debug;

use super::client::{DocumentDatabase, DocumentQuery, MAX_ITEM_LENGTH};
use crate::credential::TokenCredential;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";
pub const COSMOS_SCOPE: &str = "https://cosmos.azure.com/.default";

enum RestAuth {
    MasterKey(Vec<u8>),
    Token(Arc<dyn TokenCredential>),
}

/// Client for one database over the service's REST API.
pub struct RestDocumentDatabase {
    client: Client,
    endpoint: String,
    database: String,
    auth: RestAuth,
}

impl RestDocumentDatabase {
    /// Authenticate with a base64 account key.
    pub fn with_master_key(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        account_key: &str,
    ) -> TesseraResult<Self> {
        let key = BASE64
            .decode(account_key.trim())
            .map_err(|e| EncodingError::InvalidBase64 {
                reason: format!("account key: {}", e),
            })?;
        Ok(Self::build(endpoint.into(), database.into(), RestAuth::MasterKey(key)))
    }

    /// Authenticate with bearer tokens for the database scope.
    pub fn with_credential(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self::build(endpoint.into(), database.into(), RestAuth::Token(credential))
    }

    fn build(endpoint: String, database: String, auth: RestAuth) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database,
            auth,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn db_link(&self) -> String {
        format!("dbs/{}", self.database)
    }

    fn container_link(&self, container: &str) -> String {
        format!("dbs/{}/colls/{}", self.database, container)
    }

    async fn authorization(
        &self,
        method: &Method,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> TesseraResult<String> {
        let token = match &self.auth {
            RestAuth::MasterKey(key) => {
                let payload = string_to_sign(method, resource_type, resource_link, date);
                format!("type=master&ver=1.0&sig={}", sign(key, &payload)?)
            }
            RestAuth::Token(credential) => {
                let token = credential.get_token(COSMOS_SCOPE).await?;
                format!("type=aad&ver=1.0&sig={}", token.token)
            }
        };
        Ok(urlencoding::encode(&token).into_owned())
    }

    /// Build a signed request. `path` is the URL path, `resource_link` the
    /// unescaped link that is signed.
    async fn request(
        &self,
        method: Method,
        path: &str,
        resource_type: &str,
        resource_link: &str,
    ) -> TesseraResult<RequestBuilder> {
        let date = rfc1123_now();
        let authorization = self
            .authorization(&method, resource_type, resource_link, &date)
            .await?;
        Ok(self
            .client
            .request(method, format!("{}/{}", self.endpoint, path))
            .header("authorization", authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION))
    }

    async fn send(&self, request: RequestBuilder, resource: &str, size: usize) -> TesseraResult<Response> {
        let response = request.send().await.map_err(|e| StorageError::Transport {
            reason: format!("{}: {}", resource, e),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StorageError::NotFound {
                resource: resource.to_string(),
            },
            StatusCode::PAYLOAD_TOO_LARGE => StorageError::ItemTooLarge {
                key: resource.to_string(),
                size,
                limit: MAX_ITEM_LENGTH,
            },
            other => StorageError::Backend {
                status: other.as_u16(),
                message,
            },
        }
        .into())
    }
}

impl fmt::Debug for RestDocumentDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = match self.auth {
            RestAuth::MasterKey(_) => "master-key",
            RestAuth::Token(_) => "aad",
        };
        f.debug_struct("RestDocumentDatabase")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("auth", &auth)
            .finish()
    }
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn string_to_sign(method: &Method, resource_type: &str, resource_link: &str, date: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n\n",
        method.as_str().to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    )
}

fn sign(key: &[u8], payload: &str) -> TesseraResult<String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| EncodingError::InvalidBase64 {
        reason: format!("account key: {}", e),
    })?;
    mac.update(payload.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn partition_key_header(partition_key: &str) -> String {
    json!([partition_key]).to_string()
}

fn continuation(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-ms-continuation")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct ContainerList {
    #[serde(rename = "DocumentCollections", default)]
    document_collections: Vec<ContainerProperties>,
}

#[derive(Debug, Deserialize)]
struct ContainerProperties {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> TesseraResult<T> {
    response
        .json()
        .await
        .map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl DocumentDatabase for RestDocumentDatabase {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_containers(&self) -> TesseraResult<Vec<String>> {
        let link = self.db_link();
        let request = self
            .request(Method::GET, &format!("{}/colls", link), "colls", &link)
            .await?;
        let response = self.send(request, &link, 0).await?;
        let list: ContainerList = json_body(response).await?;
        Ok(list.document_collections.into_iter().map(|c| c.id).collect())
    }

    async fn create_container(&self, name: &str, partition_key_path: &str) -> TesseraResult<()> {
        let link = self.db_link();
        let body = json!({
            "id": name,
            "partitionKey": { "paths": [partition_key_path], "kind": "Hash" },
        });
        let request = self
            .request(Method::POST, &format!("{}/colls", link), "colls", &link)
            .await?
            .json(&body);
        self.send(request, &self.container_link(name), 0).await?;
        debug!(database = %self.database, container = %name, "Created container");
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> TesseraResult<()> {
        let link = self.container_link(name);
        let path = format!("{}/colls/{}", self.db_link(), urlencoding::encode(name));
        let request = self.request(Method::DELETE, &path, "colls", &link).await?;
        self.send(request, &link, 0).await?;
        Ok(())
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        item: &Value,
    ) -> TesseraResult<()> {
        let link = self.container_link(container);
        let body = serde_json::to_vec(item)?;
        let size = body.len();
        let request = self
            .request(Method::POST, &format!("{}/docs", link), "docs", &link)
            .await?
            .header("content-type", "application/json")
            .header("x-ms-documentdb-is-upsert", "True")
            .header("x-ms-documentdb-partitionkey", partition_key_header(partition_key))
            .body(body);
        self.send(request, &format!("{}/docs/{}", link, partition_key), size)
            .await?;
        Ok(())
    }

    async fn delete_item(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
    ) -> TesseraResult<()> {
        let link = format!("{}/docs/{}", self.container_link(container), id);
        let path = format!(
            "{}/docs/{}",
            self.container_link(container),
            urlencoding::encode(id)
        );
        let request = self
            .request(Method::DELETE, &path, "docs", &link)
            .await?
            .header("x-ms-documentdb-partitionkey", partition_key_header(partition_key));
        self.send(request, &link, 0).await?;
        Ok(())
    }

    async fn query_items(
        &self,
        container: &str,
        query: &DocumentQuery,
    ) -> TesseraResult<Vec<Value>> {
        let link = self.container_link(container);
        let body = query.to_body();
        let mut documents = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = self
                .request(Method::POST, &format!("{}/docs", link), "docs", &link)
                .await?
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .json(&body);
            request = match query.partition_key() {
                Some(pk) => request.header("x-ms-documentdb-partitionkey", partition_key_header(pk)),
                None => request.header("x-ms-documentdb-query-enablecrosspartition", "True"),
            };
            if let Some(token) = &token {
                request = request.header("x-ms-continuation", token.as_str());
            }

            let response = self.send(request, &link, 0).await?;
            token = continuation(response.headers());
            let page: QueryPage = json_body(response).await?;
            documents.extend(page.documents);
            if token.is_none() {
                break;
            }
        }
        Ok(documents)
    }
}
