//! Bearer-token credentials for Azure services.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tessera_core::{Env, ProcessEnv, StorageError, TesseraResult};
use tokio::sync::Mutex;
use tracing::debug;

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Tokens expiring within this window are refreshed early.
const REFRESH_MARGIN_SECS: i64 = 300;

/// An OAuth bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens for a scope such as
/// `https://cosmos.azure.com/.default`.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> TesseraResult<AccessToken>;
}

/// Where the managed identity endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentityEndpoint {
    /// Instance metadata service on virtual machines and containers.
    Imds,
    /// App Service / Functions endpoint with its secret header.
    AppService { endpoint: String, header: String },
}

/// Ambient managed identity of the hosting Azure resource.
///
/// Uses the App Service endpoint when `IDENTITY_ENDPOINT` and
/// `IDENTITY_HEADER` are set, the instance metadata service otherwise.
/// The last token is reused until it nears expiry.
pub struct ManagedIdentityCredential {
    client: Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
    cached: Mutex<Option<(String, AccessToken)>>,
}

impl ManagedIdentityCredential {
    pub fn new() -> Self {
        Self::from_env(&ProcessEnv)
    }

    pub fn from_env(env: &dyn Env) -> Self {
        let endpoint = match (env.var("IDENTITY_ENDPOINT"), env.var("IDENTITY_HEADER")) {
            (Some(endpoint), Some(header)) if !endpoint.is_empty() => {
                IdentityEndpoint::AppService { endpoint, header }
            }
            _ => IdentityEndpoint::Imds,
        };
        Self {
            client: Client::new(),
            endpoint,
            client_id: env.var("AZURE_CLIENT_ID").filter(|id| !id.is_empty()),
            cached: Mutex::new(None),
        }
    }

    /// Use a user-assigned identity.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    async fn request_token(&self, resource: &str) -> TesseraResult<AccessToken> {
        let mut query = vec![("resource", resource.to_string())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }
        let request = match &self.endpoint {
            IdentityEndpoint::Imds => {
                query.push(("api-version", IMDS_API_VERSION.to_string()));
                self.client
                    .get(IMDS_ENDPOINT)
                    .header("Metadata", "true")
            }
            IdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION.to_string()));
                self.client
                    .get(endpoint.as_str())
                    .header("X-IDENTITY-HEADER", header.as_str())
            }
        };

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| StorageError::Transport {
                reason: format!("managed identity request failed: {}", e),
            })?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend {
                status: status.as_u16(),
                message: format!("managed identity token request rejected: {}", message),
            }
            .into());
        }
        let body: TokenResponse = response.json().await.map_err(|e| StorageError::Serialization {
            reason: format!("invalid managed identity token response: {}", e),
        })?;
        body.into_access_token()
    }
}

impl Default for ManagedIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagedIdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIdentityCredential")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> TesseraResult<AccessToken> {
        let resource = scope_to_resource(scope);
        let mut cached = self.cached.lock().await;
        if let Some((cached_resource, token)) = cached.as_ref() {
            if cached_resource == resource && token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }
        debug!(resource = %resource, "Requesting managed identity token");
        let token = self.request_token(resource).await?;
        *cached = Some((resource.to_string(), token.clone()));
        Ok(token)
    }
}

/// `https://cosmos.azure.com/.default` -> `https://cosmos.azure.com`
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: serde_json::Value,
}

impl TokenResponse {
    fn into_access_token(self) -> TesseraResult<AccessToken> {
        // Seconds since the epoch, sent as a string or a number.
        let seconds = match &self.expires_on {
            serde_json::Value::String(s) => s.parse::<i64>().ok(),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        };
        let expires_on = seconds
            .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
            .ok_or_else(|| StorageError::Serialization {
                reason: format!("invalid token expiry: {}", self.expires_on),
            })?;
        Ok(AccessToken {
            token: self.access_token,
            expires_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::StaticEnv;

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(
            scope_to_resource("https://cosmos.azure.com/.default"),
            "https://cosmos.azure.com"
        );
        assert_eq!(scope_to_resource("https://storage.azure.com"), "https://storage.azure.com");
    }

    #[test]
    fn test_endpoint_selection() {
        let imds = ManagedIdentityCredential::from_env(&StaticEnv::new());
        assert_eq!(imds.endpoint, IdentityEndpoint::Imds);

        let env = StaticEnv::new()
            .with("IDENTITY_ENDPOINT", "http://localhost:8081/msi/token")
            .with("IDENTITY_HEADER", "secret")
            .with("AZURE_CLIENT_ID", "abc");
        let app = ManagedIdentityCredential::from_env(&env);
        assert!(matches!(app.endpoint, IdentityEndpoint::AppService { .. }));
        assert_eq!(app.client_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_token_response_accepts_string_or_number_expiry() {
        let from_string: TokenResponse = serde_json::from_str(
            r#"{"access_token": "t", "expires_on": "1700000000", "token_type": "Bearer"}"#,
        )
        .unwrap();
        let token = from_string.into_access_token().unwrap();
        assert_eq!(token.expires_on.timestamp(), 1_700_000_000);

        let from_number: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "expires_on": 1700000000}"#).unwrap();
        assert_eq!(from_number.into_access_token().unwrap(), token);

        let bad: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "expires_on": "soon"}"#).unwrap();
        assert!(bad.into_access_token().is_err());
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let token = AccessToken {
            token: "t".to_string(),
            expires_on: now + Duration::seconds(60),
        };
        assert!(!token.is_fresh(now));
        let later = AccessToken {
            expires_on: now + Duration::hours(1),
            ..token
        };
        assert!(later.is_fresh(now));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken {
            token: "secret-token".to_string(),
            expires_on: Utc::now(),
        };
        assert!(!format!("{:?}", token).contains("secret-token"));
    }
}
