//! Token credentials.
//!
//! Each credential exchanges its secret for an OAuth2 bearer token for one
//! audience. [`CachedCredential`] keeps tokens until shortly before they
//! expire so a state run does not hit the authority once per request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::client::{AzureError, AzureResult};

/// Azure CLI public client id, used for the password grant when no
/// application id is configured.
pub const DEFAULT_PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// Instance metadata service token endpoint.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Refresh tokens this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A bearer token and its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Source of bearer tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Acquire a token for `audience` (a resource URI such as
    /// `https://management.core.windows.net/`).
    async fn get_token(&self, audience: &str) -> AzureResult<AccessToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

impl TokenResponse {
    fn into_token(self) -> AccessToken {
        let as_i64 = |v: &serde_json::Value| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        };
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(as_i64)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(as_i64)
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            })
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(3600));
        AccessToken {
            token: self.access_token,
            expires_on,
        }
    }
}

fn scope_for(audience: &str) -> String {
    format!("{}/.default", audience.trim_end_matches('/'))
}

async fn read_token(response: reqwest::Response) -> AzureResult<AccessToken> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AzureError::http("Failed to read token response", e))?;
    if !status.is_success() {
        let detail = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("error_description")
                    .and_then(|d| d.as_str())
                    .map(String::from)
            })
            .unwrap_or(text);
        return Err(AzureError::Authentication(format!(
            "token endpoint returned {}: {}",
            status, detail
        )));
    }
    let parsed: TokenResponse = serde_json::from_str(&text)
        .map_err(|e| AzureError::Authentication(format!("malformed token response: {}", e)))?;
    Ok(parsed.into_token())
}

/// Service principal (client credentials grant).
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority: String,
    tenant: String,
    client_id: String,
    secret: String,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        tenant: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority: authority.into(),
            tenant: tenant.into(),
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, audience: &str) -> AzureResult<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant
        );
        debug!("Requesting service principal token from {}", url);
        let scope = scope_for(audience);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AzureError::http("Token request failed", e))?;
        read_token(response).await
    }
}

/// Resource owner password grant.
pub struct UsernamePasswordCredential {
    http: reqwest::Client,
    authority: String,
    tenant: String,
    client_id: String,
    username: String,
    password: String,
}

impl UsernamePasswordCredential {
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        tenant: Option<String>,
        client_id: Option<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority: authority.into(),
            tenant: tenant.unwrap_or_else(|| "organizations".to_string()),
            client_id: client_id.unwrap_or_else(|| DEFAULT_PUBLIC_CLIENT_ID.to_string()),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for UsernamePasswordCredential {
    async fn get_token(&self, audience: &str) -> AzureResult<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant
        );
        debug!("Requesting user token for {} from {}", self.username, url);
        let scope = scope_for(audience);
        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AzureError::http("Token request failed", e))?;
        read_token(response).await
    }
}

/// Managed identity through the instance metadata service.
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
            client_id,
        }
    }

    /// Use a different token endpoint (tests, App Service identity proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, audience: &str) -> AzureResult<AccessToken> {
        let mut query = vec![
            ("api-version", "2018-02-01".to_string()),
            ("resource", audience.to_string()),
        ];
        if let Some(ref client_id) = self.client_id {
            query.push(("client_id", client_id.clone()));
        }
        debug!("Requesting managed identity token from {}", self.endpoint);
        let response = self
            .http
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AzureError::http("Managed identity endpoint unreachable", e))?;
        read_token(response).await
    }
}

/// A pre-acquired token, e.g. from `AZURE_ACCESS_TOKEN`.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _audience: &str) -> AzureResult<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Per-audience token cache around another credential.
pub struct CachedCredential<C> {
    inner: C,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl<C: TokenCredential> CachedCredential<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<C: TokenCredential> TokenCredential for CachedCredential<C> {
    async fn get_token(&self, audience: &str) -> AzureResult<AccessToken> {
        if let Some(token) = self.cache.lock().get(audience) {
            if token.is_fresh(Utc::now()) {
                trace!("Using cached token for {}", audience);
                return Ok(token.clone());
            }
        }
        let token = self.inner.get_token(audience).await?;
        self.cache
            .lock()
            .insert(audience.to_string(), token.clone());
        Ok(token)
    }
}
