//! reqwest implementation of [`ArmClient`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::{ArmClient, ArmRequest, ArmResponse, Audience, AzureError, AzureResult, Body, Endpoint, Method};
use crate::auth::{CloudEnvironment, TokenCredential};
use crate::retry::{is_retryable_status, parse_retry_after, RetryPolicy};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client settings.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            user_agent: format!("azrm/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// ARM client over HTTPS.
pub struct HttpArmClient {
    http: Client,
    credential: Arc<dyn TokenCredential>,
    cloud: CloudEnvironment,
    subscription_id: String,
    config: HttpClientConfig,
}

impl HttpArmClient {
    pub fn new(
        credential: Arc<dyn TokenCredential>,
        cloud: CloudEnvironment,
        subscription_id: impl Into<String>,
        config: HttpClientConfig,
    ) -> AzureResult<Self> {
        let http = Self::build_http(&config)?;
        Ok(Self {
            http,
            credential,
            cloud,
            subscription_id: subscription_id.into(),
            config,
        })
    }

    /// Build the underlying reqwest client with the configured timeout.
    pub fn build_http(config: &HttpClientConfig) -> AzureResult<Client> {
        Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AzureError::http("Failed to create HTTP client", e))
    }

    pub fn cloud(&self) -> &CloudEnvironment {
        &self.cloud
    }

    fn url_for(&self, request: &ArmRequest) -> String {
        match &request.endpoint {
            Endpoint::Management { path, .. } => format!(
                "{}/{}",
                self.cloud.resource_manager.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            Endpoint::Url(url) => url.clone(),
        }
    }

    fn query_for(request: &ArmRequest) -> Vec<(String, String)> {
        let mut query = Vec::with_capacity(request.query.len() + 1);
        if let Endpoint::Management { api_version, .. } = &request.endpoint {
            query.push(("api-version".to_string(), api_version.clone()));
        }
        query.extend(request.query.iter().cloned());
        query
    }

    async fn bearer(&self, audience: Audience) -> AzureResult<Option<String>> {
        let resource = match audience {
            Audience::ResourceManager => &self.cloud.management_audience,
            Audience::KeyVault => &self.cloud.key_vault_audience,
            Audience::Anonymous => return Ok(None),
        };
        let token = self.credential.get_token(resource).await?;
        Ok(Some(token.token))
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    async fn into_response(response: reqwest::Response) -> AzureResult<ArmResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AzureError::http("Failed to read response body", e))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(ArmResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl ArmClient for HttpArmClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse> {
        let url = self.url_for(&request);
        let query = Self::query_for(&request);
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let token = self.bearer(request.audience).await?;
            let mut builder = self
                .http
                .request(Self::method(request.method), &url)
                .query(&query);
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = match &request.body {
                Some(Body::Json(json)) => builder.json(json),
                Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
                None => builder,
            };

            trace!("{} {}", request.method, url);
            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_retryable_status(status) && retry.should_continue(attempt) {
                        let hint = parse_retry_after(
                            response
                                .headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok()),
                        );
                        let delay = retry.delay_with_hint(attempt, hint);
                        warn!(
                            "{} {} returned {}, retry {}/{} after {:?}",
                            request.method,
                            url,
                            status,
                            attempt + 1,
                            retry.max_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let response = Self::into_response(response).await?;
                    debug!("{} {} -> {}", request.method, url, response.status);
                    return Ok(response);
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect();
                    if transient && retry.should_continue(attempt) {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(
                            "{} {} failed ({}), retry {}/{} after {:?}",
                            request.method,
                            url,
                            e,
                            attempt + 1,
                            retry.max_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(AzureError::Timeout {
                            operation: format!("{} {}", request.method, url),
                            timeout_secs: self.config.timeout.as_secs(),
                        });
                    }
                    return Err(AzureError::http(format!("{} {}", request.method, url), e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_url_and_query() {
        let client = HttpArmClient::new(
            Arc::new(crate::auth::StaticTokenCredential::new("t")),
            CloudEnvironment::public(),
            "sub",
            HttpClientConfig::default(),
        )
        .unwrap();
        let request = ArmRequest::management(Method::Get, "/subscriptions/sub/resourcegroups", "2021-04-01")
            .with_query("$top", "5");
        assert_eq!(
            client.url_for(&request),
            "https://management.azure.com/subscriptions/sub/resourcegroups"
        );
        assert_eq!(
            HttpArmClient::query_for(&request),
            vec![
                ("api-version".to_string(), "2021-04-01".to_string()),
                ("$top".to_string(), "5".to_string())
            ]
        );
    }

    #[test]
    fn test_absolute_url_has_no_api_version() {
        let request = ArmRequest::url(Method::Get, "https://x.vault.azure.net/secrets/a")
            .with_query("api-version", "7.4");
        assert_eq!(HttpArmClient::query_for(&request).len(), 1);
    }
}
