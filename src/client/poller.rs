//! Long-running operation poller.
//!
//! ARM answers slow PUT/PATCH/POST/DELETE calls with 201 or 202 and an
//! `Azure-AsyncOperation` or `Location` header. The poller follows that
//! header until the operation reaches a terminal state, then returns the
//! final resource representation.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{ArmClient, ArmRequest, ArmResponse, AzureError, AzureResult, Method};
use crate::retry::parse_retry_after;

/// Poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between polls when the service sends no `Retry-After`.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Give up after this long.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1800),
        }
    }
}

fn provisioning_state(body: &Value) -> Option<&str> {
    body.get("properties")
        .and_then(|p| p.get("provisioningState"))
        .and_then(Value::as_str)
}

fn is_terminal(state: &str) -> bool {
    matches!(
        state.to_ascii_lowercase().as_str(),
        "succeeded" | "failed" | "canceled" | "cancelled"
    )
}

fn failure(status: &str, body: &Value) -> AzureError {
    let message = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    AzureError::OperationFailed {
        status: status.to_string(),
        message,
    }
}

/// Drive an operation to completion.
///
/// `request` is the request that produced `initial`; it is replayed as a
/// GET to fetch the final resource for PUT and PATCH.
pub async fn wait(
    client: &dyn ArmClient,
    request: &ArmRequest,
    initial: ArmResponse,
    config: PollerConfig,
) -> AzureResult<Value> {
    let initial = initial.error_for_status()?;
    let started = Instant::now();
    let operation = format!("{} {}", request.method, request.target());

    let async_url = initial.header("azure-asyncoperation").map(String::from);
    let location_url = initial.header("location").map(String::from);

    if async_url.is_none() && (location_url.is_none() || initial.status != 202) {
        // Synchronous completion, or a resource still provisioning.
        if matches!(request.method, Method::Put | Method::Patch) {
            if let Some(state) = provisioning_state(&initial.body) {
                if !is_terminal(state) {
                    return poll_resource(client, request, &operation, started, config).await;
                }
            }
        }
        return Ok(if request.method == Method::Delete {
            Value::Null
        } else {
            initial.body
        });
    }

    let mut delay = parse_retry_after(initial.header("retry-after")).unwrap_or(config.interval);

    if let Some(url) = async_url {
        loop {
            check_timeout(&operation, started, config)?;
            tokio::time::sleep(delay).await;
            let status_response = client
                .send(ArmRequest::url(Method::Get, url.clone()).with_audience(request.audience))
                .await?
                .error_for_status()?;
            let status = status_response
                .body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("InProgress")
                .to_string();
            trace!("{} is {}", operation, status);
            match status.to_ascii_lowercase().as_str() {
                "succeeded" => break,
                "failed" | "canceled" | "cancelled" => {
                    return Err(failure(&status, &status_response.body))
                }
                _ => {
                    delay = parse_retry_after(status_response.header("retry-after"))
                        .unwrap_or(config.interval);
                }
            }
        }
        debug!("{} succeeded", operation);
        return final_result(client, request, location_url).await;
    }

    // Location polling: 202 means still running, anything else is the result.
    let url = location_url.unwrap_or_default();
    loop {
        check_timeout(&operation, started, config)?;
        tokio::time::sleep(delay).await;
        let response = client
            .send(ArmRequest::url(Method::Get, url.clone()).with_audience(request.audience))
            .await?
            .error_for_status()?;
        if response.status != 202 {
            debug!("{} finished with {}", operation, response.status);
            return match request.method {
                Method::Put | Method::Patch => get_resource(client, request).await,
                Method::Delete => Ok(Value::Null),
                _ => Ok(response.body),
            };
        }
        delay = parse_retry_after(response.header("retry-after")).unwrap_or(config.interval);
    }
}

fn check_timeout(operation: &str, started: Instant, config: PollerConfig) -> AzureResult<()> {
    if started.elapsed() > config.timeout {
        return Err(AzureError::Timeout {
            operation: operation.to_string(),
            timeout_secs: config.timeout.as_secs(),
        });
    }
    Ok(())
}

async fn final_result(
    client: &dyn ArmClient,
    request: &ArmRequest,
    location: Option<String>,
) -> AzureResult<Value> {
    match request.method {
        Method::Put | Method::Patch => get_resource(client, request).await,
        Method::Delete => Ok(Value::Null),
        _ => match location {
            Some(url) => Ok(client
                .send(ArmRequest::url(Method::Get, url).with_audience(request.audience))
                .await?
                .error_for_status()?
                .body),
            None => Ok(Value::Null),
        },
    }
}

async fn get_resource(client: &dyn ArmClient, request: &ArmRequest) -> AzureResult<Value> {
    let get = ArmRequest {
        method: Method::Get,
        endpoint: request.endpoint.clone(),
        query: Vec::new(),
        headers: Vec::new(),
        body: None,
        audience: request.audience,
    };
    Ok(client.send(get).await?.error_for_status()?.body)
}

async fn poll_resource(
    client: &dyn ArmClient,
    request: &ArmRequest,
    operation: &str,
    started: Instant,
    config: PollerConfig,
) -> AzureResult<Value> {
    loop {
        check_timeout(operation, started, config)?;
        tokio::time::sleep(config.interval).await;
        let body = get_resource(client, request).await?;
        match provisioning_state(&body) {
            Some(state) if state.eq_ignore_ascii_case("succeeded") => return Ok(body),
            Some(state) if is_terminal(state) => return Err(failure(state, &body)),
            Some(state) => trace!("{} is {}", operation, state),
            None => return Ok(body),
        }
    }
}
