//! Azure Resource Manager client plumbing.
//!
//! This module provides:
//! - [`ArmClient`]: the transport seam every execution module talks through
//! - [`ArmRequest`] / [`ArmResponse`]: a minimal request/response model
//! - [`Service`]: the client types, their provider namespace and pinned api-version
//! - [`HttpArmClient`]: the reqwest implementation with retry
//! - the long-running-operation poller and the `nextLink` pager

pub mod error;
pub mod http;
pub mod pager;
pub mod poller;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{AzureError, AzureResult};
pub use http::HttpArmClient;
pub use poller::PollerConfig;

/// HTTP method of an ARM request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Patch,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// A path below the resource manager endpoint, with its api-version.
    Management { path: String, api_version: String },
    /// A fully qualified URL (data plane, poll and next-page links).
    Url(String),
}

/// Token audience for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    ResourceManager,
    KeyVault,
    /// No bearer token (SAS-signed storage requests).
    Anonymous,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Bytes(Vec<u8>),
}

/// One request against ARM or a data-plane endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub audience: Audience,
}

impl ArmRequest {
    /// Request against a management path.
    pub fn management(method: Method, path: impl Into<String>, api_version: &str) -> Self {
        Self {
            method,
            endpoint: Endpoint::Management {
                path: path.into(),
                api_version: api_version.to_string(),
            },
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            audience: Audience::ResourceManager,
        }
    }

    /// Request against an absolute URL.
    pub fn url(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: Endpoint::Url(url.into()),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            audience: Audience::ResourceManager,
        }
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn with_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = Some(Body::Bytes(body));
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    /// Path or URL, for log lines and error messages.
    pub fn target(&self) -> &str {
        match &self.endpoint {
            Endpoint::Management { path, .. } => path,
            Endpoint::Url(url) => url,
        }
    }
}

/// Response with lower-cased header names and a decoded body.
///
/// Non-JSON bodies are kept as a JSON string; empty bodies are `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl ArmResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into an [`AzureError`].
    pub fn error_for_status(self) -> AzureResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AzureError::from_response(self.status, &self.body))
        }
    }
}

/// Transport used by execution modules.
///
/// Implementations attach credentials and retry transient failures. They
/// return every HTTP response as-is, including 4xx/5xx; mapping status codes
/// to errors is the caller's decision.
#[async_trait]
pub trait ArmClient: Send + Sync {
    /// Subscription this client operates in.
    fn subscription_id(&self) -> &str;

    /// Send one request.
    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse>;
}

/// ARM client types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Compute,
    Disks,
    Authorization,
    Storage,
    ManagementLock,
    Network,
    Policy,
    Resource,
    Web,
    KeyVault,
    Redis,
    ContainerRegistry,
    ApplicationInsights,
}

impl Service {
    /// Resolve a client type name.
    pub fn from_client_type(client_type: &str) -> AzureResult<Self> {
        match client_type.to_ascii_lowercase().as_str() {
            "compute" => Ok(Service::Compute),
            "disks" => Ok(Service::Disks),
            "authorization" => Ok(Service::Authorization),
            "storage" => Ok(Service::Storage),
            "managementlock" => Ok(Service::ManagementLock),
            "network" => Ok(Service::Network),
            "policy" => Ok(Service::Policy),
            "resource" => Ok(Service::Resource),
            "web" => Ok(Service::Web),
            "keyvault" => Ok(Service::KeyVault),
            "redis" => Ok(Service::Redis),
            "containerregistry" => Ok(Service::ContainerRegistry),
            "applicationinsights" => Ok(Service::ApplicationInsights),
            other => Err(AzureError::UnknownClient(other.to_string())),
        }
    }

    /// Provider namespace.
    pub fn namespace(&self) -> &'static str {
        match self {
            Service::Compute | Service::Disks => "Microsoft.Compute",
            Service::Authorization | Service::ManagementLock | Service::Policy => {
                "Microsoft.Authorization"
            }
            Service::Storage => "Microsoft.Storage",
            Service::Network => "Microsoft.Network",
            Service::Resource => "Microsoft.Resources",
            Service::Web => "Microsoft.Web",
            Service::KeyVault => "Microsoft.KeyVault",
            Service::Redis => "Microsoft.Cache",
            Service::ContainerRegistry => "Microsoft.ContainerRegistry",
            Service::ApplicationInsights => "Microsoft.Insights",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Service::Compute => "2023-03-01",
            Service::Disks => "2022-07-02",
            Service::Authorization => "2022-04-01",
            Service::Storage => "2023-01-01",
            Service::ManagementLock => "2016-09-01",
            Service::Network => "2023-04-01",
            Service::Policy => "2021-06-01",
            Service::Resource => "2021-04-01",
            Service::Web => "2022-09-01",
            Service::KeyVault => "2022-07-01",
            Service::Redis => "2023-04-01",
            Service::ContainerRegistry => "2023-07-01",
            Service::ApplicationInsights => "2020-02-02",
        }
    }

    /// Name used in error log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Service::Compute => "compute",
            Service::Disks => "disks",
            Service::Authorization => "authorization",
            Service::Storage => "storage",
            Service::ManagementLock => "managementlock",
            Service::Network => "network",
            Service::Policy => "policy",
            Service::Resource => "resource",
            Service::Web => "web",
            Service::KeyVault => "keyvault",
            Service::Redis => "redis",
            Service::ContainerRegistry => "containerregistry",
            Service::ApplicationInsights => "applicationinsights",
        }
    }

    /// Whether responses have `properties` merged into the top level.
    pub fn flattens_properties(&self) -> bool {
        !matches!(self, Service::Resource | Service::KeyVault)
    }
}
