//! Error types for ARM and data-plane calls.
//!
//! Every execution module returns [`AzureResult`]. The state layer treats
//! [`AzureError::NotFound`] as "resource absent" and turns every other
//! variant into a failed state return.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for Azure operations.
pub type AzureResult<T> = Result<T, AzureError>;

/// Error type for Azure Resource Manager operations.
#[derive(Error, Debug)]
pub enum AzureError {
    // ========================================================================
    // Service Errors
    // ========================================================================
    /// The requested resource does not exist (HTTP 404).
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },

    /// Any other error reported by the service.
    #[error("Azure Error: {code} (HTTP {status})\nMessage: {message}")]
    Cloud {
        status: u16,
        code: String,
        message: String,
    },

    /// A long-running operation reached a terminal state other than success.
    #[error("Long-running operation finished with status '{status}': {message}")]
    OperationFailed { status: String, message: String },

    /// A long-running operation did not finish in time.
    #[error("Operation '{operation}' timed out after {timeout_secs} seconds")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Token acquisition failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The supplied profile does not describe a usable credential.
    #[error("{0}")]
    Credentials(String),

    /// Unknown cloud environment name or unreachable metadata endpoint.
    #[error("The Azure cloud environment {0} is not available.")]
    CloudEnvironment(String),

    /// Unknown client type requested.
    #[error("The Azure ARM client_type {0} specified can not be found.")]
    UnknownClient(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {message}")]
    Http {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // ========================================================================
    // Parameter Errors
    // ========================================================================
    /// A parameter was present but unusable.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A required parameter was missing.
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// No such function in a module.
    #[error("Function '{0}' is not available")]
    FunctionNotFound(String),

    /// The request or response model could not be (de)serialized.
    #[error("The object model could not be built. ({0})")]
    Serialization(#[from] serde_json::Error),

    /// Local file access (state files, policy rule files, zip packages).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AzureError {
    /// Build an error from a non-success HTTP response.
    ///
    /// ARM and Key Vault return `{"error": {"code": .., "message": ..}}`;
    /// storage returns XML, which is kept verbatim as the message.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let (code, message) = match body.get("error") {
            Some(err) => (
                err.get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                err.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            None => (
                body.get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                body.get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or_else(|| body.as_str().map(String::from))
                    .unwrap_or_default(),
            ),
        };

        if status == 404 {
            AzureError::NotFound { code, message }
        } else {
            AzureError::Cloud {
                status,
                code,
                message,
            }
        }
    }

    /// Wrap a transport error.
    pub fn http(message: impl Into<String>, source: reqwest::Error) -> Self {
        AzureError::Http {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether this error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AzureError::NotFound { .. })
    }
}
