//! Error types for azrm.
//!
//! [`AzureError`](crate::client::AzureError) covers everything that talks to
//! Azure. This module's [`Error`] covers the layers around it: configuration,
//! state files and the command line.

use std::path::PathBuf;
use thiserror::Error;

use crate::client::AzureError;

/// Result type alias for azrm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for azrm.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A configuration file could not be read or parsed.
    #[error("Failed to load config file '{path}': {message}")]
    ConfigLoad {
        /// Path to the config file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A configuration value is not usable.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The requested acct profile does not exist.
    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    // ========================================================================
    // State File Errors
    // ========================================================================
    /// Error parsing a state file.
    #[error("Failed to parse state file '{path}': {message}")]
    StateFileParse {
        /// Path to the state file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A state declaration is malformed.
    #[error("Invalid state '{id}': {message}")]
    StateInvalid {
        /// State id
        id: String,
        /// Error message
        message: String,
    },

    /// One or more states failed.
    #[error("{failed} of {total} states failed")]
    StatesFailed {
        /// Number of failed states
        failed: usize,
        /// Number of states run
        total: usize,
    },

    // ========================================================================
    // Module Errors
    // ========================================================================
    /// Module not found.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// A `key=value` argument could not be parsed.
    #[error("Invalid argument '{0}': expected key=value")]
    InvalidArgument(String),

    /// A call against Azure failed.
    #[error(transparent)]
    Azure(#[from] AzureError),

    // ========================================================================
    // Serialization and I/O
    // ========================================================================
    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new config load error.
    pub fn config_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new state file parse error.
    pub fn state_file_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid state error.
    pub fn state_invalid(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateInvalid {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StatesFailed { .. } => 2,
            Error::Azure(AzureError::Authentication(_)) | Error::Azure(AzureError::Credentials(_)) => 3,
            Error::StateFileParse { .. } | Error::StateInvalid { .. } => 4,
            Error::ConfigLoad { .. } | Error::ConfigInvalid(_) | Error::ProfileNotFound(_) => 5,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::StatesFailed { failed: 1, total: 3 }.exit_code(), 2);
        assert_eq!(
            Error::Azure(AzureError::Credentials("no profile".into())).exit_code(),
            3
        );
        assert_eq!(Error::state_invalid("rg", "bad").exit_code(), 4);
        assert_eq!(Error::ProfileNotFound("prod".into()).exit_code(), 5);
        assert_eq!(Error::ModuleNotFound("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_azure_errors_display_unchanged() {
        let err: Error = AzureError::InvalidParameter("name".into()).into();
        assert_eq!(err.to_string(), "Invalid parameter: name");
    }

    #[test]
    fn test_context() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.context("reading states").unwrap_err();
        assert_eq!(err.to_string(), "reading states");
    }
}
