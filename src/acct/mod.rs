//! Account profiles.
//!
//! A profile carries the subscription and credential parameters for one
//! Azure account. Profiles come from the configuration file, from the Key
//! Vault backend, or from a `connection_auth` mapping passed to a state.

pub mod keyvault;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{AzureError, AzureResult};

/// Comment of a state run without any usable profile.
pub const MISSING_CONNECTION_INFO: &str =
    "Connection information must be specified via acct or connection_auth dictionary!";

/// Subscription and credential parameters.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_environment: Option<String>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Profile")
            .field("subscription_id", &self.subscription_id)
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("secret", &redact(&self.secret))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("cloud_environment", &self.cloud_environment)
            .finish()
    }
}

impl Profile {
    /// Build a profile from a `connection_auth` mapping.
    pub fn from_value(value: &Value) -> AzureResult<Self> {
        if !value.is_object() {
            return Err(AzureError::InvalidParameter(
                "connection_auth must be a dictionary".to_string(),
            ));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Build a profile from a flat `parameter -> value` map.
    pub fn from_parameters(params: &BTreeMap<String, String>) -> Self {
        let get = |k: &str| params.get(k).cloned();
        Self {
            subscription_id: get("subscription_id"),
            tenant: get("tenant"),
            client_id: get("client_id"),
            secret: get("secret"),
            username: get("username"),
            password: get("password"),
            cloud_environment: get("cloud_environment"),
        }
    }

    /// Overlay `other` on top of `self`, key by key.
    pub fn merge(&mut self, other: &Profile) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field.clone();
                })*
            };
        }
        overlay!(
            subscription_id,
            tenant,
            client_id,
            secret,
            username,
            password,
            cloud_environment
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == Profile::default()
    }
}

/// Pick the profile for one state.
///
/// A non-empty `connection_auth` wins; otherwise the acct profile is used.
/// Neither yields [`MISSING_CONNECTION_INFO`].
pub fn resolve(
    connection_auth: Option<&Value>,
    acct: Option<&Profile>,
) -> AzureResult<Profile> {
    if let Some(value) = connection_auth {
        let profile = Profile::from_value(value)?;
        if !profile.is_empty() {
            return Ok(profile);
        }
    }
    match acct {
        Some(profile) if !profile.is_empty() => Ok(profile.clone()),
        _ => Err(AzureError::Credentials(MISSING_CONNECTION_INFO.to_string())),
    }
}
