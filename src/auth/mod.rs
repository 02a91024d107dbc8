//! Credential determination.
//!
//! [`determine_auth`] inspects a [`Profile`] and decides which OAuth2 flow
//! applies. [`build_credential`] turns that decision into a cached
//! [`TokenCredential`].

pub mod cloud;
pub mod credential;

use std::sync::Arc;

pub use cloud::CloudEnvironment;
pub use credential::{
    AccessToken, CachedCredential, ClientSecretCredential, ManagedIdentityCredential,
    StaticTokenCredential, TokenCredential, UsernamePasswordCredential,
};

use crate::acct::Profile;
use crate::client::{AzureError, AzureResult};

/// The credential flow selected for a profile.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    ServicePrincipal {
        tenant: String,
        client_id: String,
        secret: String,
    },
    UsernamePassword {
        username: String,
        password: String,
        tenant: Option<String>,
        client_id: Option<String>,
    },
    ManagedIdentity {
        client_id: Option<String>,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::ServicePrincipal { client_id, .. } => {
                write!(f, "ServicePrincipal({})", client_id)
            }
            AuthMethod::UsernamePassword { username, .. } => {
                write!(f, "UsernamePassword({})", username)
            }
            AuthMethod::ManagedIdentity { .. } => write!(f, "ManagedIdentity"),
        }
    }
}

fn populated(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.is_empty()).unwrap_or(false)
}

/// Decide which credential flow a profile describes, and its subscription.
pub fn determine_auth(profile: &Profile) -> AzureResult<(AuthMethod, String)> {
    let subscription_id = match profile.subscription_id.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            return Err(AzureError::Credentials(
                "A subscription_id must be specified".to_string(),
            ))
        }
    };

    let method = if profile.client_id.is_some()
        && profile.secret.is_some()
        && profile.tenant.is_some()
    {
        if !(populated(&profile.client_id)
            && populated(&profile.secret)
            && populated(&profile.tenant))
        {
            return Err(AzureError::Credentials(
                "The client_id, secret, and tenant parameters must all be populated if using service principals."
                    .to_string(),
            ));
        }
        AuthMethod::ServicePrincipal {
            tenant: profile.tenant.clone().unwrap_or_default(),
            client_id: profile.client_id.clone().unwrap_or_default(),
            secret: profile.secret.clone().unwrap_or_default(),
        }
    } else if profile.username.is_some() && profile.password.is_some() {
        if !(populated(&profile.username) && populated(&profile.password)) {
            return Err(AzureError::Credentials(
                "The username and password parameters must both be populated.".to_string(),
            ));
        }
        AuthMethod::UsernamePassword {
            username: profile.username.clone().unwrap_or_default(),
            password: profile.password.clone().unwrap_or_default(),
            tenant: profile.tenant.clone().filter(|t| !t.is_empty()),
            client_id: profile.client_id.clone().filter(|c| !c.is_empty()),
        }
    } else {
        AuthMethod::ManagedIdentity {
            client_id: profile.client_id.clone().filter(|c| !c.is_empty()),
        }
    };

    Ok((method, subscription_id))
}

/// Build a cached credential for an auth method.
pub fn build_credential(
    method: &AuthMethod,
    cloud: &CloudEnvironment,
    http: reqwest::Client,
) -> Arc<dyn TokenCredential> {
    match method.clone() {
        AuthMethod::ServicePrincipal {
            tenant,
            client_id,
            secret,
        } => Arc::new(CachedCredential::new(ClientSecretCredential::new(
            http,
            cloud.active_directory.clone(),
            tenant,
            client_id,
            secret,
        ))),
        AuthMethod::UsernamePassword {
            username,
            password,
            tenant,
            client_id,
        } => Arc::new(CachedCredential::new(UsernamePasswordCredential::new(
            http,
            cloud.active_directory.clone(),
            tenant,
            client_id,
            username,
            password,
        ))),
        AuthMethod::ManagedIdentity { client_id } => Arc::new(CachedCredential::new(
            ManagedIdentityCredential::new(http, client_id),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            subscription_id: Some("sub".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_principal() {
        let p = Profile {
            client_id: Some("app".into()),
            secret: Some("pw".into()),
            tenant: Some("t".into()),
            ..profile()
        };
        let (method, sub) = determine_auth(&p).unwrap();
        assert_eq!(sub, "sub");
        assert!(matches!(method, AuthMethod::ServicePrincipal { .. }));
    }

    #[test]
    fn test_service_principal_requires_all_values() {
        let p = Profile {
            client_id: Some("app".into()),
            secret: Some(String::new()),
            tenant: Some("t".into()),
            ..profile()
        };
        let err = determine_auth(&p).unwrap_err();
        assert!(err.to_string().contains("must all be populated"));
    }

    #[test]
    fn test_username_password() {
        let p = Profile {
            username: Some("user@contoso.com".into()),
            password: Some("pw".into()),
            ..profile()
        };
        let (method, _) = determine_auth(&p).unwrap();
        assert!(matches!(method, AuthMethod::UsernamePassword { tenant: None, .. }));
    }

    #[test]
    fn test_falls_back_to_managed_identity() {
        let (method, _) = determine_auth(&profile()).unwrap();
        assert_eq!(method, AuthMethod::ManagedIdentity { client_id: None });
    }

    #[test]
    fn test_subscription_required() {
        let err = determine_auth(&Profile::default()).unwrap_err();
        assert_eq!(err.to_string(), "A subscription_id must be specified");
    }

    #[test]
    fn test_debug_hides_secret() {
        let method = AuthMethod::ServicePrincipal {
            tenant: "t".into(),
            client_id: "app".into(),
            secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", method).contains("hunter2"));
    }
}
