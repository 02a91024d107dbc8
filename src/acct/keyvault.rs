//! Key Vault acct backend.
//!
//! Profiles are stored as one secret per parameter, named
//! `{designator}{provider}-{profile}-{parameter}`:
//!
//! ```text
//! acct-provider-azurerm-default-client-id
//! acct-provider-azurerm-default-secret
//! acct-provider-azurerm-default-subscription-id
//! acct-provider-azurerm-default-tenant
//! ```
//!
//! Dashes left in the parameter become underscores. Only the latest version
//! of each secret is read.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, error};

use super::Profile;
use crate::exec::keyvault::secret;
use crate::exec::ExecContext;

pub const DEFAULT_DESIGNATOR: &str = "acct-provider-";

/// `provider -> profile -> parameter -> value`
pub type Unlocked = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Split a secret name into provider, profile and parameter.
pub fn parse_secret_name(designator: &str, name: &str) -> Option<(String, String, String)> {
    let key = name.strip_prefix(designator)?;
    if key.matches('-').count() < 2 {
        error!(
            "A dash-delimited string is expected after '{}' with the format 'PROVIDER-PROFILE-parametername', but got '{}' instead.",
            designator, name
        );
        return None;
    }
    let mut parts = key.split('-');
    let provider = parts.next()?.to_string();
    let profile = parts.next()?.to_string();
    let parameter = parts.collect::<Vec<_>>().join("_");
    Some((provider, profile, parameter))
}

/// Read every profile secret from the vault.
///
/// A vault that cannot be listed yields nothing; a secret that cannot be
/// read is skipped.
pub async fn unlock(ctx: &ExecContext, vault_url: &str, designator: &str) -> Unlocked {
    let mut unlocked = Unlocked::new();
    let listed = match secret::list_properties_of_secrets(ctx, vault_url).await {
        Ok(listed) => listed,
        Err(err) => {
            error!("Unable to unlock Azure Key Vault: {}", err);
            return unlocked;
        }
    };

    let names = listed
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for name in names {
        let Some((provider, profile, parameter)) = parse_secret_name(designator, &name) else {
            continue;
        };
        debug!("acct found keyvault secret for provider {} profile {}: {}", provider, profile, parameter);
        let value = match secret::get_secret(ctx, &name, vault_url, None).await {
            Ok(bundle) => bundle.get("value").and_then(Value::as_str).map(String::from),
            Err(err) => {
                error!("Unable to handle secret processing: {}", err);
                continue;
            }
        };
        if let Some(value) = value {
            unlocked
                .entry(provider)
                .or_default()
                .entry(profile)
                .or_default()
                .insert(parameter, value);
        }
    }
    unlocked
}

/// Profiles of one provider.
pub fn profiles_for(unlocked: &Unlocked, provider: &str) -> BTreeMap<String, Profile> {
    unlocked
        .get(provider)
        .map(|profiles| {
            profiles
                .iter()
                .map(|(name, params)| (name.clone(), Profile::from_parameters(params)))
                .collect()
        })
        .unwrap_or_default()
}
