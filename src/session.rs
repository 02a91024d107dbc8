//! Connecting a profile to Azure.
//!
//! [`connect`] resolves a profile's credential flow and cloud, and returns
//! an [`ExecContext`] over the HTTPS client. [`resolve_profiles`] unlocks
//! the Key Vault backend, when configured, before profiles are looked up.

use std::sync::Arc;

use tracing::{debug, info};

use crate::acct::{keyvault, Profile};
use crate::auth::{self, CloudEnvironment};
use crate::client::{AzureResult, HttpArmClient};
use crate::config::Config;
use crate::exec::ExecContext;

/// Build an execution context for `profile`.
pub async fn connect(profile: &Profile, config: &Config) -> AzureResult<ExecContext> {
    let (method, subscription_id) = auth::determine_auth(profile)?;
    debug!("Connecting to subscription {} with {:?}", subscription_id, method);

    let http_config = config.http_config();
    let http = HttpArmClient::build_http(&http_config)?;
    let cloud = CloudEnvironment::resolve(config.cloud_for(profile), &http).await?;
    let credential = auth::build_credential(&method, &cloud, http);
    let client = HttpArmClient::new(credential, cloud.clone(), subscription_id, http_config)?;

    Ok(ExecContext::new(Arc::new(client))
        .with_cloud(cloud)
        .with_poller(config.poller()))
}

/// Merge profiles from the Key Vault backend into the configuration.
pub async fn resolve_profiles(config: &mut Config) -> AzureResult<()> {
    let Some(backend) = config.acct.keyvault.clone() else {
        return Ok(());
    };
    let ctx = connect(&backend.credentials, config).await?;
    let unlocked = keyvault::unlock(&ctx, &backend.vault_url, &backend.designator).await;
    let profiles = keyvault::profiles_for(&unlocked, &backend.provider);
    info!(
        "Read {} profile(s) from Key Vault {}",
        profiles.len(),
        backend.vault_url
    );
    config.add_profiles(profiles);
    Ok(())
}
