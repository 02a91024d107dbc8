//! Storage accounts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Storage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageAccountParams {
    /// 3 to 24 lower-case letters and digits.
    pub name: String,
    pub resource_group: String,
    /// e.g. `Standard_LRS`, `Standard_GRS`, `Premium_LRS`
    pub sku: String,
    /// `Storage`, `StorageV2`, `BlobStorage`, `FileStorage`, `BlockBlobStorage`
    pub kind: String,
    pub location: String,
    #[serde(default)]
    pub custom_domain: Option<Value>,
    #[serde(default)]
    pub network_rule_set: Option<Value>,
    /// `Hot` or `Cool`
    #[serde(default)]
    pub access_tier: Option<String>,
    #[serde(default)]
    pub azure_files_identity_based_auth: Option<Value>,
    #[serde(default)]
    pub https_traffic_only: Option<bool>,
    #[serde(default)]
    pub hns_enabled: Option<bool>,
    /// `Enabled` or `Disabled`
    #[serde(default)]
    pub large_file_shares: Option<String>,
    #[serde(default)]
    pub routing_preference: Option<Value>,
    #[serde(default)]
    pub blob_public_access: Option<bool>,
    /// `TLS1_0`, `TLS1_1` or `TLS1_2`
    #[serde(default)]
    pub minimum_tls_version: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl StorageAccountParams {
    fn properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        let structured = [
            ("customDomain", &self.custom_domain),
            ("networkAcls", &self.network_rule_set),
            ("azureFilesIdentityBasedAuthentication", &self.azure_files_identity_based_auth),
            ("routingPreference", &self.routing_preference),
        ];
        for (key, value) in structured {
            if let Some(value) = value {
                properties.insert(key.into(), normalize::to_camel_keys(value));
            }
        }
        if let Some(ref tier) = self.access_tier {
            properties.insert("accessTier".into(), json!(tier));
        }
        if let Some(https) = self.https_traffic_only {
            properties.insert("supportsHttpsTrafficOnly".into(), json!(https));
        }
        if let Some(hns) = self.hns_enabled {
            properties.insert("isHnsEnabled".into(), json!(hns));
        }
        if let Some(ref state) = self.large_file_shares {
            properties.insert("largeFileSharesState".into(), json!(state));
        }
        if let Some(public) = self.blob_public_access {
            properties.insert("allowBlobPublicAccess".into(), json!(public));
        }
        if let Some(ref tls) = self.minimum_tls_version {
            properties.insert("minimumTlsVersion".into(), json!(tls));
        }
        properties
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("storageAccounts/{}", name))
}

/// Storage account names are global.
pub async fn check_name_availability(ctx: &ExecContext, name: &str) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &ctx.subscription_provider_path(SERVICE, "checkNameAvailability"),
        Some(json!({"name": name, "type": "Microsoft.Storage/storageAccounts"})),
    )
    .await
}

/// Create a storage account, or update one created with the same location.
pub async fn create(ctx: &ExecContext, params: &StorageAccountParams) -> AzureResult<Value> {
    let mut body = json!({
        "sku": {"name": params.sku},
        "kind": params.kind,
        "location": params.location,
        "properties": params.properties(),
    });
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await
}

/// Fail over to the secondary region (geo-redundant accounts).
pub async fn failover(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.post(SERVICE, &format!("{}/failover", path(ctx, resource_group, name)), None)
        .await
        .map(|_| ())
}

pub async fn get_properties(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "storageAccounts"),
        None => ctx.subscription_provider_path(SERVICE, "storageAccounts"),
    };
    ctx.list_by_name(SERVICE, &path).await
}

pub async fn list_keys(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.post(SERVICE, &format!("{}/listKeys", path(ctx, resource_group, name)), None)
        .await
}

/// First account key, for signing data-plane requests.
pub async fn primary_key(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<String> {
    let keys = list_keys(ctx, name, resource_group).await?;
    keys.pointer("/keys/0/value")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            AzureError::InvalidParameter(format!(
                "Unable to get the account access key for the specified storage account {} within the given resource group {}.",
                name, resource_group
            ))
        })
}

/// `key_name` is `key1` or `key2`.
pub async fn regenerate_key(ctx: &ExecContext, name: &str, resource_group: &str, key_name: &str) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &format!("{}/regenerateKey", path(ctx, resource_group, name)),
        Some(json!({ "keyName": key_name })),
    )
    .await
}

/// Ask the service for an account SAS token.
pub async fn list_account_sas(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    services: &str,
    resource_types: &str,
    permissions: &str,
    shared_access_expiry_time: &str,
) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &format!("{}/ListAccountSas", path(ctx, resource_group, name)),
        Some(json!({
            "signedServices": services,
            "signedResourceTypes": resource_types,
            "signedPermission": permissions,
            "signedExpiry": shared_access_expiry_time,
        })),
    )
    .await
}

/// Update mutable settings; unlike [`create`] the location and kind are
/// optional and omitted settings are left alone.
pub async fn update(ctx: &ExecContext, name: &str, resource_group: &str, changes: &ModuleParams) -> AzureResult<Value> {
    let mut body = Map::new();
    let mut properties = Map::new();
    for (key, value) in changes {
        match key.as_str() {
            "name" | "resource_group" | "location" => {}
            "sku" => {
                body.insert("sku".into(), json!({ "name": value }));
            }
            "kind" | "tags" | "identity" => {
                body.insert(key.clone(), value.clone());
            }
            _ => {
                properties.insert(normalize::to_camel(key), normalize::to_camel_keys(value));
            }
        }
    }
    if !properties.is_empty() {
        body.insert("properties".into(), Value::Object(properties));
    }
    ctx.patch(SERVICE, &path(ctx, resource_group, name), Value::Object(body))
        .await
}

pub struct StorageAccountExec;

#[async_trait]
impl ExecModule for StorageAccountExec {
    fn name(&self) -> &'static str {
        "azurerm.storage.account"
    }

    fn description(&self) -> &'static str {
        "Manage storage accounts"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "check_name_availability",
            "create",
            "delete",
            "failover",
            "get_properties",
            "list",
            "list_keys",
            "regenerate_key",
            "list_account_sas",
            "update",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "check_name_availability" => check_name_availability(ctx, &name()?).await,
            "create" => create(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "failover" => {
                failover(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get_properties" => get_properties(ctx, &name()?, &resource_group()?).await,
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "list_keys" => list_keys(ctx, &name()?, &resource_group()?).await,
            "regenerate_key" => {
                regenerate_key(ctx, &name()?, &resource_group()?, &params.get_string_required("key_name")?).await
            }
            "list_account_sas" => {
                list_account_sas(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    &params.get_string_required("services")?,
                    &params.get_string_required("resource_types")?,
                    &params.get_string_required("permissions")?,
                    &params.get_string_required("shared_access_expiry_time")?,
                )
                .await
            }
            "update" => update(ctx, &name()?, &resource_group()?, params).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ArmResponse, Body, Method};
    use crate::exec::testing::{context, params};

    #[tokio::test]
    async fn test_create_maps_settings() {
        let (fake, ctx) = context();
        let account = StorageAccountExec
            .call(
                "create",
                &params(json!({
                    "name": "acct1",
                    "resource_group": "rg1",
                    "sku": "Standard_LRS",
                    "kind": "StorageV2",
                    "location": "eastus",
                    "https_traffic_only": true,
                    "minimum_tls_version": "TLS1_2",
                    "network_rule_set": {"default_action": "Deny", "bypass": "AzureServices"}
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(account["supports_https_traffic_only"], true);
        assert_eq!(account["network_acls"]["default_action"], "Deny");
        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body["sku"]["name"], "Standard_LRS");
                assert_eq!(body["properties"]["networkAcls"]["defaultAction"], "Deny");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_primary_key() {
        let (fake, ctx) = context();
        fake.respond(
            Method::Post,
            &format!("{}/listKeys", path(&ctx, "rg1", "acct1")),
            ArmResponse::new(200, json!({"keys": [{"keyName": "key1", "value": "AAAA"}, {"keyName": "key2", "value": "BBBB"}]})),
        );
        assert_eq!(primary_key(&ctx, "acct1", "rg1").await.unwrap(), "AAAA");

        fake.respond(
            Method::Post,
            &format!("{}/listKeys", path(&ctx, "rg1", "acct2")),
            ArmResponse::new(200, json!({"keys": []})),
        );
        assert!(primary_key(&ctx, "acct2", "rg1").await.is_err());
    }

    #[tokio::test]
    async fn test_update_patches_only_given_settings() {
        let (fake, ctx) = context();
        fake.insert(&path(&ctx, "rg1", "acct1"), json!({"location": "eastus", "kind": "StorageV2"}));
        StorageAccountExec
            .call(
                "update",
                &params(json!({"name": "acct1", "resource_group": "rg1", "sku": "Standard_GRS", "access_tier": "Cool"})),
                &ctx,
            )
            .await
            .unwrap();
        match &fake.sent(Method::Patch)[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body, &json!({"sku": {"name": "Standard_GRS"}, "properties": {"accessTier": "Cool"}}));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}
