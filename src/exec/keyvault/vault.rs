//! Key vaults (management plane).
//!
//! Vault responses keep `properties` nested, matching the shape of the
//! management SDK models.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{ArmRequest, AzureResult, Method, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize::{self, to_camel_keys};

const SERVICE: Service = Service::KeyVault;

/// Generic resources API used by the subscription-wide `list`.
const RESOURCES_API_VERSION: &str = "2015-11-01";

/// Permissions an identity has on vault objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Vec<String>>,
}

/// An identity with access to the vault.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub tenant_id: String,
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultParams {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub tenant_id: String,
    /// `standard` or `premium`.
    pub sku: String,
    #[serde(default)]
    pub access_policies: Option<Vec<AccessPolicy>>,
    #[serde(default)]
    pub vault_uri: Option<String>,
    /// `recover` or `default`.
    #[serde(default)]
    pub create_mode: Option<String>,
    #[serde(default)]
    pub enable_soft_delete: Option<bool>,
    #[serde(default)]
    pub enable_purge_protection: Option<bool>,
    /// Days deleted objects are retained (7 to 90).
    #[serde(default)]
    pub soft_delete_retention: Option<i64>,
    #[serde(default)]
    pub enabled_for_deployment: Option<bool>,
    #[serde(default)]
    pub enabled_for_disk_encryption: Option<bool>,
    #[serde(default)]
    pub enabled_for_template_deployment: Option<bool>,
    #[serde(default)]
    pub enable_rbac_authorization: Option<bool>,
    #[serde(default)]
    pub network_acls: Option<Value>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

/// Access policy update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicyOperation {
    Add,
    Replace,
    Remove,
}

impl AccessPolicyOperation {
    fn as_str(&self) -> &'static str {
        match self {
            AccessPolicyOperation::Add => "add",
            AccessPolicyOperation::Replace => "replace",
            AccessPolicyOperation::Remove => "remove",
        }
    }
}

fn vault_path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("vaults/{}", name))
}

fn deleted_path(ctx: &ExecContext, location: &str, name: &str) -> String {
    ctx.subscription_provider_path(SERVICE, &format!("locations/{}/deletedVaults/{}", location, name))
}

fn vault_body(params: &VaultParams) -> AzureResult<Value> {
    let mut properties = Map::new();
    properties.insert("tenantId".into(), json!(params.tenant_id));
    properties.insert("sku".into(), json!({"family": "A", "name": params.sku}));
    let policies = serde_json::to_value(params.access_policies.clone().unwrap_or_default())?;
    properties.insert("accessPolicies".into(), to_camel_keys(&policies));

    let optional = [
        ("vaultUri", params.vault_uri.as_ref().map(|v| json!(v))),
        ("createMode", params.create_mode.as_ref().map(|v| json!(v))),
        ("enableSoftDelete", params.enable_soft_delete.map(Value::Bool)),
        ("enablePurgeProtection", params.enable_purge_protection.map(Value::Bool)),
        ("softDeleteRetentionInDays", params.soft_delete_retention.map(|v| json!(v))),
        ("enabledForDeployment", params.enabled_for_deployment.map(Value::Bool)),
        ("enabledForDiskEncryption", params.enabled_for_disk_encryption.map(Value::Bool)),
        (
            "enabledForTemplateDeployment",
            params.enabled_for_template_deployment.map(Value::Bool),
        ),
        ("enableRbacAuthorization", params.enable_rbac_authorization.map(Value::Bool)),
        ("networkAcls", params.network_acls.as_ref().map(to_camel_keys)),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            properties.insert(key.to_string(), value);
        }
    }

    let mut body = json!({
        "location": params.location,
        "properties": properties,
    });
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    Ok(body)
}

/// Check whether a vault name is valid and not in use.
pub async fn check_name_availability(ctx: &ExecContext, name: &str) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &ctx.subscription_provider_path(SERVICE, "checkNameAvailability"),
        Some(json!({"name": name, "type": "Microsoft.KeyVault/vaults"})),
    )
    .await
}

pub async fn create_or_update(ctx: &ExecContext, params: &VaultParams) -> AzureResult<Value> {
    ctx.put(
        SERVICE,
        &vault_path(ctx, &params.resource_group, &params.name),
        vault_body(params)?,
    )
    .await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &vault_path(ctx, resource_group, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &vault_path(ctx, resource_group, name)).await
}

/// Get a soft-deleted vault.
pub async fn get_deleted(ctx: &ExecContext, name: &str, location: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &deleted_path(ctx, location, name)).await
}

fn top_query(top: Option<i64>) -> Vec<(&'static str, String)> {
    top.map(|t| ("$top", t.to_string())).into_iter().collect()
}

async fn list_path(ctx: &ExecContext, path: &str, top: Option<i64>) -> AzureResult<Value> {
    let query = top_query(top);
    let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
    Ok(normalize::keyed_by_name(
        ctx.list_with_query(SERVICE, path, &query).await?,
    ))
}

/// List every vault in the subscription through the generic resources API.
pub async fn list(ctx: &ExecContext, top: Option<i64>) -> AzureResult<Value> {
    let mut request = ArmRequest::management(
        Method::Get,
        format!("{}/resources", ctx.subscription_path()),
        RESOURCES_API_VERSION,
    )
    .with_query("$filter", "resourceType eq 'Microsoft.KeyVault/vaults'");
    if let Some(top) = top {
        request = request.with_query("$top", top.to_string());
    }
    let items = ctx.collect_pages(SERVICE, request).await?;
    Ok(normalize::keyed_by_name(
        items
            .into_iter()
            .map(|item| normalize::as_dict(item, false))
            .collect(),
    ))
}

pub async fn list_by_resource_group(ctx: &ExecContext, resource_group: &str, top: Option<i64>) -> AzureResult<Value> {
    list_path(ctx, &ctx.provider_path(resource_group, SERVICE, "vaults"), top).await
}

pub async fn list_by_subscription(ctx: &ExecContext, top: Option<i64>) -> AzureResult<Value> {
    list_path(ctx, &ctx.subscription_provider_path(SERVICE, "vaults"), top).await
}

pub async fn list_deleted(ctx: &ExecContext) -> AzureResult<Value> {
    list_path(ctx, &ctx.subscription_provider_path(SERVICE, "deletedVaults"), None).await
}

/// Permanently delete a soft-deleted vault.
pub async fn purge_deleted(ctx: &ExecContext, name: &str, location: &str) -> AzureResult<()> {
    ctx.post(SERVICE, &format!("{}/purge", deleted_path(ctx, location, name)), None)
        .await
        .map(|_| ())
}

/// Add, replace or remove access policies without touching the rest of the vault.
pub async fn update_access_policy(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    operation: AccessPolicyOperation,
    access_policies: &[AccessPolicy],
) -> AzureResult<Value> {
    let policies = to_camel_keys(&serde_json::to_value(access_policies)?);
    let path = format!(
        "{}/accessPolicies/{}",
        vault_path(ctx, resource_group, name),
        operation.as_str()
    );
    let response = ctx
        .call(
            SERVICE,
            ArmRequest::management(Method::Put, path, SERVICE.api_version())
                .with_json(json!({"properties": {"accessPolicies": policies}})),
        )
        .await?;
    Ok(normalize::as_dict(response.body, false))
}

pub struct VaultExec;

#[async_trait]
impl ExecModule for VaultExec {
    fn name(&self) -> &'static str {
        "azurerm.keyvault.vault"
    }

    fn description(&self) -> &'static str {
        "Manage key vaults"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "check_name_availability",
            "create_or_update",
            "delete",
            "get",
            "get_deleted",
            "list",
            "list_by_resource_group",
            "list_by_subscription",
            "list_deleted",
            "purge_deleted",
            "update_access_policy",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        match function {
            "check_name_availability" => check_name_availability(ctx, &params.get_string_required("name")?).await,
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("resource_group")?,
                )
                .await?;
                Ok(json!(true))
            }
            "get" => {
                get(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("resource_group")?,
                )
                .await
            }
            "get_deleted" => {
                get_deleted(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("location")?,
                )
                .await
            }
            "list" => list(ctx, params.get_i64("top")?).await,
            "list_by_resource_group" => {
                list_by_resource_group(ctx, &params.get_string_required("resource_group")?, params.get_i64("top")?)
                    .await
            }
            "list_by_subscription" => list_by_subscription(ctx, params.get_i64("top")?).await,
            "list_deleted" => list_deleted(ctx).await,
            "purge_deleted" => {
                purge_deleted(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("location")?,
                )
                .await?;
                Ok(json!(true))
            }
            "update_access_policy" => {
                #[derive(Deserialize)]
                struct Req {
                    name: String,
                    resource_group: String,
                    operation_kind: AccessPolicyOperation,
                    access_policies: Vec<AccessPolicy>,
                }
                let req: Req = parse_params(params)?;
                update_access_policy(
                    ctx,
                    &req.name,
                    &req.resource_group,
                    req.operation_kind,
                    &req.access_policies,
                )
                .await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ArmResponse, Body};
    use crate::exec::testing::{context, params, SUB};

    fn policy() -> AccessPolicy {
        AccessPolicy {
            tenant_id: "t1".into(),
            object_id: "o1".into(),
            application_id: None,
            permissions: Permissions {
                secrets: Some(vec!["get".into(), "list".into()]),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_keeps_properties_nested() {
        let (fake, ctx) = context();
        let vault = create_or_update(
            &ctx,
            &VaultParams {
                name: "kv1".into(),
                resource_group: "rg1".into(),
                location: "eastus".into(),
                tenant_id: "t1".into(),
                sku: "standard".into(),
                access_policies: Some(vec![policy()]),
                soft_delete_retention: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(vault["properties"]["sku"]["name"], "standard");
        assert_eq!(vault["properties"]["access_policies"][0]["object_id"], "o1");

        let stored = fake
            .get(&format!(
                "/subscriptions/{}/resourceGroups/rg1/providers/Microsoft.KeyVault/vaults/kv1",
                SUB
            ))
            .unwrap();
        assert_eq!(stored["properties"]["softDeleteRetentionInDays"], 30);
        assert_eq!(stored["properties"]["accessPolicies"][0]["tenantId"], "t1");
    }

    #[tokio::test]
    async fn test_update_access_policy_path() {
        let (fake, ctx) = context();
        VaultExec
            .call(
                "update_access_policy",
                &params(json!({
                    "name": "kv1",
                    "resource_group": "rg1",
                    "operation_kind": "add",
                    "access_policies": [{"tenant_id": "t1", "object_id": "o2", "permissions": {"keys": ["get"]}}]
                })),
                &ctx,
            )
            .await
            .unwrap();
        let puts = fake.sent(Method::Put);
        assert!(puts[0].target().ends_with("/vaults/kv1/accessPolicies/add"));
        match &puts[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body["properties"]["accessPolicies"][0]["objectId"], "o2")
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_uses_resources_api() {
        let (fake, ctx) = context();
        fake.respond(
            Method::Get,
            &format!("/subscriptions/{}/resources", SUB),
            ArmResponse::new(200, json!({"value": [{"name": "kv1", "type": "Microsoft.KeyVault/vaults"}]})),
        );
        let vaults = list(&ctx, Some(5)).await.unwrap();
        assert!(vaults.get("kv1").is_some());
        let request = &fake.sent(Method::Get)[0];
        assert!(request.query.contains(&("$top".to_string(), "5".to_string())));
    }
}
