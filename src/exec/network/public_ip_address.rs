//! Public IP addresses.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize::{self, capitalize};
use crate::resource_id::is_valid_resource_id;

const SERVICE: Service = Service::Network;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicIpAddressParams {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    /// `Basic` or `Standard`
    #[serde(default)]
    pub sku: Option<String>,
    /// `Static` or `Dynamic`
    #[serde(default)]
    pub public_ip_allocation_method: Option<String>,
    /// `IPv4` or `IPv6`
    #[serde(default)]
    pub public_ip_address_version: Option<String>,
    #[serde(default)]
    pub idle_timeout_in_minutes: Option<i64>,
    /// `domain_name_label`, `fqdn`, `reverse_fqdn`
    #[serde(default)]
    pub dns_settings: Option<Map<String, Value>>,
    #[serde(default)]
    pub ddos_settings: Option<Value>,
    /// Resource id of a public IP prefix.
    #[serde(default)]
    pub public_ip_prefix: Option<String>,
    #[serde(default)]
    pub zones: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl PublicIpAddressParams {
    pub fn validate(&self) -> Result<(), String> {
        match self.public_ip_prefix {
            Some(ref prefix) if !is_valid_resource_id(prefix, None) => {
                Err("The specified resource ID of the Public IP Prefix is invalid.".to_string())
            }
            _ => Ok(()),
        }
    }

    /// SKU name as ARM spells it.
    pub fn sku_name(&self) -> Option<String> {
        self.sku.as_deref().map(capitalize)
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("publicIPAddresses/{}", name))
}

pub async fn create_or_update(ctx: &ExecContext, params: &PublicIpAddressParams) -> AzureResult<Value> {
    params.validate().map_err(AzureError::InvalidParameter)?;
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;

    let mut properties = Map::new();
    if let Some(ref method) = params.public_ip_allocation_method {
        properties.insert("publicIPAllocationMethod".into(), json!(capitalize(method)));
    }
    if let Some(ref version) = params.public_ip_address_version {
        properties.insert("publicIPAddressVersion".into(), json!(version));
    }
    if let Some(timeout) = params.idle_timeout_in_minutes {
        properties.insert("idleTimeoutInMinutes".into(), json!(timeout));
    }
    if let Some(ref dns) = params.dns_settings {
        properties.insert("dnsSettings".into(), normalize::to_camel_keys(&Value::Object(dns.clone())));
    }
    if let Some(ref ddos) = params.ddos_settings {
        properties.insert("ddosSettings".into(), normalize::to_camel_keys(ddos));
    }
    if let Some(ref prefix) = params.public_ip_prefix {
        properties.insert("publicIPPrefix".into(), json!({ "id": prefix }));
    }

    let mut body = json!({"location": location, "properties": properties});
    if let Some(sku) = params.sku_name() {
        body["sku"] = json!({ "name": sku });
    }
    if let Some(ref zones) = params.zones {
        body["zones"] = json!(zones);
    }
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

/// Public IPs in a resource group, or the whole subscription.
pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    match resource_group {
        Some(rg) => {
            ctx.list_by_name(SERVICE, &ctx.provider_path(rg, SERVICE, "publicIPAddresses"))
                .await
        }
        None => list_all(ctx).await,
    }
}

pub async fn list_all(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "publicIPAddresses"))
        .await
}

/// Replace the tags without touching anything else.
pub async fn update_tags(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    tags: &BTreeMap<String, String>,
) -> AzureResult<Value> {
    ctx.patch(SERVICE, &path(ctx, resource_group, name), json!({ "tags": tags }))
        .await
}

pub struct PublicIpAddressExec;

#[async_trait]
impl ExecModule for PublicIpAddressExec {
    fn name(&self) -> &'static str {
        "azurerm.network.public_ip_address"
    }

    fn description(&self) -> &'static str {
        "Manage public IP addresses"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["create_or_update", "delete", "get", "list", "list_all", "update_tags"]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "list_all" => list_all(ctx).await,
            "update_tags" => {
                let tags: BTreeMap<String, String> = match params.get("tags") {
                    Some(tags) => serde_json::from_value(tags.clone())
                        .map_err(|e| AzureError::InvalidParameter(format!("tags: {}", e)))?,
                    None => BTreeMap::new(),
                };
                update_tags(ctx, &name()?, &resource_group()?, &tags).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
