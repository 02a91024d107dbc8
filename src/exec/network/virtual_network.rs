//! Virtual networks and subnets.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{ArmRequest, AzureError, AzureResult, Method, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;
use crate::resource_id::is_valid_resource_id;

const SERVICE: Service = Service::Network;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualNetworkParams {
    pub name: String,
    pub resource_group: String,
    pub address_prefixes: Vec<String>,
    /// Defaults to the resource group's location.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub dns_servers: Option<Vec<String>>,
    #[serde(default)]
    pub enable_ddos_protection: Option<bool>,
    /// Resource id of a DDoS protection plan.
    #[serde(default)]
    pub ddos_protection_plan: Option<String>,
    #[serde(default)]
    pub enable_vm_protection: Option<bool>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl VirtualNetworkParams {
    /// Reject DDoS settings ARM would refuse.
    pub fn validate(&self) -> Result<(), String> {
        if self.enable_ddos_protection == Some(true) && self.ddos_protection_plan.is_none() {
            return Err("The resource ID of the DDOS Protection Plan must be specified if DDOS protection is going to be enabled.".to_string());
        }
        if let Some(ref plan) = self.ddos_protection_plan {
            if !is_valid_resource_id(plan, None) {
                return Err("The specified resource ID of the DDOS Protection Plan is invalid.".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetParams {
    pub name: String,
    pub virtual_network: String,
    pub resource_group: String,
    pub address_prefix: String,
    /// Name of a network security group in the same resource group.
    #[serde(default)]
    pub network_security_group: Option<String>,
    /// Name of a route table in the same resource group.
    #[serde(default)]
    pub route_table: Option<String>,
    /// Service names, e.g. `Microsoft.Storage`.
    #[serde(default)]
    pub service_endpoints: Option<Vec<String>>,
}

fn vnet_path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("virtualNetworks/{}", name))
}

fn subnet_path(ctx: &ExecContext, resource_group: &str, vnet: &str, name: &str) -> String {
    format!("{}/subnets/{}", vnet_path(ctx, resource_group, vnet), name)
}

/// List virtual networks in a resource group, or in the subscription.
pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    match resource_group {
        Some(rg) => ctx.list_by_name(SERVICE, &ctx.provider_path(rg, SERVICE, "virtualNetworks")).await,
        None => list_all(ctx).await,
    }
}

pub async fn list_all(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "virtualNetworks"))
        .await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &vnet_path(ctx, resource_group, name)).await
}

/// Create or update a virtual network.
///
/// ARM replaces the subnet list on PUT, so subnets of an existing network
/// are sent back unchanged.
pub async fn create_or_update(ctx: &ExecContext, params: &VirtualNetworkParams) -> AzureResult<Value> {
    params.validate().map_err(AzureError::InvalidParameter)?;
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let path = vnet_path(ctx, &params.resource_group, &params.name);

    let mut properties = Map::new();
    properties.insert(
        "addressSpace".into(),
        json!({"addressPrefixes": params.address_prefixes}),
    );
    if let Some(ref dns) = params.dns_servers {
        properties.insert("dhcpOptions".into(), json!({"dnsServers": dns}));
    }
    if let Some(enabled) = params.enable_ddos_protection {
        properties.insert("enableDdosProtection".into(), json!(enabled));
    }
    if let Some(ref plan) = params.ddos_protection_plan {
        properties.insert("ddosProtectionPlan".into(), json!({"id": plan}));
    }
    if let Some(enabled) = params.enable_vm_protection {
        properties.insert("enableVmProtection".into(), json!(enabled));
    }

    match ctx.quiet().get_raw(SERVICE, &path).await {
        Ok(existing) => {
            if let Some(subnets) = existing.pointer("/properties/subnets") {
                debug!("Keeping existing subnets of {}", params.name);
                properties.insert("subnets".into(), subnets.clone());
            }
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err),
    }

    let mut body = json!({"location": location, "properties": properties});
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path, body).await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &vnet_path(ctx, resource_group, name)).await
}

pub async fn subnets_list(ctx: &ExecContext, virtual_network: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(
        SERVICE,
        &format!("{}/subnets", vnet_path(ctx, resource_group, virtual_network)),
    )
    .await
}

pub async fn subnet_get(ctx: &ExecContext, name: &str, virtual_network: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &subnet_path(ctx, resource_group, virtual_network, name))
        .await
}

async fn resource_ref(ctx: &ExecContext, resource_group: &str, kind: &str, name: &str) -> AzureResult<Value> {
    let found = ctx
        .get(SERVICE, &ctx.provider_path(resource_group, SERVICE, &format!("{}/{}", kind, name)))
        .await?;
    let id = found
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AzureError::InvalidParameter(format!("{} {} has no id", kind, name)))?;
    Ok(json!({ "id": id }))
}

/// Create or update a subnet; NSG and route table names are resolved to ids.
pub async fn subnet_create_or_update(ctx: &ExecContext, params: &SubnetParams) -> AzureResult<Value> {
    let mut properties = Map::new();
    properties.insert("addressPrefix".into(), json!(params.address_prefix));
    if let Some(ref nsg) = params.network_security_group {
        properties.insert(
            "networkSecurityGroup".into(),
            resource_ref(ctx, &params.resource_group, "networkSecurityGroups", nsg).await?,
        );
    }
    if let Some(ref table) = params.route_table {
        properties.insert(
            "routeTable".into(),
            resource_ref(ctx, &params.resource_group, "routeTables", table).await?,
        );
    }
    if let Some(ref endpoints) = params.service_endpoints {
        let endpoints: Vec<Value> = endpoints.iter().map(|s| json!({ "service": s })).collect();
        properties.insert("serviceEndpoints".into(), Value::Array(endpoints));
    }

    ctx.put(
        SERVICE,
        &subnet_path(ctx, &params.resource_group, &params.virtual_network, &params.name),
        json!({ "properties": properties }),
    )
    .await
}

pub async fn subnet_delete(ctx: &ExecContext, name: &str, virtual_network: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &subnet_path(ctx, resource_group, virtual_network, name))
        .await
}

/// Whether a private address is free in a virtual network.
pub async fn check_ip_address_availability(
    ctx: &ExecContext,
    ip_address: &str,
    virtual_network: &str,
    resource_group: &str,
) -> AzureResult<Value> {
    let path = format!(
        "{}/CheckIPAddressAvailability",
        vnet_path(ctx, resource_group, virtual_network)
    );
    let request = ArmRequest::management(Method::Get, path, SERVICE.api_version())
        .with_query("ipAddress", ip_address);
    let response = ctx.call(SERVICE, request).await?;
    Ok(normalize::as_dict(response.body, true))
}

pub struct VirtualNetworkExec;

#[async_trait]
impl ExecModule for VirtualNetworkExec {
    fn name(&self) -> &'static str {
        "azurerm.network.virtual_network"
    }

    fn description(&self) -> &'static str {
        "Manage virtual networks and subnets"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "list",
            "list_all",
            "get",
            "create_or_update",
            "delete",
            "subnets_list",
            "subnet_get",
            "subnet_create_or_update",
            "subnet_delete",
            "check_ip_address_availability",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        let vnet = || params.get_string_required("virtual_network");
        match function {
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "list_all" => list_all(ctx).await,
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "subnets_list" => subnets_list(ctx, &vnet()?, &resource_group()?).await,
            "subnet_get" => subnet_get(ctx, &name()?, &vnet()?, &resource_group()?).await,
            "subnet_create_or_update" => subnet_create_or_update(ctx, &parse_params(params)?).await,
            "subnet_delete" => {
                subnet_delete(ctx, &name()?, &vnet()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "check_ip_address_availability" => {
                check_ip_address_availability(
                    ctx,
                    &params.get_string_required("ip_address")?,
                    &vnet()?,
                    &resource_group()?,
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
    use crate::client::Body;
    use crate::exec::testing::{context, params};

    fn vnet_params() -> VirtualNetworkParams {
        VirtualNetworkParams {
            name: "vnet1".into(),
            resource_group: "rg1".into(),
            address_prefixes: vec!["10.0.0.0/16".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_location_defaults_to_resource_group() {
        let (fake, ctx) = context();
        fake.insert(&ctx.resource_group_path("rg1"), json!({"location": "westus2"}));
        let vnet = create_or_update(&ctx, &vnet_params()).await.unwrap();
        assert_eq!(vnet["location"], "westus2");
        assert_eq!(vnet["address_space"]["address_prefixes"][0], "10.0.0.0/16");
    }

    #[tokio::test]
    async fn test_missing_resource_group_fails() {
        let (_fake, ctx) = context();
        let err = create_or_update(&ctx, &vnet_params()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ddos_validation() {
        let mut p = vnet_params();
        p.enable_ddos_protection = Some(true);
        assert!(p.validate().unwrap_err().contains("must be specified"));
        p.ddos_protection_plan = Some("plan".into());
        assert!(p.validate().unwrap_err().contains("invalid"));
        p.ddos_protection_plan = Some(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/ddosProtectionPlans/p".into(),
        );
        assert!(p.validate().is_ok());
    }

    #[tokio::test]
    async fn test_update_keeps_subnets() {
        let (fake, ctx) = context();
        let path = vnet_path(&ctx, "rg1", "vnet1");
        fake.insert(
            &path,
            json!({"location": "eastus", "properties": {"subnets": [{"name": "default", "properties": {"addressPrefix": "10.0.0.0/24"}}]}}),
        );
        let mut p = vnet_params();
        p.location = Some("eastus".into());
        create_or_update(&ctx, &p).await.unwrap();
        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => assert_eq!(body["properties"]["subnets"][0]["name"], "default"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subnet_resolves_nsg() {
        let (fake, ctx) = context();
        let nsg = ctx.provider_path("rg1", SERVICE, "networkSecurityGroups/nsg1");
        fake.insert(&nsg, json!({"location": "eastus"}));
        let subnet = VirtualNetworkExec
            .call(
                "subnet_create_or_update",
                &params(json!({
                    "name": "web",
                    "virtual_network": "vnet1",
                    "resource_group": "rg1",
                    "address_prefix": "10.0.1.0/24",
                    "network_security_group": "nsg1",
                    "service_endpoints": ["Microsoft.Storage"]
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(subnet["network_security_group"]["id"], json!(nsg));
        assert_eq!(subnet["service_endpoints"][0]["service"], "Microsoft.Storage");

        let err = VirtualNetworkExec
            .call(
                "subnet_create_or_update",
                &params(json!({
                    "name": "web",
                    "virtual_network": "vnet1",
                    "resource_group": "rg1",
                    "address_prefix": "10.0.1.0/24",
                    "route_table": "missing"
                })),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
