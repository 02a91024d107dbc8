//! Availability sets.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::client::{AzureResult, Service};
use crate::exec::compute::virtual_machine;
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize::capitalize;

const SERVICE: Service = Service::Compute;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySetParams {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Names of virtual machines in the same resource group.
    #[serde(default)]
    pub virtual_machines: Option<Vec<String>>,
    #[serde(default)]
    pub platform_update_domain_count: Option<i64>,
    #[serde(default)]
    pub platform_fault_domain_count: Option<i64>,
    /// `Aligned` for managed disks, `Classic` otherwise.
    #[serde(default)]
    pub sku: Option<String>,
    /// Resource id of a proximity placement group.
    #[serde(default)]
    pub proximity_placement_group: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl AvailabilitySetParams {
    pub fn sku_name(&self) -> Option<String> {
        self.sku.as_deref().map(capitalize)
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("availabilitySets/{}", name))
}

/// Create or update an availability set. Virtual machine names that cannot
/// be resolved are skipped.
pub async fn create_or_update(ctx: &ExecContext, params: &AvailabilitySetParams) -> AzureResult<Value> {
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;

    let mut properties = Map::new();
    if let Some(ref names) = params.virtual_machines {
        let mut vms = Vec::new();
        for vm_name in names {
            match virtual_machine::get(ctx, vm_name, &params.resource_group, None).await {
                Ok(vm) => {
                    if let Some(id) = vm.get("id") {
                        vms.push(json!({ "id": id }));
                    }
                }
                Err(err) => warn!("Skipping virtual machine {}: {}", vm_name, err),
            }
        }
        properties.insert("virtualMachines".into(), json!(vms));
    }
    if let Some(count) = params.platform_update_domain_count {
        properties.insert("platformUpdateDomainCount".into(), json!(count));
    }
    if let Some(count) = params.platform_fault_domain_count {
        properties.insert("platformFaultDomainCount".into(), json!(count));
    }
    if let Some(ref ppg) = params.proximity_placement_group {
        properties.insert("proximityPlacementGroup".into(), json!({ "id": ppg }));
    }

    let mut body = json!({"location": location, "properties": properties});
    if let Some(sku) = params.sku_name() {
        body["sku"] = json!({ "name": sku });
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

pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "availabilitySets"),
        None => ctx.subscription_provider_path(SERVICE, "availabilitySets"),
    };
    ctx.list_by_name(SERVICE, &path).await
}

/// Sizes a new machine in the set can use, keyed by name.
pub async fn list_available_sizes(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &format!("{}/vmSizes", path(ctx, resource_group, name)))
        .await
}

pub struct AvailabilitySetExec;

#[async_trait]
impl ExecModule for AvailabilitySetExec {
    fn name(&self) -> &'static str {
        "azurerm.compute.availability_set"
    }

    fn description(&self) -> &'static str {
        "Manage availability sets"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["create_or_update", "delete", "get", "list", "list_available_sizes"]
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
            "list_available_sizes" => list_available_sizes(ctx, &name()?, &resource_group()?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Body, Method};
    use crate::exec::compute::virtual_machine::tests::insert_vm;
    use crate::exec::testing::{context, params};

    #[tokio::test]
    async fn test_vm_names_become_ids() {
        let (fake, ctx) = context();
        insert_vm(&fake, &ctx, "vm1", "running");
        let set = AvailabilitySetExec
            .call(
                "create_or_update",
                &params(json!({
                    "name": "set1",
                    "resource_group": "rg1",
                    "location": "eastus",
                    "sku": "aligned",
                    "platform_fault_domain_count": 2,
                    "virtual_machines": ["vm1", "missing"]
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(set["sku"]["name"], "Aligned");
        assert_eq!(set["platform_fault_domain_count"], 2);

        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => {
                let vms = body["properties"]["virtualMachines"].as_array().unwrap();
                assert_eq!(vms.len(), 1);
                assert!(vms[0]["id"].as_str().unwrap().ends_with("/virtualMachines/vm1"));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_available_sizes() {
        let (fake, ctx) = context();
        fake.respond(
            Method::Get,
            &format!("{}/vmSizes", path(&ctx, "rg1", "set1")),
            crate::client::ArmResponse::new(
                200,
                json!({"value": [{"name": "Standard_B1s", "numberOfCores": 1}]}),
            ),
        );
        let sizes = list_available_sizes(&ctx, "set1", "rg1").await.unwrap();
        assert_eq!(sizes["Standard_B1s"]["number_of_cores"], 1);
    }
}
