//! Virtual machines: inspection, power operations and deletion.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::{ArmRequest, AzureResult, Method, Service};
use crate::exec::{unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Compute;

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("virtualMachines/{}", name))
}

/// Get a virtual machine; `expand` may be `instanceView`.
pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str, expand: Option<&str>) -> AzureResult<Value> {
    let mut request = ArmRequest::management(Method::Get, path(ctx, resource_group, name), SERVICE.api_version());
    if let Some(expand) = expand {
        request = request.with_query("$expand", expand);
    }
    let response = ctx.call(SERVICE, request).await?;
    Ok(normalize::as_dict(response.body, SERVICE.flattens_properties()))
}

/// Power state from an instance view (`running`, `stopped`, `deallocated`,
/// `starting`, ...), if reported.
pub fn power_state(vm: &Value) -> Option<String> {
    vm.pointer("/instance_view/statuses")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|s| s.get("code").and_then(Value::as_str))
        .find_map(|code| code.strip_prefix("PowerState/"))
        .map(str::to_ascii_lowercase)
}

pub async fn list(ctx: &ExecContext, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.provider_path(resource_group, SERVICE, "virtualMachines"))
        .await
}

pub async fn list_all(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "virtualMachines"))
        .await
}

/// Sizes the machine can be resized to, keyed by name.
pub async fn list_available_sizes(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &format!("{}/vmSizes", path(ctx, resource_group, name)))
        .await
}

async fn action(ctx: &ExecContext, name: &str, resource_group: &str, action: &str) -> AzureResult<()> {
    ctx.post(SERVICE, &format!("{}/{}", path(ctx, resource_group, name), action), None)
        .await
        .map(|_| ())
}

pub async fn start(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    action(ctx, name, resource_group, "start").await
}

/// Power off; the machine stays allocated and billed.
pub async fn power_off(ctx: &ExecContext, name: &str, resource_group: &str, skip_shutdown: bool) -> AzureResult<()> {
    let request = ArmRequest::management(
        Method::Post,
        format!("{}/powerOff", path(ctx, resource_group, name)),
        SERVICE.api_version(),
    )
    .with_query("skipShutdown", skip_shutdown.to_string());
    ctx.call_lro(SERVICE, request).await.map(|_| ())
}

/// Power off and release the compute resources.
pub async fn deallocate(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    action(ctx, name, resource_group, "deallocate").await
}

pub async fn restart(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    action(ctx, name, resource_group, "restart").await
}

/// Move the machine to a new host node.
pub async fn redeploy(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    action(ctx, name, resource_group, "redeploy").await
}

/// Mark a deallocated machine as generalized so it can be captured.
pub async fn generalize(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    action(ctx, name, resource_group, "generalize").await
}

/// What to remove along with a deleted machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup {
    pub os_disk: bool,
    pub data_disks: bool,
    pub interfaces: bool,
}

impl Cleanup {
    pub fn from_params(params: &ModuleParams) -> Self {
        Self {
            os_disk: params.get_bool_or("cleanup_disks", false),
            data_disks: params.get_bool_or("cleanup_data_disks", false),
            interfaces: params.get_bool_or("cleanup_interfaces", false),
        }
    }
}

fn ids_at<'a>(vm: &'a Value, pointer: &str, id_pointer: &str) -> Vec<&'a str> {
    vm.pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.pointer(id_pointer).and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Delete a machine, then the disks and interfaces selected by `cleanup`.
///
/// Cleanup failures are logged; the machine itself is already gone.
pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str, cleanup: Cleanup) -> AzureResult<()> {
    let vm = if cleanup == Cleanup::default() {
        Value::Null
    } else {
        get(ctx, name, resource_group, None).await?
    };
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await?;

    let mut leftovers: Vec<(Service, String)> = Vec::new();
    if cleanup.os_disk {
        if let Some(id) = vm
            .pointer("/storage_profile/os_disk/managed_disk/id")
            .and_then(Value::as_str)
        {
            leftovers.push((Service::Disks, id.to_string()));
        }
    }
    if cleanup.data_disks {
        for id in ids_at(&vm, "/storage_profile/data_disks", "/managed_disk/id") {
            leftovers.push((Service::Disks, id.to_string()));
        }
    }
    if cleanup.interfaces {
        for id in ids_at(&vm, "/network_profile/network_interfaces", "/id") {
            let nic = ctx.get(Service::Network, id).await.ok();
            leftovers.push((Service::Network, id.to_string()));
            if let Some(nic) = nic {
                for ip in ids_at(&nic, "/ip_configurations", "/public_ip_address/id") {
                    leftovers.push((Service::Network, ip.to_string()));
                }
            }
        }
    }

    for (service, id) in leftovers {
        match ctx.delete(service, &id).await {
            Ok(()) => info!("Deleted {}", id),
            Err(err) => warn!("Unable to delete {}: {}", id, err),
        }
    }
    Ok(())
}

pub struct VirtualMachineExec;

#[async_trait]
impl ExecModule for VirtualMachineExec {
    fn name(&self) -> &'static str {
        "azurerm.compute.virtual_machine"
    }

    fn description(&self) -> &'static str {
        "Inspect, power-cycle and delete virtual machines"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "get",
            "list",
            "list_all",
            "list_available_sizes",
            "start",
            "power_off",
            "deallocate",
            "restart",
            "redeploy",
            "generalize",
            "delete",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        let done = |r: AzureResult<()>| r.map(|_| json!(true));
        match function {
            "get" => {
                get(ctx, &name()?, &resource_group()?, params.get_string("expand")?.as_deref()).await
            }
            "list" => list(ctx, &resource_group()?).await,
            "list_all" => list_all(ctx).await,
            "list_available_sizes" => list_available_sizes(ctx, &name()?, &resource_group()?).await,
            "start" => done(start(ctx, &name()?, &resource_group()?).await),
            "power_off" => {
                let skip = params.get_bool_or("skip_shutdown", false);
                done(power_off(ctx, &name()?, &resource_group()?, skip).await)
            }
            "deallocate" => done(deallocate(ctx, &name()?, &resource_group()?).await),
            "restart" => done(restart(ctx, &name()?, &resource_group()?).await),
            "redeploy" => done(redeploy(ctx, &name()?, &resource_group()?).await),
            "generalize" => done(generalize(ctx, &name()?, &resource_group()?).await),
            "delete" => {
                done(delete(ctx, &name()?, &resource_group()?, Cleanup::from_params(params)).await)
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::fake::FakeArm;
    use crate::exec::testing::{context, params};

    /// Store a machine whose instance view reports `power`.
    pub(crate) fn insert_vm(fake: &FakeArm, ctx: &ExecContext, name: &str, power: &str) {
        fake.insert(
            &path(ctx, "rg1", name),
            json!({
                "location": "eastus",
                "properties": {
                    "storageProfile": {
                        "osDisk": {"managedDisk": {"id": ctx.provider_path("rg1", Service::Disks, "disks/os1")}},
                        "dataDisks": [
                            {"lun": 0, "managedDisk": {"id": ctx.provider_path("rg1", Service::Disks, "disks/data1")}}
                        ]
                    },
                    "networkProfile": {"networkInterfaces": []},
                    "instanceView": {
                        "statuses": [
                            {"code": "ProvisioningState/succeeded"},
                            {"code": format!("PowerState/{}", power)}
                        ]
                    }
                }
            }),
        );
    }

    #[tokio::test]
    async fn test_power_state() {
        let (fake, ctx) = context();
        insert_vm(&fake, &ctx, "vm1", "deallocated");
        let vm = get(&ctx, "vm1", "rg1", Some("instanceView")).await.unwrap();
        assert_eq!(power_state(&vm).as_deref(), Some("deallocated"));
        assert!(fake.sent(Method::Get)[0]
            .query
            .contains(&("$expand".to_string(), "instanceView".to_string())));
        assert_eq!(power_state(&json!({})), None);
    }

    #[tokio::test]
    async fn test_power_off_skip_shutdown() {
        let (fake, ctx) = context();
        let p = params(json!({"name": "vm1", "resource_group": "rg1", "skip_shutdown": true}));
        assert_eq!(VirtualMachineExec.call("power_off", &p, &ctx).await.unwrap(), json!(true));
        let post = &fake.sent(Method::Post)[0];
        assert!(post.target().ends_with("/virtualMachines/vm1/powerOff"));
        assert!(post.query.contains(&("skipShutdown".to_string(), "true".to_string())));
    }

    #[tokio::test]
    async fn test_delete_with_disk_cleanup() {
        let (fake, ctx) = context();
        insert_vm(&fake, &ctx, "vm1", "running");
        let p = params(json!({
            "name": "vm1", "resource_group": "rg1",
            "cleanup_disks": true, "cleanup_data_disks": true
        }));
        VirtualMachineExec.call("delete", &p, &ctx).await.unwrap();
        let deleted: Vec<String> = fake.sent(Method::Delete).iter().map(|r| r.target().to_string()).collect();
        assert_eq!(deleted.len(), 3);
        assert!(deleted[0].ends_with("/virtualMachines/vm1"));
        assert!(deleted[1].ends_with("/disks/os1"));
        assert!(deleted[2].ends_with("/disks/data1"));
    }
}
