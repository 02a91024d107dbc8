//! Virtual network and subnet states.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::network::virtual_network::{self, SubnetParams, VirtualNetworkParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::resource_id::last_segment;
use crate::states::diff::deep_diff;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const VNET: &str = "virtual network";
const SUBNET: &str = "subnet";

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

/// Lists compared as sets.
fn set_changed(old: &[String], new: &[String]) -> bool {
    old.iter().collect::<BTreeSet<_>>() != new.iter().collect::<BTreeSet<_>>()
}

/// Ensure a virtual network exists.
pub async fn present(ctx: &ExecContext, params: &VirtualNetworkParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    if let Err(comment) = params.validate() {
        return Ok(ret.fail(comment));
    }
    let existing = lookup(virtual_network::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(vnet) => {
            let old_tags = vnet.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let old_dns = string_list(vnet.pointer("/dhcp_options/dns_servers"));
            let new_dns = params.dns_servers.clone().unwrap_or_default();
            if set_changed(&old_dns, &new_dns) {
                ret.change("dns_servers", json!({"old": old_dns, "new": params.dns_servers}));
            }

            let old_prefixes = string_list(vnet.pointer("/address_space/address_prefixes"));
            if set_changed(&old_prefixes, &params.address_prefixes) {
                ret.change(
                    "address_space",
                    json!({"address_prefixes": {"old": old_prefixes, "new": params.address_prefixes}}),
                );
            }

            if let Some(enabled) = params.enable_ddos_protection {
                let old = vnet.get("enable_ddos_protection").and_then(Value::as_bool);
                if old != Some(enabled) {
                    ret.change("enable_ddos_protection", json!({"old": old, "new": enabled}));
                }
            }

            if let Some(ref plan) = params.ddos_protection_plan {
                let old = vnet.pointer("/ddos_protection_plan/id").and_then(Value::as_str);
                if old.map(|o| !o.eq_ignore_ascii_case(plan)).unwrap_or(true) {
                    ret.change(
                        "ddos_protection_plan",
                        json!({"old": vnet.get("ddos_protection_plan"), "new": {"id": plan}}),
                    );
                }
            }

            if let Some(enabled) = params.enable_vm_protection {
                let old = vnet.get("enable_vm_protection").and_then(Value::as_bool);
                if old != Some(enabled) {
                    ret.change("enable_vm_protection", json!({"old": old, "new": enabled}));
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(VNET));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(VNET, action));
    }
    let result = virtual_network::create_or_update(ctx, params).await;
    Ok(ret.finish(VNET, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(virtual_network::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, VNET, existing, || {
        virtual_network::delete(ctx, name, resource_group)
    })
    .await)
}

/// Name of a referenced resource (`{"id": ...}`), if any.
fn ref_name(subnet: &Value, key: &str) -> Option<String> {
    subnet
        .get(key)
        .and_then(|r| r.get("id"))
        .and_then(Value::as_str)
        .map(|id| last_segment(id).to_string())
}

/// Ensure a subnet exists in a virtual network.
pub async fn subnet_present(ctx: &ExecContext, params: &SubnetParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(virtual_network::subnet_get(
        &ctx.quiet(),
        &params.name,
        &params.virtual_network,
        &params.resource_group,
    ))
    .await?;

    let action = match existing {
        Some(subnet) => {
            let old_prefix = subnet.get("address_prefix").and_then(Value::as_str);
            if old_prefix != Some(params.address_prefix.as_str()) {
                ret.change(
                    "address_prefix",
                    json!({"old": old_prefix, "new": params.address_prefix}),
                );
            }

            for (key, wanted) in [
                ("network_security_group", &params.network_security_group),
                ("route_table", &params.route_table),
            ] {
                if let Some(wanted) = wanted {
                    let old = ref_name(&subnet, key);
                    if old.as_deref().map(|o| !o.eq_ignore_ascii_case(wanted)).unwrap_or(true) {
                        ret.change(key, json!({"old": old, "new": wanted}));
                    }
                }
            }

            if let Some(ref endpoints) = params.service_endpoints {
                let old_services: Vec<String> = subnet
                    .get("service_endpoints")
                    .and_then(Value::as_array)
                    .map(|eps| {
                        eps.iter()
                            .filter_map(|e| e.get("service").and_then(Value::as_str))
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let mut old_sorted = old_services.clone();
                old_sorted.sort();
                let mut new_sorted = endpoints.clone();
                new_sorted.sort();
                if old_sorted != new_sorted {
                    ret.change(
                        "service_endpoints",
                        json!({"old": old_services, "new": endpoints}),
                    );
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(SUBNET));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(SUBNET, action));
    }
    let result = virtual_network::subnet_create_or_update(ctx, params).await;
    Ok(ret.finish(SUBNET, action, result))
}

pub async fn subnet_absent(
    ctx: &ExecContext,
    name: &str,
    virtual_network: &str,
    resource_group: &str,
) -> AzureResult<StateReturn> {
    let existing = lookup(virtual_network::subnet_get(&ctx.quiet(), name, virtual_network, resource_group)).await?;
    Ok(ensure_absent(ctx, name, SUBNET, existing, || {
        virtual_network::subnet_delete(ctx, name, virtual_network, resource_group)
    })
    .await)
}

pub struct VirtualNetworkState;

#[async_trait]
impl StateModule for VirtualNetworkState {
    fn name(&self) -> &'static str {
        "azurerm.network.virtual_network"
    }

    fn description(&self) -> &'static str {
        "Ensure virtual networks and subnets are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["present", "absent", "subnet_present", "subnet_absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "present" => present(ctx, &parse_params(params)?).await,
            "absent" => absent(ctx, &name()?, &resource_group()?).await,
            "subnet_present" => subnet_present(ctx, &parse_params(params)?).await,
            "subnet_absent" => {
                subnet_absent(
                    ctx,
                    &name()?,
                    &params.get_string_required("virtual_network")?,
                    &resource_group()?,
                )
                .await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
