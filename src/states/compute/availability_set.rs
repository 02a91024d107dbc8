//! Availability set state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::compute::availability_set::{self, AvailabilitySetParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::resource_id::last_segment;
use crate::states::diff::deep_diff;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "availability set";

fn count_change(ret: &mut StateReturn, aset: &Value, key: &str, wanted: Option<i64>) {
    if let Some(wanted) = wanted {
        let old = aset.get(key).and_then(Value::as_i64);
        if old != Some(wanted) {
            ret.change(key, json!({"old": old, "new": wanted}));
        }
    }
}

pub async fn present(ctx: &ExecContext, params: &AvailabilitySetParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(availability_set::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(aset) => {
            let old_tags = aset.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            count_change(&mut ret, &aset, "platform_update_domain_count", params.platform_update_domain_count);
            count_change(&mut ret, &aset, "platform_fault_domain_count", params.platform_fault_domain_count);

            if let Some(sku) = params.sku_name() {
                let old = aset.pointer("/sku/name").and_then(Value::as_str);
                if old != Some(sku.as_str()) {
                    ret.change("sku", json!({"old": aset.get("sku"), "new": {"name": sku}}));
                }
            }

            if let Some(ref vms) = params.virtual_machines {
                let old_vms = aset.get("virtual_machines").cloned().unwrap_or_else(|| json!([]));
                let mut remote: Vec<String> = old_vms
                    .as_array()
                    .map(|vms| {
                        vms.iter()
                            .filter_map(|vm| vm.get("id").and_then(Value::as_str))
                            .map(|id| last_segment(id).to_ascii_lowercase())
                            .collect()
                    })
                    .unwrap_or_default();
                remote.sort();
                let mut local: Vec<String> = vms.iter().map(|vm| vm.to_ascii_lowercase()).collect();
                local.sort();
                if local != remote {
                    ret.change("virtual_machines", json!({"old": old_vms, "new": vms}));
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }
    let result = availability_set::create_or_update(ctx, params).await;
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(availability_set::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || {
        availability_set::delete(ctx, name, resource_group)
    })
    .await)
}

pub struct AvailabilitySetState;

#[async_trait]
impl StateModule for AvailabilitySetState {
    fn name(&self) -> &'static str {
        "azurerm.compute.availability_set"
    }

    fn description(&self) -> &'static str {
        "Ensure availability sets are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["present", "absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "present" => present(ctx, &parse_params(params)?).await,
            "absent" => {
                absent(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("resource_group")?,
                )
                .await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
