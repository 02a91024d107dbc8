//! Container registry state.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::client::AzureResult;
use crate::exec::containerregistry::registry::{
    self, rules_from_registry, RegistryParams, IP_RULE_KEY, VNET_RULE_KEY,
};
use crate::exec::containerregistry::replication;
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{compare_list_of_dicts, deep_diff};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "container registry";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStateParams {
    #[serde(flatten)]
    pub registry: RegistryParams,
    /// Locations to replicate to, besides the registry's own.
    #[serde(default)]
    pub replica_locations: Vec<String>,
}

fn lowered(locations: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    locations.into_iter().map(|l| l.to_ascii_lowercase()).collect()
}

fn policy_change(ret: &mut StateReturn, acr: &Value, key: &str, pointer: &str, wanted: Option<String>) {
    if let Some(wanted) = wanted {
        let old = acr.pointer(pointer).and_then(Value::as_str).unwrap_or_default();
        if !old.eq_ignore_ascii_case(&wanted) {
            ret.change(key, json!({"old": old, "new": wanted}));
        }
    }
}

/// Ensure a container registry exists, with geo-replication to
/// `replica_locations`.
pub async fn present(ctx: &ExecContext, params: &RegistryStateParams) -> AzureResult<StateReturn> {
    let reg = &params.registry;
    let mut ret = StateReturn::new(&reg.name);
    if let Err(comment) = reg.validate() {
        return Ok(ret.fail(comment));
    }
    let existing = lookup(registry::get(&ctx.quiet(), &reg.name, &reg.resource_group)).await?;

    // Replica locations to add and remove once the registry is in place.
    let mut to_add: BTreeSet<String> = BTreeSet::new();
    let mut to_remove: BTreeSet<String> = BTreeSet::new();
    let mut only_replicas = false;

    let action = match existing {
        Some(acr) => {
            let old_sku = acr.pointer("/sku/name").and_then(Value::as_str).unwrap_or_default();
            if !old_sku.eq_ignore_ascii_case(&reg.sku) {
                ret.change("sku", json!({"old": old_sku, "new": reg.sku}));
            }

            if let Some(admin) = reg.admin_user_enabled {
                let old = acr.get("admin_user_enabled").and_then(Value::as_bool);
                if old != Some(admin) {
                    ret.change("admin_user_enabled", json!({"old": old, "new": admin}));
                }
            }

            policy_change(
                &mut ret,
                &acr,
                "default_action",
                "/network_rule_set/default_action",
                reg.default_action.clone(),
            );

            let rule_lists = [
                ("virtual_network_rules", "id", VNET_RULE_KEY, &reg.virtual_network_rules),
                ("ip_rules", "value", IP_RULE_KEY, &reg.ip_rules),
            ];
            for (list, wire_key, key, wanted) in rule_lists {
                if let Some(wanted) = wanted.as_ref().filter(|w| !w.is_empty()) {
                    let old = rules_from_registry(&acr, list, wire_key, key);
                    let comparison = compare_list_of_dicts(&old, &json!(wanted), &[], Some(key));
                    if let Some(comment) = comparison.comment {
                        return Ok(ret.fail(format!("\"{}\" {}", list, comment)));
                    }
                    ret.change_if(list, comparison.changes);
                }
            }

            policy_change(
                &mut ret,
                &acr,
                "trust_policy",
                "/policies/trust_policy/status",
                reg.trust_policy.as_ref().map(|p| p.status()),
            );
            policy_change(
                &mut ret,
                &acr,
                "quarantine_policy",
                "/policies/quarantine_policy/status",
                reg.quarantine_policy.as_ref().map(|p| p.status()),
            );
            policy_change(
                &mut ret,
                &acr,
                "retention_policy",
                "/policies/retention_policy/status",
                reg.retention_policy.as_ref().map(|p| p.status()),
            );
            if let Some(days) = reg.retention_days {
                let old = acr.pointer("/policies/retention_policy/days").and_then(Value::as_i64);
                if old != Some(days) {
                    ret.change("retention_days", json!({"old": old, "new": days}));
                }
            }

            let old_tags = acr.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(reg.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let home = acr
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_lowercase();
            let replicas = replication::list(&ctx.quiet(), &reg.name, &reg.resource_group).await?;
            let mut current = lowered(
                replicas
                    .as_object()
                    .map(|r| r.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            );
            if current.is_empty() {
                current.insert(home.clone());
            }
            let mut wanted = lowered(params.replica_locations.clone());
            wanted.insert(home);

            if current != wanted {
                only_replicas = !ret.has_changes();
                to_add = wanted.difference(&current).cloned().collect();
                to_remove = current.difference(&wanted).cloned().collect();
                ret.change("replica_locations", json!({"old": current, "new": wanted}));
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            let home = reg.location.clone().unwrap_or_default().to_ascii_lowercase();
            to_add = lowered(params.replica_locations.clone());
            to_add.remove(&home);
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }

    if !only_replicas {
        if let Err(err) = registry::create_or_update(ctx, reg).await {
            return Ok(ret.finish(LABEL, action, Err::<Value, _>(err)));
        }
    }

    for location in &to_add {
        if let Err(err) =
            replication::create_or_update(ctx, location, &reg.name, &reg.resource_group, reg.tags.as_ref()).await
        {
            error!("Unable to enable replication to {}! ({})", location, err);
        }
    }
    for location in &to_remove {
        if let Err(err) = replication::delete(ctx, location, &reg.name, &reg.resource_group).await {
            error!("Unable to disable replication to {}! ({})", location, err);
        }
    }
    Ok(ret.finish(LABEL, action, Ok(())))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(registry::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || registry::delete(ctx, name, resource_group)).await)
}

pub struct RegistryState;

#[async_trait]
impl StateModule for RegistryState {
    fn name(&self) -> &'static str {
        "azurerm.containerregistry.registry"
    }

    fn description(&self) -> &'static str {
        "Ensure container registries and their replications are present or absent"
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
