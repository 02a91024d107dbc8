//! Management lock states.
//!
//! `present`/`absent` work at subscription level, or at resource group level
//! when `resource_group` is given. The `_by_scope` and `_at_resource_level`
//! variants address the lock explicitly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::resource::management_lock::{self, LockParams, LockScope, ResourceAddress};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "management lock";

#[derive(Debug, Deserialize, Serialize)]
struct PresentParams {
    #[serde(flatten)]
    lock: LockParams,
    #[serde(default)]
    resource_group: Option<String>,
}

fn sorted_owner_ids(lock: &Value) -> Vec<String> {
    let mut owners: Vec<String> = lock
        .get("owners")
        .and_then(Value::as_array)
        .map(|owners| {
            owners
                .iter()
                .filter_map(|o| o.get("application_id").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    owners.sort();
    owners
}

/// Ensure a lock exists at `scope` with the given level, notes and owners.
pub async fn present_at(ctx: &ExecContext, scope: &LockScope, params: &LockParams, new: Value) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(management_lock::get(&ctx.quiet(), scope, &params.name)).await?;

    let action = match existing {
        Some(lock) => {
            let old_level = lock.get("level").and_then(Value::as_str);
            if old_level != Some(params.lock_level.as_str()) {
                ret.change("level", json!({"old": old_level, "new": params.lock_level.as_str()}));
            }

            let old_notes = lock.get("notes").and_then(Value::as_str);
            if old_notes != params.notes.as_deref() {
                ret.change("notes", json!({"old": old_notes, "new": params.notes}));
            }

            if let Some(ref owners) = params.owners {
                let mut new_owners = owners.clone();
                new_owners.sort();
                let old_owners = sorted_owner_ids(&lock);
                if old_owners != new_owners {
                    ret.change("owners", json!({"old": old_owners, "new": new_owners}));
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), new);
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }
    let result = management_lock::create_or_update(ctx, scope, params).await;
    Ok(ret.finish(LABEL, action, result))
}

/// Ensure a lock does not exist at `scope`.
pub async fn absent_at(ctx: &ExecContext, scope: &LockScope, name: &str) -> AzureResult<StateReturn> {
    let existing = lookup(management_lock::get(&ctx.quiet(), scope, name)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || management_lock::delete(ctx, scope, name)).await)
}

fn default_scope(params: &ModuleParams) -> AzureResult<LockScope> {
    Ok(match params.get_string("resource_group")? {
        Some(rg) => LockScope::ResourceGroup(rg),
        None => LockScope::Subscription,
    })
}

pub struct ManagementLockState;

#[async_trait]
impl StateModule for ManagementLockState {
    fn name(&self) -> &'static str {
        "azurerm.resource.management_lock"
    }

    fn description(&self) -> &'static str {
        "Ensure management locks are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "present",
            "absent",
            "present_by_scope",
            "absent_by_scope",
            "present_at_resource_level",
            "absent_at_resource_level",
        ]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "present" => {
                let req: PresentParams = parse_params(params)?;
                present_at(ctx, &default_scope(params)?, &req.lock, desired(&req)).await
            }
            "absent" => absent_at(ctx, &default_scope(params)?, &params.get_string_required("name")?).await,
            "present_by_scope" => {
                let scope = LockScope::Scope(params.get_string_required("scope")?);
                let lock: LockParams = parse_params(params)?;
                let mut new = desired(&lock);
                new["scope"] = json!(params.get_string_required("scope")?);
                present_at(ctx, &scope, &lock, new).await
            }
            "absent_by_scope" => {
                let scope = LockScope::Scope(params.get_string_required("scope")?);
                absent_at(ctx, &scope, &params.get_string_required("name")?).await
            }
            "present_at_resource_level" => {
                let address: ResourceAddress = parse_params(params)?;
                let lock: LockParams = parse_params(params)?;
                let mut new = desired(&lock);
                new["resource"] = json!(address.resource);
                new["resource_group"] = json!(address.resource_group);
                present_at(ctx, &LockScope::Resource(address), &lock, new).await
            }
            "absent_at_resource_level" => {
                let address: ResourceAddress = parse_params(params)?;
                absent_at(ctx, &LockScope::Resource(address), &params.get_string_required("name")?).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
