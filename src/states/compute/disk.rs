//! Managed disk state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::compute::disk::{self, DiskParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{deep_diff, sorted_strings, str_changed};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "managed disk";

/// Ensure a managed disk exists. Disks can grow but never shrink.
pub async fn present(ctx: &ExecContext, params: &DiskParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(disk::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(current) => {
            let old_tags = current.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let old_sku = current.pointer("/sku/name").and_then(Value::as_str);
            if str_changed(old_sku, params.sku.as_deref()) {
                ret.change("sku", json!({"old": old_sku, "new": params.sku}));
            }

            if let Some(size) = params.disk_size_gb {
                let old = current.get("disk_size_gb").and_then(Value::as_i64);
                match old {
                    Some(old) if size < old => {
                        return Ok(ret.fail(format!(
                            "The size of disk {} cannot be reduced from {} GB to {} GB.",
                            params.name, old, size
                        )))
                    }
                    Some(old) if size == old => {}
                    _ => ret.change("disk_size_gb", json!({"old": old, "new": size})),
                }
            }

            let old_policy = current.get("network_access_policy").and_then(Value::as_str);
            if str_changed(old_policy, params.network_access_policy.as_deref()) {
                ret.change(
                    "network_access_policy",
                    json!({"old": old_policy, "new": params.network_access_policy}),
                );
            }

            if let Some(ref zones) = params.zones {
                let old = sorted_strings(current.get("zones"));
                let new = sorted_strings(Some(&json!(zones)));
                if old != new {
                    ret.change("zones", json!({"old": current.get("zones"), "new": zones}));
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            if let Err(comment) = params.validate() {
                return Ok(ret.fail(comment));
            }
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }
    let result = disk::create_or_update(ctx, params).await;
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(disk::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || disk::delete(ctx, name, resource_group)).await)
}

pub struct DiskState;

#[async_trait]
impl StateModule for DiskState {
    fn name(&self) -> &'static str {
        "azurerm.compute.disk"
    }

    fn description(&self) -> &'static str {
        "Ensure managed disks are present or absent"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Method;
    use crate::exec::testing::{context, params};

    fn data_disk(size: i64) -> ModuleParams {
        params(json!({
            "name": "data1",
            "resource_group": "rg1",
            "location": "eastus",
            "sku": "Premium_LRS",
            "disk_size_gb": size
        }))
    }

    #[tokio::test]
    async fn test_grow_disk() {
        let (fake, ctx) = context();
        let ret = DiskState.apply("present", &data_disk(32), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Managed disk data1 has been created.");

        let ret = DiskState.apply("present", &data_disk(32), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Managed disk data1 is already present.");

        let ret = DiskState.apply("present", &data_disk(64), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Managed disk data1 has been updated.");
        assert_eq!(ret.changes["disk_size_gb"], json!({"old": 32, "new": 64}));
        assert_eq!(fake.sent(Method::Put).len(), 2);
    }

    #[tokio::test]
    async fn test_shrink_fails() {
        let (fake, ctx) = context();
        DiskState.apply("present", &data_disk(64), &ctx).await.unwrap();
        let ret = DiskState.apply("present", &data_disk(32), &ctx).await.unwrap();
        assert_eq!(ret.result, Some(false));
        assert_eq!(ret.comment, "The size of disk data1 cannot be reduced from 64 GB to 32 GB.");
        assert_eq!(fake.sent(Method::Put).len(), 1);
    }

    #[tokio::test]
    async fn test_absent() {
        let (_fake, ctx) = context();
        DiskState.apply("present", &data_disk(32), &ctx).await.unwrap();
        let p = params(json!({"name": "data1", "resource_group": "rg1"}));
        let ret = DiskState.apply("absent", &p, &ctx).await.unwrap();
        assert_eq!(ret.comment, "Managed disk data1 has been deleted.");
    }
}
