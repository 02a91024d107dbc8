//! Storage account state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::storage::account::{self, StorageAccountParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::deep_diff;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "storage account";

fn value_or_empty(current: &Value, key: &str) -> Value {
    current
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Ensure a storage account exists with the given settings.
pub async fn present(ctx: &ExecContext, params: &StorageAccountParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(account::get_properties(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(current) => {
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&value_or_empty(&current, "tags"), &new_tags));

            let old_sku = current.pointer("/sku/name").and_then(Value::as_str);
            if old_sku != Some(params.sku.as_str()) {
                ret.change("sku", json!({"old": old_sku, "new": params.sku}));
            }
            let old_kind = current.get("kind").and_then(Value::as_str);
            if old_kind != Some(params.kind.as_str()) {
                ret.change("kind", json!({"old": old_kind, "new": params.kind}));
            }

            // (change key, key in the account, wanted)
            let switches = [
                ("enable_https_traffic_only", "supports_https_traffic_only", params.https_traffic_only),
                ("is_hns_enabled", "is_hns_enabled", params.hns_enabled),
                ("allow_blob_public_access", "allow_blob_public_access", params.blob_public_access),
            ];
            for (change_key, key, wanted) in switches {
                if let Some(wanted) = wanted {
                    let old = current.get(key).and_then(Value::as_bool);
                    if old != Some(wanted) {
                        ret.change(change_key, json!({"old": old, "new": wanted}));
                    }
                }
            }

            let texts = [
                ("large_file_shares_state", &params.large_file_shares),
                ("minimum_tls_version", &params.minimum_tls_version),
                ("access_tier", &params.access_tier),
            ];
            for (key, wanted) in texts {
                if let Some(wanted) = wanted {
                    let old = current.get(key).and_then(Value::as_str);
                    if old != Some(wanted.as_str()) {
                        ret.change(key, json!({"old": old, "new": wanted}));
                    }
                }
            }

            let structured = [
                (
                    "azure_files_identity_based_authentication",
                    "azure_files_identity_based_authentication",
                    &params.azure_files_identity_based_auth,
                ),
                ("network_rule_set", "network_acls", &params.network_rule_set),
                ("routing_preference", "routing_preference", &params.routing_preference),
                ("custom_domain", "custom_domain", &params.custom_domain),
            ];
            for (change_key, key, wanted) in structured {
                if let Some(wanted) = wanted {
                    ret.change_if(change_key, deep_diff(&value_or_empty(&current, key), wanted));
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
    let result = account::create(ctx, params).await;
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(account::get_properties(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || account::delete(ctx, name, resource_group)).await)
}

pub struct StorageAccountState;

#[async_trait]
impl StateModule for StorageAccountState {
    fn name(&self) -> &'static str {
        "azurerm.storage.account"
    }

    fn description(&self) -> &'static str {
        "Ensure storage accounts are present or absent"
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
    use crate::exec::testing::{context, params};

    fn account_params(extra: Value) -> ModuleParams {
        let mut base = json!({
            "name": "acct1",
            "resource_group": "rg1",
            "sku": "Standard_LRS",
            "kind": "StorageV2",
            "location": "eastus",
            "https_traffic_only": true,
            "network_rule_set": {"default_action": "Allow"}
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        params(base)
    }

    #[tokio::test]
    async fn test_present_is_idempotent() {
        let (_fake, ctx) = context();
        let ret = StorageAccountState.apply("present", &account_params(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Storage account acct1 has been created.");

        let ret = StorageAccountState.apply("present", &account_params(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Storage account acct1 is already present.");
    }

    #[tokio::test]
    async fn test_changed_settings_are_reported() {
        let (_fake, ctx) = context();
        StorageAccountState.apply("present", &account_params(json!({})), &ctx).await.unwrap();

        let changed = account_params(json!({
            "sku": "Standard_GRS",
            "https_traffic_only": false,
            "network_rule_set": {"default_action": "Deny"}
        }));
        let ret = StorageAccountState
            .apply("present", &changed, &ctx.clone().with_test(true))
            .await
            .unwrap();
        assert_eq!(ret.comment, "Storage account acct1 would be updated.");
        assert_eq!(ret.changes["sku"], json!({"old": "Standard_LRS", "new": "Standard_GRS"}));
        assert_eq!(ret.changes["enable_https_traffic_only"], json!({"old": true, "new": false}));
        assert_eq!(
            ret.changes["network_rule_set"],
            json!({"default_action": {"old": "Allow", "new": "Deny"}})
        );
    }

    #[tokio::test]
    async fn test_absent_in_test_mode() {
        let (_fake, ctx) = context();
        StorageAccountState.apply("present", &account_params(json!({})), &ctx).await.unwrap();
        let ret = StorageAccountState
            .apply("absent", &params(json!({"name": "acct1", "resource_group": "rg1"})), &ctx.clone().with_test(true))
            .await
            .unwrap();
        assert_eq!(ret.comment, "Storage account acct1 would be deleted.");
        assert_eq!(ret.result, None);
    }
}
