//! Key vault state.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::client::AzureResult;
use crate::exec::keyvault::vault::{self, AccessPolicy, VaultParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{deep_diff, sorted_strings};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "Key Vault";

fn policies_sorted(policies: Vec<Value>) -> Vec<Value> {
    let mut policies = policies;
    policies.sort_by(|a, b| {
        let key = |p: &Value| p.get("object_id").and_then(Value::as_str).unwrap_or_default().to_string();
        key(a).cmp(&key(b))
    });
    policies
}

/// Compare access policies pairwise after sorting by object id.
///
/// Permission lists only count when the new policy names them.
fn access_policies_changed(old: &[Value], new: &[AccessPolicy]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    let old = policies_sorted(old.to_vec());
    let mut new = new.to_vec();
    new.sort_by(|a, b| a.object_id.cmp(&b.object_id));

    old.iter().zip(new.iter()).any(|(old, new)| {
        let text = |key: &str| old.get(key).and_then(Value::as_str);
        if text("tenant_id") != Some(new.tenant_id.as_str())
            || text("object_id") != Some(new.object_id.as_str())
            || text("application_id") != new.application_id.as_deref()
        {
            return true;
        }
        let old_permissions = old.get("permissions");
        let kinds = [
            ("keys", &new.permissions.keys),
            ("secrets", &new.permissions.secrets),
            ("certificates", &new.permissions.certificates),
        ];
        kinds.iter().any(|(kind, wanted)| match wanted {
            Some(wanted) => {
                let mut wanted: Vec<String> = wanted.iter().map(|w| w.to_ascii_lowercase()).collect();
                wanted.sort();
                sorted_strings(old_permissions.and_then(|p| p.get(*kind))) != wanted
            }
            None => false,
        })
    })
}

fn bool_change(changes: &mut Map<String, Value>, old: &Value, key: &str, new: Option<bool>) {
    if let Some(new) = new {
        let current = old.get(key).and_then(Value::as_bool);
        if current != Some(new) {
            changes.insert(key.to_string(), json!({"old": current, "new": new}));
        }
    }
}

/// Ensure a key vault exists with the given settings.
pub async fn present(ctx: &ExecContext, params: &VaultParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(vault::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(current) => {
            let old_tags = current.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let props = current.get("properties").cloned().unwrap_or_else(|| json!({}));
            let mut changes = Map::new();

            let old_policies = props
                .get("access_policies")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let new_policies = params.access_policies.clone().unwrap_or_default();
            if access_policies_changed(&old_policies, &new_policies) {
                changes.insert(
                    "access_policies".into(),
                    json!({"old": old_policies, "new": new_policies}),
                );
            }

            let old_sku = props.pointer("/sku/name").and_then(Value::as_str);
            if old_sku.map(|s| !s.eq_ignore_ascii_case(&params.sku)).unwrap_or(true) {
                changes.insert("sku".into(), json!({"old": old_sku, "new": params.sku}));
            }

            for (key, new) in [
                ("enabled_for_deployment", params.enabled_for_deployment),
                ("enabled_for_disk_encryption", params.enabled_for_disk_encryption),
                ("enabled_for_template_deployment", params.enabled_for_template_deployment),
                ("enable_soft_delete", params.enable_soft_delete),
                ("enable_purge_protection", params.enable_purge_protection),
                ("enable_rbac_authorization", params.enable_rbac_authorization),
            ] {
                bool_change(&mut changes, &props, key, new);
            }

            if let Some(ref acls) = params.network_acls {
                let old_acls = props.get("network_acls").cloned().unwrap_or_else(|| json!({}));
                if let Some(diff) = deep_diff(&old_acls, acls) {
                    changes.insert("network_acls".into(), diff);
                }
            }

            if !changes.is_empty() {
                ret.change("properties", Value::Object(changes));
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
    let result = vault::create_or_update(ctx, params).await;
    Ok(ret.finish(LABEL, action, result))
}

/// Ensure a key vault does not exist.
pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(vault::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || vault::delete(ctx, name, resource_group)).await)
}

pub struct VaultState;

#[async_trait]
impl StateModule for VaultState {
    fn name(&self) -> &'static str {
        "azurerm.keyvault.vault"
    }

    fn description(&self) -> &'static str {
        "Ensure key vaults are present or absent"
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
    use crate::exec::keyvault::vault::Permissions;
    use crate::exec::testing::context;

    fn policy(object_id: &str, secrets: &[&str]) -> AccessPolicy {
        AccessPolicy {
            tenant_id: "t1".into(),
            object_id: object_id.into(),
            application_id: None,
            permissions: Permissions {
                secrets: Some(secrets.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            },
        }
    }

    fn params(policies: Vec<AccessPolicy>) -> VaultParams {
        VaultParams {
            name: "kv1".into(),
            resource_group: "rg1".into(),
            location: "eastus".into(),
            tenant_id: "t1".into(),
            sku: "standard".into(),
            access_policies: Some(policies),
            enabled_for_deployment: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_policy_and_permission_order_ignored() {
        let (_fake, ctx) = context();
        let ret = present(&ctx, &params(vec![policy("b", &["get", "list"]), policy("a", &["set"])]))
            .await
            .unwrap();
        assert_eq!(ret.comment, "Key Vault kv1 has been created.");

        let ret = present(&ctx, &params(vec![policy("a", &["set"]), policy("b", &["list", "get"])]))
            .await
            .unwrap();
        assert_eq!(ret.comment, "Key Vault kv1 is already present.");
    }

    #[tokio::test]
    async fn test_changes_nest_under_properties() {
        let (_fake, ctx) = context();
        present(&ctx, &params(vec![policy("a", &["get"])])).await.unwrap();

        let mut changed = params(vec![policy("a", &["get", "delete"])]);
        changed.sku = "premium".into();
        changed.enabled_for_deployment = Some(false);
        let ret = present(&ctx.clone().with_test(true), &changed).await.unwrap();
        assert_eq!(ret.result, None);
        let props = &ret.changes["properties"];
        assert_eq!(props["sku"], json!({"old": "standard", "new": "premium"}));
        assert_eq!(props["enabled_for_deployment"], json!({"old": true, "new": false}));
        assert!(props.get("access_policies").is_some());
    }

    #[test]
    fn test_unnamed_permissions_do_not_count() {
        let old = vec![json!({
            "tenant_id": "t1",
            "object_id": "a",
            "permissions": {"keys": ["get"], "secrets": ["get"]}
        })];
        assert!(!access_policies_changed(&old, &[policy("a", &["get"])]));
        assert!(access_policies_changed(&old, &[policy("a", &["list"])]));
        assert!(access_policies_changed(&old, &[]));
    }
}
