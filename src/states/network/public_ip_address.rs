//! Public IP address state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::network::public_ip_address::{self, PublicIpAddressParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::normalize::capitalize;
use crate::states::diff::deep_diff;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "public IP address";

/// Ensure a public IP address exists.
///
/// When only the tags differ they are patched instead of re-sending the
/// whole resource.
pub async fn present(ctx: &ExecContext, params: &PublicIpAddressParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    if let Err(comment) = params.validate() {
        return Ok(ret.fail(comment));
    }
    let existing = lookup(public_ip_address::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(ip) => {
            let old_tags = ip.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            if let Some(ref dns) = params.dns_settings {
                let old_dns = ip.get("dns_settings");
                let differs = dns
                    .iter()
                    .any(|(key, value)| old_dns.and_then(|d| d.get(key)) != Some(value));
                if differs {
                    ret.change("dns_settings", json!({"old": old_dns, "new": dns}));
                }
            }

            let old_ddos = ip.get("ddos_settings").cloned().unwrap_or_else(|| json!({}));
            let new_ddos = params.ddos_settings.clone().unwrap_or_else(|| json!({}));
            ret.change_if("ddos_settings", deep_diff(&old_ddos, &new_ddos));

            if let Some(sku) = params.sku_name() {
                let old = ip.pointer("/sku/name").and_then(Value::as_str);
                if old != Some(sku.as_str()) {
                    ret.change("sku", json!({"old": ip.get("sku"), "new": {"name": sku}}));
                }
            }

            if let Some(ref method) = params.public_ip_allocation_method {
                let old = ip.get("public_ip_allocation_method").and_then(Value::as_str);
                if old != Some(capitalize(method).as_str()) {
                    ret.change("public_ip_allocation_method", json!({"old": old, "new": method}));
                }
            }

            if let Some(ref version) = params.public_ip_address_version {
                let old = ip.get("public_ip_address_version").and_then(Value::as_str);
                if !old.unwrap_or_default().eq_ignore_ascii_case(version) {
                    ret.change("public_ip_address_version", json!({"old": old, "new": version}));
                }
            }

            if let Some(timeout) = params.idle_timeout_in_minutes {
                let old = ip.get("idle_timeout_in_minutes").and_then(Value::as_i64);
                if old != Some(timeout) {
                    ret.change("idle_timeout_in_minutes", json!({"old": old, "new": timeout}));
                }
            }

            if let Some(ref prefix) = params.public_ip_prefix {
                let old = ip.pointer("/public_ip_prefix/id").and_then(Value::as_str);
                if !old.unwrap_or_default().eq_ignore_ascii_case(prefix) {
                    ret.change(
                        "public_ip_prefix",
                        json!({"old": ip.get("public_ip_prefix"), "new": {"id": prefix}}),
                    );
                }
            }

            if let Some(ref zones) = params.zones {
                let mut old: Vec<String> = ip
                    .get("zones")
                    .and_then(Value::as_array)
                    .map(|z| z.iter().filter_map(Value::as_str).map(String::from).collect())
                    .unwrap_or_default();
                old.sort();
                let mut new = zones.clone();
                new.sort();
                if old != new {
                    ret.change("zones", json!({"old": ip.get("zones"), "new": zones}));
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

    let tags_only = action == Action::Update && ret.changes.len() == 1 && ret.changes.contains_key("tags");
    let result = if tags_only {
        public_ip_address::update_tags(
            ctx,
            &params.name,
            &params.resource_group,
            &params.tags.clone().unwrap_or_default(),
        )
        .await
    } else {
        public_ip_address::create_or_update(ctx, params).await
    };
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(public_ip_address::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || {
        public_ip_address::delete(ctx, name, resource_group)
    })
    .await)
}

pub struct PublicIpAddressState;

#[async_trait]
impl StateModule for PublicIpAddressState {
    fn name(&self) -> &'static str {
        "azurerm.network.public_ip_address"
    }

    fn description(&self) -> &'static str {
        "Ensure public IP addresses are present or absent"
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

    fn pip(extra: Value) -> ModuleParams {
        let mut base = json!({
            "name": "pip1",
            "resource_group": "rg1",
            "location": "eastus",
            "sku": "basic",
            "public_ip_allocation_method": "dynamic"
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        params(base)
    }

    #[tokio::test]
    async fn test_present_is_idempotent() {
        let (_fake, ctx) = context();
        let ret = PublicIpAddressState.apply("present", &pip(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Public IP address pip1 has been created.");
        assert_eq!(ret.changes["old"], json!({}));

        let ret = PublicIpAddressState.apply("present", &pip(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Public IP address pip1 is already present.");
    }

    #[tokio::test]
    async fn test_tag_only_change_patches() {
        let (fake, ctx) = context();
        PublicIpAddressState.apply("present", &pip(json!({})), &ctx).await.unwrap();
        let ret = PublicIpAddressState
            .apply("present", &pip(json!({"tags": {"env": "prod"}})), &ctx)
            .await
            .unwrap();
        assert_eq!(ret.comment, "Public IP address pip1 has been updated.");
        assert_eq!(fake.sent(Method::Put).len(), 1);
        assert_eq!(fake.sent(Method::Patch).len(), 1);
    }

    #[tokio::test]
    async fn test_sku_change_in_test_mode() {
        let (fake, ctx) = context();
        PublicIpAddressState.apply("present", &pip(json!({})), &ctx).await.unwrap();
        let ret = PublicIpAddressState
            .apply("present", &pip(json!({"sku": "STANDARD"})), &ctx.clone().with_test(true))
            .await
            .unwrap();
        assert_eq!(ret.result, None);
        assert_eq!(ret.changes["sku"]["new"], json!({"name": "Standard"}));
        assert_eq!(fake.sent(Method::Put).len(), 1);
    }
}
