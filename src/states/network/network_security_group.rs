//! Network security group and security rule states.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::network::network_security_group::{self, NetworkSecurityGroupParams, SecurityRuleParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{compare_list_of_dicts, deep_diff, sorted_strings};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const NSG: &str = "network security group";
const RULE: &str = "security rule";

/// Ensure a network security group exists.
///
/// Rules are only managed when `security_rules` is given.
pub async fn present(ctx: &ExecContext, params: &NetworkSecurityGroupParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(network_security_group::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(nsg) => {
            let old_tags = nsg.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            if let Some(ref rules) = params.security_rules {
                let old_rules = nsg.get("security_rules").cloned().unwrap_or(Value::Null);
                let compared = compare_list_of_dicts(&old_rules, &Value::Array(rules.clone()), &[], None);
                if let Some(comment) = compared.comment {
                    return Ok(ret.fail(format!("\"security_rules\" {}", comment)));
                }
                ret.change_if("security_rules", compared.changes);
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(NSG));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(NSG, action));
    }
    let result = network_security_group::create_or_update(ctx, params).await;
    Ok(ret.finish(NSG, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(network_security_group::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, NSG, existing, || {
        network_security_group::delete(ctx, name, resource_group)
    })
    .await)
}

fn text<'a>(rule: &'a Value, key: &str) -> Option<&'a str> {
    rule.get(key).and_then(Value::as_str)
}

fn lowered(list: &Option<Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = list
        .iter()
        .flatten()
        .map(|s| s.to_ascii_lowercase())
        .collect();
    out.sort();
    out
}

/// Field changes between an existing rule and the normalized parameters.
fn rule_changes(ret: &mut StateReturn, old: &Value, new: &SecurityRuleParams) {
    for (key, wanted) in [
        ("access", &new.access),
        ("direction", &new.direction),
        ("protocol", &new.protocol),
    ] {
        let current = text(old, key);
        if !current.unwrap_or_default().eq_ignore_ascii_case(wanted) {
            ret.change(key, json!({"old": current, "new": wanted}));
        }
    }

    if text(old, "description") != new.description.as_deref() {
        ret.change(
            "description",
            json!({"old": old.get("description"), "new": new.description}),
        );
    }

    let priority = old.get("priority").and_then(Value::as_i64);
    if priority != Some(new.priority) {
        ret.change("priority", json!({"old": priority, "new": new.priority}));
    }

    for (key, wanted) in [
        ("source_port_range", &new.source_port_range),
        ("destination_port_range", &new.destination_port_range),
    ] {
        if text(old, key) != wanted.as_deref() {
            ret.change(key, json!({"old": old.get(key), "new": wanted}));
        }
    }

    for (key, wanted) in [
        ("source_address_prefix", &new.source_address_prefix),
        ("destination_address_prefix", &new.destination_address_prefix),
    ] {
        let current = text(old, key).unwrap_or_default();
        if !current.eq_ignore_ascii_case(wanted.as_deref().unwrap_or_default()) {
            ret.change(key, json!({"old": old.get(key), "new": wanted}));
        }
    }

    // Port ranges compare exactly, address prefixes ignore case.
    for (key, wanted, fold) in [
        ("source_port_ranges", &new.source_port_ranges, false),
        ("destination_port_ranges", &new.destination_port_ranges, false),
        ("source_address_prefixes", &new.source_address_prefixes, true),
        ("destination_address_prefixes", &new.destination_address_prefixes, true),
    ] {
        let differs = if fold {
            sorted_strings(old.get(key)) != lowered(wanted)
        } else {
            let mut current: Vec<String> = old
                .get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            current.sort();
            let mut wanted_sorted = wanted.clone().unwrap_or_default();
            wanted_sorted.sort();
            current != wanted_sorted
        };
        if differs {
            ret.change(key, json!({"old": old.get(key), "new": wanted}));
        }
    }
}

/// Ensure a security rule exists in a network security group.
pub async fn security_rule_present(ctx: &ExecContext, params: &SecurityRuleParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let rule = match params.normalized() {
        Ok(rule) => rule,
        Err(comment) => return Ok(ret.fail(comment)),
    };
    let existing = lookup(network_security_group::security_rule_get(
        &ctx.quiet(),
        &rule.name,
        &rule.security_group,
        &rule.resource_group,
    ))
    .await?;

    let action = match existing {
        Some(old) => {
            rule_changes(&mut ret, &old, &rule);
            if !ret.has_changes() {
                return Ok(ret.already_present(RULE));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(&rule));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(RULE, action));
    }
    let result = network_security_group::security_rule_create_or_update(ctx, &rule).await;
    Ok(ret.finish(RULE, action, result))
}

pub async fn security_rule_absent(
    ctx: &ExecContext,
    name: &str,
    security_group: &str,
    resource_group: &str,
) -> AzureResult<StateReturn> {
    let existing = lookup(network_security_group::security_rule_get(
        &ctx.quiet(),
        name,
        security_group,
        resource_group,
    ))
    .await?;
    Ok(ensure_absent(ctx, name, RULE, existing, || {
        network_security_group::security_rule_delete(ctx, name, security_group, resource_group)
    })
    .await)
}

pub struct NetworkSecurityGroupState;

#[async_trait]
impl StateModule for NetworkSecurityGroupState {
    fn name(&self) -> &'static str {
        "azurerm.network.network_security_group"
    }

    fn description(&self) -> &'static str {
        "Ensure network security groups and rules are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["present", "absent", "security_rule_present", "security_rule_absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "present" => present(ctx, &parse_params(params)?).await,
            "absent" => absent(ctx, &name()?, &resource_group()?).await,
            "security_rule_present" => security_rule_present(ctx, &parse_params(params)?).await,
            "security_rule_absent" => {
                security_rule_absent(
                    ctx,
                    &name()?,
                    &params.get_string_required("security_group")?,
                    &resource_group()?,
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

    fn rule_params(port: &str) -> ModuleParams {
        params(json!({
            "name": "ssh",
            "security_group": "nsg1",
            "resource_group": "rg1",
            "access": "allow",
            "direction": "inbound",
            "priority": 100,
            "protocol": "tcp",
            "source_address_prefix": "Internet",
            "destination_address_prefix": "*",
            "source_port_range": "*",
            "destination_port_range": port
        }))
    }

    #[tokio::test]
    async fn test_rule_case_insensitive_fields() {
        let (_fake, ctx) = context();
        let ret = NetworkSecurityGroupState
            .apply("security_rule_present", &rule_params("22"), &ctx)
            .await
            .unwrap();
        assert_eq!(ret.comment, "Security rule ssh has been created.");

        let ret = NetworkSecurityGroupState
            .apply("security_rule_present", &rule_params("22"), &ctx)
            .await
            .unwrap();
        assert_eq!(ret.comment, "Security rule ssh is already present.");

        let ret = NetworkSecurityGroupState
            .apply("security_rule_present", &rule_params("2222"), &ctx.clone().with_test(true))
            .await
            .unwrap();
        assert_eq!(ret.result, None);
        assert_eq!(ret.changes["destination_port_range"], json!({"old": "22", "new": "2222"}));
        assert_eq!(ret.changes.len(), 1);
    }

    #[tokio::test]
    async fn test_rule_missing_pair_fails() {
        let (fake, ctx) = context();
        let mut p = rule_params("22");
        p.remove("source_port_range");
        let ret = NetworkSecurityGroupState
            .apply("security_rule_present", &p, &ctx)
            .await
            .unwrap();
        assert_eq!(ret.result, Some(false));
        assert!(ret.comment.starts_with("Either the source_port_ranges"));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_present_manages_rules_only_when_given() {
        let (fake, ctx) = context();
        let rules = json!([{"name": "web", "priority": 200, "protocol": "Tcp", "access": "Allow",
            "direction": "Inbound", "source_address_prefix": "*", "destination_address_prefix": "*",
            "source_port_range": "*", "destination_port_range": "443"}]);
        let p = params(json!({"name": "nsg1", "resource_group": "rg1", "location": "eastus", "security_rules": rules}));
        let ret = NetworkSecurityGroupState.apply("present", &p, &ctx).await.unwrap();
        assert_eq!(ret.comment, "Network security group nsg1 has been created.");

        let p = params(json!({"name": "nsg1", "resource_group": "rg1", "location": "eastus", "tags": {"env": "dev"}}));
        let ret = NetworkSecurityGroupState.apply("present", &p, &ctx).await.unwrap();
        assert_eq!(ret.comment, "Network security group nsg1 has been updated.");
        assert!(ret.changes.get("security_rules").is_none());

        let stored = fake.sent(Method::Put);
        assert_eq!(stored.len(), 2);
        let nsg = network_security_group::get(&ctx, "nsg1", "rg1").await.unwrap();
        assert_eq!(nsg["security_rules"][0]["name"], "web");
    }

    #[tokio::test]
    async fn test_bad_rule_list_fails() {
        let (fake, ctx) = context();
        fake.insert(
            &ctx.provider_path("rg1", crate::client::Service::Network, "networkSecurityGroups/nsg1"),
            json!({"location": "eastus"}),
        );
        let p = params(json!({"name": "nsg1", "resource_group": "rg1", "security_rules": [{"priority": 1}]}));
        let ret = NetworkSecurityGroupState.apply("present", &p, &ctx).await.unwrap();
        assert_eq!(ret.result, Some(false));
        assert_eq!(
            ret.comment,
            "\"security_rules\" configuration dictionaries must contain the \"name\" key!"
        );
    }
}
