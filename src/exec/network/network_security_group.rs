//! Network security groups and their security rules.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Network;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSecurityGroupParams {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    /// Rules as mappings with a `name` and snake_case rule fields.
    /// Existing rules are kept when omitted.
    #[serde(default)]
    pub security_rules: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityRuleParams {
    pub name: String,
    pub security_group: String,
    pub resource_group: String,
    /// `Allow` or `Deny`
    pub access: String,
    /// `Inbound` or `Outbound`
    pub direction: String,
    /// 100 to 4096, lower is evaluated first.
    pub priority: i64,
    /// `Tcp`, `Udp`, `Icmp` or `*`
    pub protocol: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_address_prefix: Option<String>,
    #[serde(default)]
    pub destination_address_prefix: Option<String>,
    #[serde(default)]
    pub source_port_range: Option<String>,
    #[serde(default)]
    pub destination_port_range: Option<String>,
    #[serde(default)]
    pub source_address_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub destination_address_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub source_port_ranges: Option<Vec<String>>,
    #[serde(default)]
    pub destination_port_ranges: Option<Vec<String>>,
}

fn pick(plural: &mut Option<Vec<String>>, singular: &mut Option<String>, names: (&str, &str)) -> Result<(), String> {
    if plural.as_ref().map(Vec::is_empty).unwrap_or(false) {
        *plural = None;
    }
    if singular.as_deref().map(str::is_empty).unwrap_or(false) {
        *singular = None;
    }
    match (plural.is_some(), singular.is_some()) {
        (false, false) => Err(format!(
            "Either the {} or {} parameter must be provided!",
            names.0, names.1
        )),
        (true, _) => {
            *singular = None;
            Ok(())
        }
        (false, true) => Ok(()),
    }
}

impl SecurityRuleParams {
    /// Each address and port needs its singular or plural form; the plural
    /// form wins when both are given.
    pub fn normalized(&self) -> Result<Self, String> {
        let mut rule = self.clone();
        pick(
            &mut rule.source_port_ranges,
            &mut rule.source_port_range,
            ("source_port_ranges", "source_port_range"),
        )?;
        pick(
            &mut rule.source_address_prefixes,
            &mut rule.source_address_prefix,
            ("source_address_prefixes", "source_address_prefix"),
        )?;
        pick(
            &mut rule.destination_port_ranges,
            &mut rule.destination_port_range,
            ("destination_port_ranges", "destination_port_range"),
        )?;
        pick(
            &mut rule.destination_address_prefixes,
            &mut rule.destination_address_prefix,
            ("destination_address_prefixes", "destination_address_prefix"),
        )?;
        Ok(rule)
    }

    fn body(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("access".into(), json!(self.access));
        properties.insert("direction".into(), json!(self.direction));
        properties.insert("priority".into(), json!(self.priority));
        properties.insert("protocol".into(), json!(self.protocol));
        let optional = [
            ("description", self.description.as_ref().map(|v| json!(v))),
            ("sourceAddressPrefix", self.source_address_prefix.as_ref().map(|v| json!(v))),
            ("destinationAddressPrefix", self.destination_address_prefix.as_ref().map(|v| json!(v))),
            ("sourcePortRange", self.source_port_range.as_ref().map(|v| json!(v))),
            ("destinationPortRange", self.destination_port_range.as_ref().map(|v| json!(v))),
            ("sourceAddressPrefixes", self.source_address_prefixes.as_ref().map(|v| json!(v))),
            ("destinationAddressPrefixes", self.destination_address_prefixes.as_ref().map(|v| json!(v))),
            ("sourcePortRanges", self.source_port_ranges.as_ref().map(|v| json!(v))),
            ("destinationPortRanges", self.destination_port_ranges.as_ref().map(|v| json!(v))),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                properties.insert(key.into(), value);
            }
        }
        json!({ "properties": properties })
    }
}

/// Convert a user supplied rule mapping into an ARM security rule.
fn rule_resource(rule: &Value) -> AzureResult<Value> {
    let map = rule
        .as_object()
        .ok_or_else(|| AzureError::InvalidParameter("security_rules must be a list of dictionaries".into()))?;
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| AzureError::MissingParameter("security_rules[].name".into()))?;
    let properties: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| k.as_str() != "name")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(json!({
        "name": name,
        "properties": normalize::to_camel_keys(&Value::Object(properties)),
    }))
}

fn nsg_path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("networkSecurityGroups/{}", name))
}

fn rule_path(ctx: &ExecContext, resource_group: &str, security_group: &str, name: &str) -> String {
    format!("{}/securityRules/{}", nsg_path(ctx, resource_group, security_group), name)
}

pub async fn create_or_update(ctx: &ExecContext, params: &NetworkSecurityGroupParams) -> AzureResult<Value> {
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let path = nsg_path(ctx, &params.resource_group, &params.name);

    let mut properties = Map::new();
    match params.security_rules {
        Some(ref rules) => {
            let rules = rules.iter().map(rule_resource).collect::<AzureResult<Vec<_>>>()?;
            properties.insert("securityRules".into(), Value::Array(rules));
        }
        None => match ctx.quiet().get_raw(SERVICE, &path).await {
            Ok(existing) => {
                if let Some(rules) = existing.pointer("/properties/securityRules") {
                    debug!("Keeping existing security rules of {}", params.name);
                    properties.insert("securityRules".into(), rules.clone());
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        },
    }

    let mut body = json!({"location": location, "properties": properties});
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path, body).await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &nsg_path(ctx, resource_group, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &nsg_path(ctx, resource_group, name)).await
}

pub async fn list(ctx: &ExecContext, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.provider_path(resource_group, SERVICE, "networkSecurityGroups"))
        .await
}

pub async fn list_all(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "networkSecurityGroups"))
        .await
}

pub async fn security_rule_create_or_update(ctx: &ExecContext, params: &SecurityRuleParams) -> AzureResult<Value> {
    let rule = params.normalized().map_err(AzureError::InvalidParameter)?;
    ctx.put(
        SERVICE,
        &rule_path(ctx, &rule.resource_group, &rule.security_group, &rule.name),
        rule.body(),
    )
    .await
}

pub async fn security_rule_delete(
    ctx: &ExecContext,
    name: &str,
    security_group: &str,
    resource_group: &str,
) -> AzureResult<()> {
    ctx.delete(SERVICE, &rule_path(ctx, resource_group, security_group, name))
        .await
}

pub async fn security_rule_get(
    ctx: &ExecContext,
    name: &str,
    security_group: &str,
    resource_group: &str,
) -> AzureResult<Value> {
    ctx.get(SERVICE, &rule_path(ctx, resource_group, security_group, name))
        .await
}

pub async fn security_rules_list(ctx: &ExecContext, security_group: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(
        SERVICE,
        &format!("{}/securityRules", nsg_path(ctx, resource_group, security_group)),
    )
    .await
}

/// Built-in rules every group carries, keyed by name.
pub async fn default_security_rules_list(
    ctx: &ExecContext,
    security_group: &str,
    resource_group: &str,
) -> AzureResult<Value> {
    let nsg = get(ctx, security_group, resource_group).await?;
    let rules = nsg
        .get("default_security_rules")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(normalize::keyed_by_name(rules))
}

pub async fn default_security_rule_get(
    ctx: &ExecContext,
    name: &str,
    security_group: &str,
    resource_group: &str,
) -> AzureResult<Value> {
    let rules = default_security_rules_list(ctx, security_group, resource_group).await?;
    rules.get(name).cloned().ok_or_else(|| AzureError::NotFound {
        code: "NotFound".to_string(),
        message: format!("Unable to find {} in {}!", name, security_group),
    })
}

pub struct NetworkSecurityGroupExec;

#[async_trait]
impl ExecModule for NetworkSecurityGroupExec {
    fn name(&self) -> &'static str {
        "azurerm.network.network_security_group"
    }

    fn description(&self) -> &'static str {
        "Manage network security groups and security rules"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "create_or_update",
            "delete",
            "get",
            "list",
            "list_all",
            "security_rule_create_or_update",
            "security_rule_delete",
            "security_rule_get",
            "security_rules_list",
            "default_security_rule_get",
            "default_security_rules_list",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        let nsg = || params.get_string_required("security_group");
        match function {
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "list" => list(ctx, &resource_group()?).await,
            "list_all" => list_all(ctx).await,
            "security_rule_create_or_update" => {
                security_rule_create_or_update(ctx, &parse_params(params)?).await
            }
            "security_rule_delete" => {
                security_rule_delete(ctx, &name()?, &nsg()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "security_rule_get" => security_rule_get(ctx, &name()?, &nsg()?, &resource_group()?).await,
            "security_rules_list" => security_rules_list(ctx, &nsg()?, &resource_group()?).await,
            "default_security_rule_get" => {
                default_security_rule_get(ctx, &name()?, &nsg()?, &resource_group()?).await
            }
            "default_security_rules_list" => {
                default_security_rules_list(ctx, &nsg()?, &resource_group()?).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Body, Method};
    use crate::exec::testing::{context, params};

    fn rule() -> SecurityRuleParams {
        SecurityRuleParams {
            name: "allow-web".into(),
            security_group: "nsg1".into(),
            resource_group: "rg1".into(),
            access: "Allow".into(),
            direction: "Inbound".into(),
            priority: 100,
            protocol: "Tcp".into(),
            source_address_prefix: Some("*".into()),
            destination_address_prefix: Some("VirtualNetwork".into()),
            source_port_range: Some("*".into()),
            destination_port_ranges: Some(vec!["80".into(), "443".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_plural_wins() {
        let mut r = rule();
        r.destination_port_range = Some("22".into());
        let n = r.normalized().unwrap();
        assert_eq!(n.destination_port_range, None);
        assert_eq!(n.destination_port_ranges.unwrap().len(), 2);
    }

    #[test]
    fn test_missing_pair_is_rejected() {
        let mut r = rule();
        r.source_port_range = None;
        assert_eq!(
            r.normalized().unwrap_err(),
            "Either the source_port_ranges or source_port_range parameter must be provided!"
        );
    }

    #[test]
    fn test_empty_singular_counts_as_missing() {
        let mut r = rule();
        r.source_address_prefix = Some(String::new());
        assert_eq!(
            r.normalized().unwrap_err(),
            "Either the source_address_prefixes or source_address_prefix parameter must be provided!"
        );

        r.source_address_prefixes = Some(vec!["10.0.0.0/8".into()]);
        let n = r.normalized().unwrap();
        assert_eq!(n.source_address_prefix, None);
    }

    #[tokio::test]
    async fn test_create_with_rules() {
        let (fake, ctx) = context();
        let nsg = NetworkSecurityGroupExec
            .call(
                "create_or_update",
                &params(json!({
                    "name": "nsg1",
                    "resource_group": "rg1",
                    "location": "eastus",
                    "security_rules": [{
                        "name": "ssh",
                        "priority": 100,
                        "protocol": "Tcp",
                        "access": "Allow",
                        "direction": "Inbound",
                        "source_address_prefix": "*",
                        "destination_address_prefix": "*",
                        "source_port_range": "*",
                        "destination_port_range": "22"
                    }]
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(nsg["security_rules"][0]["destination_port_range"], "22");
        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body["properties"]["securityRules"][0]["properties"]["sourcePortRange"], "*")
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_rule_lookup() {
        let (fake, ctx) = context();
        fake.insert(
            &nsg_path(&ctx, "rg1", "nsg1"),
            json!({"location": "eastus", "properties": {"defaultSecurityRules": [
                {"name": "DenyAllInBound", "properties": {"access": "Deny", "priority": 65500}}
            ]}}),
        );
        let rule = default_security_rule_get(&ctx, "DenyAllInBound", "nsg1", "rg1").await.unwrap();
        assert_eq!(rule["priority"], 65500);

        let err = default_security_rule_get(&ctx, "Nope", "nsg1", "rg1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rule_put_body() {
        let (fake, ctx) = context();
        security_rule_create_or_update(&ctx, &rule()).await.unwrap();
        let put = &fake.sent(Method::Put)[0];
        assert!(put.target().ends_with("networkSecurityGroups/nsg1/securityRules/allow-web"));
        match &put.body {
            Some(Body::Json(body)) => {
                assert_eq!(body["properties"]["destinationPortRanges"], json!(["80", "443"]));
                assert!(body["properties"].get("destinationPortRange").is_none());
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}
