//! Container registries.
//!
//! Network rules and policies are Premium-only; asking for them on another
//! tier is rejected before anything is sent.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize::capitalize;

const SERVICE: Service = Service::ContainerRegistry;

/// A policy switch, given either as a boolean or as `enabled`/`disabled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyStatus {
    Flag(bool),
    Status(String),
}

impl PolicyStatus {
    pub fn status(&self) -> String {
        match self {
            PolicyStatus::Flag(true) => "enabled".to_string(),
            PolicyStatus::Flag(false) => "disabled".to_string(),
            PolicyStatus::Status(s) => s.to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryParams {
    /// 5 to 50 alphanumeric characters, globally unique.
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    /// `Basic`, `Standard` or `Premium`
    #[serde(default = "default_sku")]
    pub sku: String,
    #[serde(default)]
    pub admin_user_enabled: Option<bool>,
    /// `Allow` or `Deny`
    #[serde(default)]
    pub default_action: Option<String>,
    /// `[{"virtual_network_resource_id": ..., "action": "Allow"}]`
    #[serde(default)]
    pub virtual_network_rules: Option<Vec<Value>>,
    /// `[{"ip_address_or_range": ..., "action": "Allow"}]`
    #[serde(default)]
    pub ip_rules: Option<Vec<Value>>,
    #[serde(default)]
    pub trust_policy: Option<PolicyStatus>,
    #[serde(default)]
    pub quarantine_policy: Option<PolicyStatus>,
    #[serde(default)]
    pub retention_policy: Option<PolicyStatus>,
    /// 0 to 365; 0 deletes untagged manifests immediately.
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Default for RegistryParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            resource_group: String::new(),
            location: None,
            sku: default_sku(),
            admin_user_enabled: None,
            default_action: None,
            virtual_network_rules: None,
            ip_rules: None,
            trust_policy: None,
            quarantine_policy: None,
            retention_policy: None,
            retention_days: None,
            tags: None,
        }
    }
}

fn default_sku() -> String {
    "Basic".to_string()
}

impl RegistryParams {
    pub fn is_premium(&self) -> bool {
        self.sku.eq_ignore_ascii_case("premium")
    }

    fn uses_premium_features(&self) -> bool {
        self.default_action.is_some()
            || self.virtual_network_rules.as_ref().is_some_and(|r| !r.is_empty())
            || self.ip_rules.as_ref().is_some_and(|r| !r.is_empty())
            || self.trust_policy.is_some()
            || self.quarantine_policy.is_some()
            || self.retention_policy.is_some()
            || self.retention_days.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.is_premium() && self.uses_premium_features() {
            return Err("The configured options are only available in the Premium SKU.".to_string());
        }
        Ok(())
    }

    fn network_rule_set(&self) -> Value {
        let mut rules = Map::new();
        if let Some(ref action) = self.default_action {
            rules.insert("defaultAction".into(), json!(capitalize(action)));
        }
        if let Some(ref vnet_rules) = self.virtual_network_rules {
            rules.insert(
                "virtualNetworkRules".into(),
                json!(vnet_rules.iter().map(|r| rule_to_wire(r, VNET_RULE_KEY, "id")).collect::<Vec<_>>()),
            );
        }
        if let Some(ref ip_rules) = self.ip_rules {
            rules.insert(
                "ipRules".into(),
                json!(ip_rules.iter().map(|r| rule_to_wire(r, IP_RULE_KEY, "value")).collect::<Vec<_>>()),
            );
        }
        Value::Object(rules)
    }

    fn policies(&self) -> Value {
        let mut policies = Map::new();
        if let Some(ref quarantine) = self.quarantine_policy {
            policies.insert("quarantinePolicy".into(), json!({"status": quarantine.status()}));
        }
        if let Some(ref trust) = self.trust_policy {
            policies.insert("trustPolicy".into(), json!({"type": "Notary", "status": trust.status()}));
        }
        if self.retention_policy.is_some() || self.retention_days.is_some() {
            let mut retention = Map::new();
            if let Some(days) = self.retention_days {
                retention.insert("days".into(), json!(days));
            }
            if let Some(ref status) = self.retention_policy {
                retention.insert("status".into(), json!(status.status()));
            }
            policies.insert("retentionPolicy".into(), Value::Object(retention));
        }
        Value::Object(policies)
    }
}

/// Key naming a virtual network rule.
pub const VNET_RULE_KEY: &str = "virtual_network_resource_id";
/// Key naming an IP rule.
pub const IP_RULE_KEY: &str = "ip_address_or_range";

fn rule_to_wire(rule: &Value, key: &str, wire_key: &str) -> Value {
    json!({
        wire_key: rule.get(key).cloned().unwrap_or(Value::Null),
        "action": rule.get("action").cloned().unwrap_or_else(|| json!("Allow")),
    })
}

/// Translate rules from a normalized registry back to parameter form.
pub fn rules_from_registry(registry: &Value, list: &str, wire_key: &str, key: &str) -> Value {
    let rules = registry
        .pointer(&format!("/network_rule_set/{}", list))
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|r| {
                    json!({
                        key: r.get(wire_key).cloned().unwrap_or(Value::Null),
                        "action": r.get("action").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Value::Array(rules)
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("registries/{}", name))
}

fn action_path(ctx: &ExecContext, resource_group: &str, name: &str, action: &str) -> String {
    format!("{}/{}", path(ctx, resource_group, name), action)
}

pub async fn check_name_availability(ctx: &ExecContext, name: &str) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &ctx.subscription_provider_path(SERVICE, "checkNameAvailability"),
        Some(json!({"name": name, "type": "Microsoft.ContainerRegistry/registries"})),
    )
    .await
}

pub async fn create_or_update(ctx: &ExecContext, params: &RegistryParams) -> AzureResult<Value> {
    params.validate().map_err(AzureError::InvalidParameter)?;
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;

    let mut properties = Map::new();
    if let Some(admin) = params.admin_user_enabled {
        properties.insert("adminUserEnabled".into(), json!(admin));
    }
    if params.is_premium() {
        properties.insert("networkRuleSet".into(), params.network_rule_set());
        properties.insert("policies".into(), params.policies());
    }
    let mut body = json!({
        "location": location,
        "sku": {"name": capitalize(&params.sku)},
        "properties": properties,
    });
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

/// Registries in a resource group, or the whole subscription.
pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "registries"),
        None => ctx.subscription_provider_path(SERVICE, "registries"),
    };
    ctx.list_by_name(SERVICE, &path).await
}

pub async fn list_credentials(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.post(SERVICE, &action_path(ctx, resource_group, name, "listCredentials"), None)
        .await
}

pub async fn list_usages(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    let usages = ctx
        .list(SERVICE, &action_path(ctx, resource_group, name, "listUsages"))
        .await?;
    Ok(Value::Array(usages))
}

/// `credential` is `password` or `password2`.
pub async fn regenerate_credential(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    credential: &str,
) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &action_path(ctx, resource_group, name, "regenerateCredential"),
        Some(json!({ "name": credential })),
    )
    .await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportImageParams {
    pub name: String,
    pub resource_group: String,
    /// `repo:tag` or `repo@digest`
    pub source_image: String,
    #[serde(default)]
    pub source_resource_id: Option<String>,
    #[serde(default)]
    pub source_registry_uri: Option<String>,
    #[serde(default)]
    pub source_username: Option<String>,
    #[serde(default)]
    pub source_password: Option<String>,
    #[serde(default)]
    pub target_tags: Option<Vec<String>>,
    #[serde(default)]
    pub untagged_target_repositories: Option<Vec<String>>,
    /// `NoForce` or `Force`
    #[serde(default)]
    pub mode: Option<String>,
}

impl ImportImageParams {
    /// Target tags, defaulting to the source image without its digest.
    fn target_tags(&self) -> Vec<String> {
        match self.target_tags {
            Some(ref tags) if !tags.is_empty() => tags.clone(),
            _ => {
                let image = match self.source_image.find('@') {
                    Some(index) if index > 0 => &self.source_image[..index],
                    _ => self.source_image.as_str(),
                };
                vec![image.to_string()]
            }
        }
    }
}

/// Copy an image into the registry from another registry.
pub async fn import_image(ctx: &ExecContext, params: &ImportImageParams) -> AzureResult<Value> {
    let mut source = json!({ "sourceImage": params.source_image });
    if let Some(ref id) = params.source_resource_id {
        source["resourceId"] = json!(id);
    }
    if let Some(ref uri) = params.source_registry_uri {
        source["registryUri"] = json!(uri);
    }
    if let Some(ref password) = params.source_password {
        source["credentials"] = json!({"username": params.source_username, "password": password});
    }
    let mut body = json!({
        "source": source,
        "targetTags": params.target_tags(),
    });
    if let Some(ref repos) = params.untagged_target_repositories {
        body["untaggedTargetRepositories"] = json!(repos);
    }
    if let Some(ref mode) = params.mode {
        body["mode"] = json!(mode);
    }
    ctx.post(
        SERVICE,
        &action_path(ctx, &params.resource_group, &params.name, "importImage"),
        Some(body),
    )
    .await?;
    Ok(json!(true))
}

pub struct RegistryExec;

#[async_trait]
impl ExecModule for RegistryExec {
    fn name(&self) -> &'static str {
        "azurerm.containerregistry.registry"
    }

    fn description(&self) -> &'static str {
        "Manage container registries"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "check_name_availability",
            "create_or_update",
            "delete",
            "get",
            "list",
            "list_credentials",
            "list_usages",
            "regenerate_credential",
            "import_image",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "check_name_availability" => check_name_availability(ctx, &name()?).await,
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "list_credentials" => list_credentials(ctx, &name()?, &resource_group()?).await,
            "list_usages" => list_usages(ctx, &name()?, &resource_group()?).await,
            "regenerate_credential" => {
                let credential = params
                    .get_string("credential")?
                    .unwrap_or_else(|| "password".to_string());
                regenerate_credential(ctx, &name()?, &resource_group()?, &credential).await
            }
            "import_image" => import_image(ctx, &parse_params(params)?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
