//! Application Insights components.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::ApplicationInsights;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentParams {
    pub name: String,
    pub resource_group: String,
    /// Application the component monitors, e.g. `web`, `ios`, `other`.
    pub kind: String,
    /// `web` or `other`
    pub application_type: String,
    /// Days of data retention.
    #[serde(default)]
    pub retention: Option<i64>,
    #[serde(default)]
    pub immediate_purge_data: Option<bool>,
    #[serde(default)]
    pub disable_ip_masking: Option<bool>,
    /// `Enabled` or `Disabled`
    #[serde(default)]
    pub ingestion_public_network_access: Option<String>,
    #[serde(default)]
    pub query_public_network_access: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl ComponentParams {
    /// Component properties are PascalCase on the wire.
    fn properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("Application_Type".into(), json!(self.application_type));
        if let Some(days) = self.retention {
            properties.insert("RetentionInDays".into(), json!(days));
        }
        if let Some(purge) = self.immediate_purge_data {
            properties.insert("ImmediatePurgeDataOn30Days".into(), json!(purge));
        }
        if let Some(masking) = self.disable_ip_masking {
            properties.insert("DisableIpMasking".into(), json!(masking));
        }
        if let Some(ref access) = self.ingestion_public_network_access {
            properties.insert("publicNetworkAccessForIngestion".into(), json!(access));
        }
        if let Some(ref access) = self.query_public_network_access {
            properties.insert("publicNetworkAccessForQuery".into(), json!(access));
        }
        properties
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("components/{}", name))
}

pub async fn create_or_update(ctx: &ExecContext, params: &ComponentParams) -> AzureResult<Value> {
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let mut body = json!({
        "location": location,
        "kind": params.kind,
        "properties": params.properties(),
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

pub struct ComponentExec;

#[async_trait]
impl ExecModule for ComponentExec {
    fn name(&self) -> &'static str {
        "azurerm.application_insights.component"
    }

    fn description(&self) -> &'static str {
        "Manage Application Insights components"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["create_or_update", "delete", "get"]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
