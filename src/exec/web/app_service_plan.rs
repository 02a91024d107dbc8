//! App Service plans (server farms).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Web;

/// Pricing tier, by name (`F1`, `Y1`, `P1v2`) or as a full SKU description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanSku {
    Name(String),
    Full(BTreeMap<String, Value>),
}

impl Default for PlanSku {
    fn default() -> Self {
        PlanSku::Name("F1".to_string())
    }
}

impl PlanSku {
    fn to_wire(&self) -> Value {
        match self {
            PlanSku::Name(name) => json!({ "name": name }),
            PlanSku::Full(map) => normalize::to_camel_keys(&json!(map)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppServicePlanParams {
    pub name: String,
    pub resource_group: String,
    /// `linux`, `windows` or `functionapp`
    pub kind: String,
    #[serde(default)]
    pub sku: PlanSku,
    /// Set for Linux plans.
    #[serde(default)]
    pub reserved: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("serverfarms/{}", name))
}

/// Resource id a plan has (or will have once created).
pub fn id(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    path(ctx, resource_group, name)
}

pub async fn create_or_update(ctx: &ExecContext, params: &AppServicePlanParams) -> AzureResult<Value> {
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let mut body = json!({
        "location": location,
        "kind": params.kind,
        "sku": params.sku.to_wire(),
        "properties": {},
    });
    if let Some(reserved) = params.reserved {
        body["properties"]["reserved"] = json!(reserved);
    }
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

/// SKUs the plan can be scaled to.
pub async fn get_server_farm_skus(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &format!("{}/skus", path(ctx, resource_group, name)))
        .await
}

/// Plans in a resource group, or in the subscription. `detailed` asks for
/// every property rather than the summary.
pub async fn list(ctx: &ExecContext, resource_group: Option<&str>, detailed: bool) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "serverfarms"),
        None => ctx.subscription_provider_path(SERVICE, "serverfarms"),
    };
    let query: &[(&str, &str)] = if detailed && resource_group.is_none() {
        &[("detailed", "true")]
    } else {
        &[]
    };
    let items = ctx.list_with_query(SERVICE, &path, query).await?;
    Ok(normalize::keyed_by_name(items))
}

/// Apps hosted on a plan, keyed by name.
pub async fn list_web_apps(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    skip_token: Option<&str>,
) -> AzureResult<Value> {
    let path = format!("{}/sites", path(ctx, resource_group, name));
    let query: Vec<(&str, &str)> = skip_token.map(|t| ("$skipToken", t)).into_iter().collect();
    let items = ctx.list_with_query(SERVICE, &path, &query).await?;
    Ok(normalize::keyed_by_name(items))
}

pub struct AppServicePlanExec;

#[async_trait]
impl ExecModule for AppServicePlanExec {
    fn name(&self) -> &'static str {
        "azurerm.web.app_service_plan"
    }

    fn description(&self) -> &'static str {
        "Manage App Service plans"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "create_or_update",
            "delete",
            "get",
            "get_server_farm_skus",
            "list",
            "list_web_apps",
        ]
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
            "get_server_farm_skus" => get_server_farm_skus(ctx, &name()?, &resource_group()?).await,
            "list" => {
                list(
                    ctx,
                    params.get_string("resource_group")?.as_deref(),
                    params.get_bool_or("detailed", false),
                )
                .await
            }
            "list_web_apps" => {
                list_web_apps(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    params.get_string("skip_token")?.as_deref(),
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
    use crate::client::{ArmResponse, Body, Method};
    use crate::exec::testing::{context, params};

    #[tokio::test]
    async fn test_create_sends_sku_and_reserved() {
        let (fake, ctx) = context();
        let plan = AppServicePlanExec
            .call(
                "create_or_update",
                &params(json!({
                    "name": "plan1",
                    "resource_group": "rg1",
                    "location": "eastus",
                    "kind": "functionapp",
                    "sku": "Y1",
                    "reserved": true
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(plan["reserved"], true);
        assert_eq!(plan["kind"], "functionapp");

        let puts = fake.sent(Method::Put);
        match &puts[0].body {
            Some(Body::Json(body)) => assert_eq!(body["sku"], json!({"name": "Y1"})),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_sku_and_group_location() {
        let (fake, ctx) = context();
        fake.insert(&ctx.resource_group_path("rg1"), json!({"location": "westus"}));
        let plan = create_or_update(
            &ctx,
            &parse_params(&params(json!({"name": "plan1", "resource_group": "rg1", "kind": "windows"}))).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(plan["location"], "westus");
        assert_eq!(plan["sku"], json!({"name": "F1"}));
    }

    #[tokio::test]
    async fn test_list_web_apps_passes_skip_token() {
        let (fake, ctx) = context();
        let sites = format!("{}/sites", path(&ctx, "rg1", "plan1"));
        fake.respond(
            Method::Get,
            &sites,
            ArmResponse::new(200, json!({"value": [{"name": "app1", "properties": {"state": "Running"}}]})),
        );
        let apps = list_web_apps(&ctx, "plan1", "rg1", Some("abc")).await.unwrap();
        assert_eq!(apps["app1"]["state"], "Running");
        let gets = fake.sent(Method::Get);
        assert!(gets[0].query.contains(&("$skipToken".to_string(), "abc".to_string())));
    }
}
