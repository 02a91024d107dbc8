//! Web and function apps (sites).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{ArmRequest, AzureError, AzureResult, Method, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Web;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebAppParams {
    pub name: String,
    pub resource_group: String,
    /// `app`, `functionapp` or `functionapp,linux`
    #[serde(default)]
    pub kind: Option<String>,
    /// Resource id of the App Service plan.
    #[serde(default)]
    pub server_farm_id: Option<String>,
    /// Site configuration in snake_case, e.g. `{"app_settings": [{"name": .., "value": ..}]}`.
    #[serde(default)]
    pub site_config: Option<Map<String, Value>>,
    #[serde(default)]
    pub https_only: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("sites/{}", name))
}

fn config_path(ctx: &ExecContext, resource_group: &str, name: &str, rest: &str) -> String {
    format!("{}/config/{}", path(ctx, resource_group, name), rest)
}

/// Send a settings request and return the bare name/value map.
///
/// Setting names are user data, so the body skips normalization.
async fn settings_request(ctx: &ExecContext, method: Method, path: &str, body: Option<Value>) -> AzureResult<Value> {
    let mut request = ArmRequest::management(method, path, SERVICE.api_version());
    if let Some(body) = body {
        request = request.with_json(body);
    }
    let response = ctx.call_lro(SERVICE, request).await?;
    Ok(response
        .get("properties")
        .filter(|p| p.is_object())
        .cloned()
        .unwrap_or_else(|| json!({})))
}

/// Create or replace a site.
pub async fn create_or_update(ctx: &ExecContext, params: &WebAppParams) -> AzureResult<Value> {
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let mut properties = Map::new();
    if let Some(ref farm) = params.server_farm_id {
        properties.insert("serverFarmId".into(), json!(farm));
    }
    if let Some(ref config) = params.site_config {
        properties.insert("siteConfig".into(), normalize::to_camel_keys(&Value::Object(config.clone())));
    }
    if let Some(https_only) = params.https_only {
        properties.insert("httpsOnly".into(), json!(https_only));
    }
    let mut body = json!({"location": location, "properties": properties});
    if let Some(ref kind) = params.kind {
        body["kind"] = json!(kind);
    }
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

/// Delete a site, optionally with its metrics and its plan once empty.
pub async fn delete(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    delete_metrics: Option<bool>,
    delete_empty_server_farm: Option<bool>,
) -> AzureResult<()> {
    let mut request = ArmRequest::management(Method::Delete, path(ctx, resource_group, name), SERVICE.api_version());
    if let Some(metrics) = delete_metrics {
        request = request.with_query("deleteMetrics", metrics.to_string());
    }
    if let Some(farm) = delete_empty_server_farm {
        request = request.with_query("deleteEmptyServerFarm", farm.to_string());
    }
    ctx.call_lro(SERVICE, request).await.map(|_| ())
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

/// The site's web configuration.
pub async fn get_configuration(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &config_path(ctx, resource_group, name, "web"))
        .await
}

/// Sites in a resource group, or in the subscription, keyed by name.
pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "sites"),
        None => ctx.subscription_provider_path(SERVICE, "sites"),
    };
    ctx.list_by_name(SERVICE, &path).await
}

/// Application settings as a `name -> value` map.
pub async fn list_application_settings(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    settings_request(
        ctx,
        Method::Post,
        &config_path(ctx, resource_group, name, "appsettings/list"),
        None,
    )
    .await
}

/// Replace the application settings of a site.
pub async fn update_application_settings(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    settings: &BTreeMap<String, String>,
) -> AzureResult<Value> {
    settings_request(
        ctx,
        Method::Put,
        &config_path(ctx, resource_group, name, "appsettings"),
        Some(json!({ "properties": settings })),
    )
    .await
}

/// Deployment credentials of a site.
pub async fn list_publishing_credentials(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &config_path(ctx, resource_group, name, "publishingcredentials/list"),
        None,
    )
    .await
}

pub struct WebAppExec;

#[async_trait]
impl ExecModule for WebAppExec {
    fn name(&self) -> &'static str {
        "azurerm.web.app"
    }

    fn description(&self) -> &'static str {
        "Manage web and function apps"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "create_or_update",
            "delete",
            "get",
            "get_configuration",
            "list",
            "list_application_settings",
            "list_publishing_credentials",
            "update_application_settings",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    params.get_bool("delete_metrics")?,
                    params.get_bool("delete_empty_server_farm")?,
                )
                .await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "get_configuration" => get_configuration(ctx, &name()?, &resource_group()?).await,
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "list_application_settings" => list_application_settings(ctx, &name()?, &resource_group()?).await,
            "list_publishing_credentials" => list_publishing_credentials(ctx, &name()?, &resource_group()?).await,
            "update_application_settings" => {
                let settings: BTreeMap<String, String> = params
                    .get("app_settings")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| AzureError::InvalidParameter(format!("app_settings: {}", e)))?
                    .ok_or_else(|| AzureError::MissingParameter("app_settings".into()))?;
                update_application_settings(ctx, &name()?, &resource_group()?, &settings).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ArmResponse, Body};
    use crate::exec::testing::{context, params};

    #[tokio::test]
    async fn test_create_converts_site_config() {
        let (fake, ctx) = context();
        let site = WebAppExec
            .call(
                "create_or_update",
                &params(json!({
                    "name": "app1",
                    "resource_group": "rg1",
                    "location": "eastus",
                    "kind": "functionapp",
                    "server_farm_id": "/subscriptions/x/resourceGroups/rg1/providers/Microsoft.Web/serverfarms/plan1",
                    "site_config": {"app_settings": [{"name": "FUNCTIONS_WORKER_RUNTIME", "value": "python"}]}
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(site["kind"], "functionapp");
        assert_eq!(site["site_config"]["app_settings"][0]["name"], "FUNCTIONS_WORKER_RUNTIME");

        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body["properties"]["siteConfig"]["appSettings"][0]["value"], "python");
                assert!(body["properties"]["serverFarmId"].as_str().unwrap().ends_with("plan1"));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_application_settings_keep_their_names() {
        let (fake, ctx) = context();
        let list = config_path(&ctx, "rg1", "app1", "appsettings/list");
        fake.respond(
            Method::Post,
            &list,
            ArmResponse::new(
                200,
                json!({"name": "appsettings", "properties": {"FUNCTIONS_WORKER_RUNTIME": "node", "WEBSITE_RUN_FROM_PACKAGE": "1"}}),
            ),
        );
        let settings = WebAppExec
            .call(
                "list_application_settings",
                &params(json!({"name": "app1", "resource_group": "rg1"})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            settings,
            json!({"FUNCTIONS_WORKER_RUNTIME": "node", "WEBSITE_RUN_FROM_PACKAGE": "1"})
        );
    }

    #[tokio::test]
    async fn test_update_application_settings() {
        let (fake, ctx) = context();
        let updated = WebAppExec
            .call(
                "update_application_settings",
                &params(json!({"name": "app1", "resource_group": "rg1", "app_settings": {"MY_SETTING": "on"}})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated["MY_SETTING"], "on");
        let puts = fake.sent(Method::Put);
        assert!(puts[0].target().ends_with("/sites/app1/config/appsettings"));
    }

    #[tokio::test]
    async fn test_delete_passes_flags() {
        let (fake, ctx) = context();
        fake.insert(&path(&ctx, "rg1", "app1"), json!({"kind": "app"}));
        let p = params(json!({"name": "app1", "resource_group": "rg1", "delete_empty_server_farm": true}));
        assert_eq!(WebAppExec.call("delete", &p, &ctx).await.unwrap(), json!(true));
        let deletes = fake.sent(Method::Delete);
        assert!(deletes[0]
            .query
            .contains(&("deleteEmptyServerFarm".to_string(), "true".to_string())));
        assert!(fake.get(&path(&ctx, "rg1", "app1")).is_none());
    }
}
