//! Resource groups.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::Resource;

/// Parameters of `create_or_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupParams {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub managed_by: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn path(ctx: &ExecContext, name: &str) -> String {
    ctx.resource_group_path(name)
}

/// List all resource groups in the subscription, keyed by name.
pub async fn list(ctx: &ExecContext) -> AzureResult<Value> {
    let path = format!("{}/resourcegroups", ctx.subscription_path());
    ctx.list_by_name(SERVICE, &path).await
}

pub async fn check_existence(ctx: &ExecContext, name: &str) -> AzureResult<bool> {
    ctx.head(SERVICE, &path(ctx, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, name)).await
}

/// Location of a resource group; modules use it when no location is given.
pub async fn location_of(ctx: &ExecContext, name: &str) -> AzureResult<String> {
    let group = get(ctx, name).await.map_err(|err| {
        error!("Unable to determine location from resource group specified.");
        err
    })?;
    group
        .get("location")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            AzureError::InvalidParameter(
                "Unable to determine location from resource group specified.".to_string(),
            )
        })
}

/// Use `location` when given, else the resource group's.
pub async fn location_or_default(ctx: &ExecContext, location: Option<&str>, resource_group: &str) -> AzureResult<String> {
    match location {
        Some(location) => Ok(location.to_string()),
        None => location_of(ctx, resource_group).await,
    }
}

pub async fn create_or_update(ctx: &ExecContext, params: &ResourceGroupParams) -> AzureResult<Value> {
    let mut body = json!({
        "location": params.location,
        "tags": params.tags.clone().unwrap_or_default(),
    });
    if let Some(ref managed_by) = params.managed_by {
        body["managedBy"] = json!(managed_by);
    }
    ctx.put(SERVICE, &path(ctx, &params.name), body).await
}

/// Delete a resource group and everything in it.
pub async fn delete(ctx: &ExecContext, name: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, name)).await
}

pub struct ResourceGroupExec;

#[async_trait]
impl ExecModule for ResourceGroupExec {
    fn name(&self) -> &'static str {
        "azurerm.resource.group"
    }

    fn description(&self) -> &'static str {
        "Manage resource groups"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["list", "check_existence", "get", "create_or_update", "delete"]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        match function {
            "list" => list(ctx).await,
            "check_existence" => Ok(json!(check_existence(ctx, &params.get_string_required("name")?).await?)),
            "get" => get(ctx, &params.get_string_required("name")?).await,
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &params.get_string_required("name")?).await?;
                Ok(json!(true))
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
