//! Geo-replications of a Premium container registry.
//!
//! A replication is named after its location.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::ContainerRegistry;

fn path(ctx: &ExecContext, resource_group: &str, registry_name: &str, location: &str) -> String {
    ctx.provider_path(
        resource_group,
        SERVICE,
        &format!("registries/{}/replications/{}", registry_name, location),
    )
}

pub async fn create_or_update(
    ctx: &ExecContext,
    location: &str,
    registry_name: &str,
    resource_group: &str,
    tags: Option<&BTreeMap<String, String>>,
) -> AzureResult<Value> {
    let mut body = json!({"location": location, "properties": {}});
    if let Some(tags) = tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, resource_group, registry_name, location), body)
        .await
}

pub async fn delete(ctx: &ExecContext, location: &str, registry_name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, registry_name, location))
        .await
}

pub async fn get(ctx: &ExecContext, location: &str, registry_name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, registry_name, location))
        .await
}

/// Replications of a registry, keyed by name.
pub async fn list(ctx: &ExecContext, registry_name: &str, resource_group: &str) -> AzureResult<Value> {
    let path = ctx.provider_path(
        resource_group,
        SERVICE,
        &format!("registries/{}/replications", registry_name),
    );
    ctx.list_by_name(SERVICE, &path).await
}

pub struct ReplicationExec;

#[async_trait]
impl ExecModule for ReplicationExec {
    fn name(&self) -> &'static str {
        "azurerm.containerregistry.replication"
    }

    fn description(&self) -> &'static str {
        "Manage container registry geo-replications"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["create_or_update", "delete", "get", "list"]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let location = || params.get_string_required("location");
        let registry_name = || params.get_string_required("registry_name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create_or_update" => {
                let tags: Option<BTreeMap<String, String>> = match params.get("tags") {
                    Some(tags) => Some(
                        serde_json::from_value(tags.clone())
                            .map_err(|e| AzureError::InvalidParameter(format!("tags: {}", e)))?,
                    ),
                    None => None,
                };
                create_or_update(ctx, &location()?, &registry_name()?, &resource_group()?, tags.as_ref()).await
            }
            "delete" => {
                delete(ctx, &location()?, &registry_name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &location()?, &registry_name()?, &resource_group()?).await,
            "list" => list(ctx, &registry_name()?, &resource_group()?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{context, params};

    #[tokio::test]
    async fn test_create_list_delete() {
        let (_fake, ctx) = context();
        let p = params(json!({"location": "westus", "registry_name": "acr1", "resource_group": "rg1"}));
        let created = ReplicationExec.call("create_or_update", &p, &ctx).await.unwrap();
        assert_eq!(created["name"], "westus");
        assert_eq!(created["provisioning_state"], "Succeeded");

        let listed = ReplicationExec.call("list", &p, &ctx).await.unwrap();
        assert!(listed.get("westus").is_some());

        assert_eq!(ReplicationExec.call("delete", &p, &ctx).await.unwrap(), json!(true));
        let listed = ReplicationExec.call("list", &p, &ctx).await.unwrap();
        assert_eq!(listed, json!({}));
    }
}
