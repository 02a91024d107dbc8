//! Azure Cache for Redis.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Redis;

/// Cache size: `Basic`/`Standard` use family `C` (capacity 0-6), `Premium`
/// uses family `P` (capacity 1-4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisSku {
    pub name: String,
    pub family: String,
    pub capacity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisParams {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub sku: Option<RedisSku>,
    /// Redis settings such as `maxmemory-policy`; keys are sent verbatim.
    #[serde(default)]
    pub redis_configuration: Option<Map<String, Value>>,
    #[serde(default)]
    pub enable_non_ssl_port: Option<bool>,
    #[serde(default)]
    pub tenant_settings: Option<Map<String, Value>>,
    /// Premium clusters only.
    #[serde(default)]
    pub shard_count: Option<i64>,
    /// `1.0`, `1.1` or `1.2`
    #[serde(default)]
    pub minimum_tls_version: Option<String>,
    /// Subnet to deploy into; set at creation only.
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub static_ip: Option<String>,
    #[serde(default)]
    pub zones: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl RedisParams {
    /// Properties shared by create and update.
    fn mutable_properties(&self) -> AzureResult<Map<String, Value>> {
        let mut properties = Map::new();
        if let Some(ref sku) = self.sku {
            properties.insert("sku".into(), serde_json::to_value(sku)?);
        }
        if let Some(ref config) = self.redis_configuration {
            properties.insert("redisConfiguration".into(), Value::Object(config.clone()));
        }
        if let Some(enable) = self.enable_non_ssl_port {
            properties.insert("enableNonSslPort".into(), json!(enable));
        }
        if let Some(ref tenant) = self.tenant_settings {
            properties.insert("tenantSettings".into(), Value::Object(tenant.clone()));
        }
        if let Some(shards) = self.shard_count {
            properties.insert("shardCount".into(), json!(shards));
        }
        if let Some(ref tls) = self.minimum_tls_version {
            properties.insert("minimumTlsVersion".into(), json!(tls));
        }
        Ok(properties)
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("redis/{}", name))
}

fn action_path(ctx: &ExecContext, resource_group: &str, name: &str, action: &str) -> String {
    format!("{}/{}", path(ctx, resource_group, name), action)
}

/// `true` when the name can be used for a new cache.
pub async fn check_name_availability(ctx: &ExecContext, name: &str) -> AzureResult<Value> {
    let path = ctx.subscription_provider_path(SERVICE, "CheckNameAvailability");
    ctx.post(
        SERVICE,
        &path,
        Some(json!({"name": name, "type": "Microsoft.Cache/redis"})),
    )
    .await?;
    Ok(json!(true))
}

/// Create or replace a cache. Replacing may recreate it with downtime.
pub async fn create(ctx: &ExecContext, params: &RedisParams) -> AzureResult<Value> {
    if params.sku.is_none() {
        return Err(AzureError::MissingParameter("sku".into()));
    }
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;
    let mut properties = params.mutable_properties()?;
    if let Some(ref subnet) = params.subnet_id {
        properties.insert("subnetId".into(), json!(subnet));
    }
    if let Some(ref ip) = params.static_ip {
        properties.insert("staticIP".into(), json!(ip));
    }
    let mut body = json!({"location": location, "properties": properties});
    if let Some(ref zones) = params.zones {
        body["zones"] = json!(zones);
    }
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

/// Update an existing cache in place.
pub async fn update(ctx: &ExecContext, params: &RedisParams) -> AzureResult<Value> {
    let mut body = json!({"properties": params.mutable_properties()?});
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.patch(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

/// Export data to blobs under `container` (a SAS URL) with a name prefix.
pub async fn export_data(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    prefix: &str,
    container: &str,
    file_format: Option<&str>,
) -> AzureResult<Value> {
    let mut body = json!({"prefix": prefix, "container": container});
    if let Some(format) = file_format {
        body["format"] = json!(format);
    }
    ctx.post(SERVICE, &action_path(ctx, resource_group, name, "export"), Some(body))
        .await
}

/// Import data from blob SAS URLs.
pub async fn import_data(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    files: &[String],
    file_format: Option<&str>,
) -> AzureResult<Value> {
    let mut body = json!({ "files": files });
    if let Some(format) = file_format {
        body["format"] = json!(format);
    }
    ctx.post(SERVICE, &action_path(ctx, resource_group, name, "import"), Some(body))
        .await
}

/// `reboot_type` is `PrimaryNode`, `SecondaryNode` or `AllNodes`.
pub async fn force_reboot(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    reboot_type: &str,
    shard_id: Option<i64>,
) -> AzureResult<Value> {
    let mut body = json!({ "rebootType": reboot_type });
    if let Some(shard) = shard_id {
        body["shardId"] = json!(shard);
    }
    ctx.post(SERVICE, &action_path(ctx, resource_group, name, "forceReboot"), Some(body))
        .await
}

/// Every cache in the subscription.
pub async fn list(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "redis"))
        .await
}

pub async fn list_by_resource_group(ctx: &ExecContext, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.provider_path(resource_group, SERVICE, "redis"))
        .await
}

pub async fn list_keys(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.post(SERVICE, &action_path(ctx, resource_group, name, "listKeys"), None)
        .await
}

/// Upgrade notifications from the last `history` days.
pub async fn list_upgrade_notifications(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    history: f64,
) -> AzureResult<Value> {
    let history = history.to_string();
    let items = ctx
        .list_with_query(
            SERVICE,
            &action_path(ctx, resource_group, name, "listUpgradeNotifications"),
            &[("history", history.as_str())],
        )
        .await?;
    Ok(Value::Array(items))
}

/// `key_type` is `Primary` or `Secondary`.
pub async fn regenerate_key(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    key_type: &str,
) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &action_path(ctx, resource_group, name, "regenerateKey"),
        Some(json!({ "keyType": normalize::capitalize(key_type) })),
    )
    .await
}

pub struct RedisExec;

#[async_trait]
impl ExecModule for RedisExec {
    fn name(&self) -> &'static str {
        "azurerm.redis.operations"
    }

    fn description(&self) -> &'static str {
        "Manage Azure Cache for Redis instances"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "check_name_availability",
            "create",
            "delete",
            "export_data",
            "force_reboot",
            "get",
            "import_data",
            "list",
            "list_by_resource_group",
            "list_keys",
            "list_upgrade_notifications",
            "regenerate_key",
            "update",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "check_name_availability" => check_name_availability(ctx, &name()?).await,
            "create" => create(ctx, &parse_params(params)?).await,
            "update" => update(ctx, &parse_params(params)?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "export_data" => {
                export_data(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    &params.get_string_required("prefix")?,
                    &params.get_string_required("container")?,
                    params.get_string("file_format")?.as_deref(),
                )
                .await
            }
            "import_data" => {
                let files = params
                    .get_vec_string("files")?
                    .ok_or_else(|| AzureError::MissingParameter("files".into()))?;
                import_data(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    &files,
                    params.get_string("file_format")?.as_deref(),
                )
                .await
            }
            "force_reboot" => {
                force_reboot(
                    ctx,
                    &name()?,
                    &resource_group()?,
                    &params.get_string_required("reboot_type")?,
                    params.get_i64("shard_id")?,
                )
                .await
            }
            "list" => list(ctx).await,
            "list_by_resource_group" => list_by_resource_group(ctx, &resource_group()?).await,
            "list_keys" => list_keys(ctx, &name()?, &resource_group()?).await,
            "list_upgrade_notifications" => {
                let history = params
                    .get("history")
                    .and_then(|h| match h {
                        Value::Number(n) => n.as_f64(),
                        Value::String(s) => s.parse().ok(),
                        _ => None,
                    })
                    .ok_or_else(|| AzureError::MissingParameter("history".into()))?;
                list_upgrade_notifications(ctx, &name()?, &resource_group()?, history).await
            }
            "regenerate_key" => {
                regenerate_key(ctx, &name()?, &resource_group()?, &params.get_string_required("key_type")?).await
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

    fn cache() -> ModuleParams {
        params(json!({
            "name": "cache1",
            "resource_group": "rg1",
            "location": "eastus",
            "sku": {"name": "Premium", "family": "P", "capacity": 1},
            "redis_configuration": {"maxmemory-policy": "allkeys-lru"},
            "shard_count": 2
        }))
    }

    #[tokio::test]
    async fn test_create_body() {
        let (fake, ctx) = context();
        let created = RedisExec.call("create", &cache(), &ctx).await.unwrap();
        assert_eq!(created["sku"]["family"], "P");
        assert_eq!(created["redis_configuration"]["maxmemory-policy"], "allkeys-lru");
        assert_eq!(created["shard_count"], 2);

        match &fake.sent(Method::Put)[0].body {
            Some(Body::Json(body)) => {
                assert_eq!(body["location"], "eastus");
                assert_eq!(body["properties"]["shardCount"], 2);
                assert_eq!(body["properties"]["redisConfiguration"]["maxmemory-policy"], "allkeys-lru");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_requires_sku() {
        let (fake, ctx) = context();
        let p = params(json!({"name": "cache1", "resource_group": "rg1", "location": "eastus"}));
        let err = RedisExec.call("create", &p, &ctx).await.unwrap_err();
        assert!(matches!(err, AzureError::MissingParameter(ref k) if k == "sku"));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_patches_properties() {
        let (fake, ctx) = context();
        RedisExec.call("create", &cache(), &ctx).await.unwrap();
        let updated = RedisExec
            .call(
                "update",
                &params(json!({"name": "cache1", "resource_group": "rg1", "enable_non_ssl_port": true})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated["enable_non_ssl_port"], true);
        assert_eq!(updated["shard_count"], 2);
        assert_eq!(fake.sent(Method::Patch).len(), 1);
    }

    #[tokio::test]
    async fn test_force_reboot_body() {
        let (fake, ctx) = context();
        RedisExec
            .call(
                "force_reboot",
                &params(json!({"name": "cache1", "resource_group": "rg1", "reboot_type": "AllNodes", "shard_id": 1})),
                &ctx,
            )
            .await
            .unwrap();
        let post = &fake.sent(Method::Post)[0];
        assert!(post.target().ends_with("/redis/cache1/forceReboot"));
        assert_eq!(post.body, Some(Body::Json(json!({"rebootType": "AllNodes", "shardId": 1}))));
    }

    #[tokio::test]
    async fn test_upgrade_notifications_history_query() {
        let (fake, ctx) = context();
        let out = RedisExec
            .call(
                "list_upgrade_notifications",
                &params(json!({"name": "cache1", "resource_group": "rg1", "history": 7})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.as_array().is_some());
        let get = &fake.sent(Method::Get)[0];
        assert!(get.query.contains(&("history".to_string(), "7".to_string())));
    }
}
