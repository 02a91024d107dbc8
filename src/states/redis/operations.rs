//! Redis cache state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::redis::operations::{self, RedisParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{deep_diff, subset_diff};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "Redis cache";

/// Ensure a Redis cache exists.
///
/// A missing cache is created; an existing one is updated in place, so
/// creation-only settings (subnet, static IP, zones) are not compared.
pub async fn present(ctx: &ExecContext, params: &RedisParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let sku = match params.sku {
        Some(ref sku) => serde_json::to_value(sku)?,
        None => return Ok(ret.fail("The sku parameter is required for a Redis cache.")),
    };
    let existing = lookup(operations::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;

    let action = match existing {
        Some(cache) => {
            let old_tags = cache.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let old_sku = cache.get("sku").cloned().unwrap_or_else(|| json!({}));
            ret.change_if("sku", deep_diff(&old_sku, &sku));

            if let Some(ref tenant) = params.tenant_settings {
                let old = cache.get("tenant_settings").cloned().unwrap_or(Value::Null);
                ret.change_if("tenant_settings", subset_diff(&old, &Value::Object(tenant.clone())));
            }
            if let Some(ref config) = params.redis_configuration {
                let old = cache.get("redis_configuration").cloned().unwrap_or(Value::Null);
                ret.change_if("redis_configuration", subset_diff(&old, &Value::Object(config.clone())));
            }

            let old_non_ssl = cache.get("enable_non_ssl_port").and_then(Value::as_bool);
            let new_non_ssl = params.enable_non_ssl_port.unwrap_or(false);
            if old_non_ssl.unwrap_or(false) != new_non_ssl {
                ret.change("enable_non_ssl_port", json!({"old": old_non_ssl, "new": new_non_ssl}));
            }

            if let Some(shards) = params.shard_count {
                let old = cache.get("shard_count").and_then(Value::as_i64);
                if old.unwrap_or(0) != shards {
                    ret.change("shard_count", json!({"old": old, "new": shards}));
                }
            }

            if let Some(ref tls) = params.minimum_tls_version {
                let old = cache.get("minimum_tls_version").and_then(Value::as_str);
                if old != Some(tls.as_str()) {
                    ret.change("minimum_tls_version", json!({"old": old, "new": tls}));
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
    let result = match action {
        Action::Create => operations::create(ctx, params).await,
        Action::Update => operations::update(ctx, params).await,
    };
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(operations::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || operations::delete(ctx, name, resource_group)).await)
}

pub struct RedisState;

#[async_trait]
impl StateModule for RedisState {
    fn name(&self) -> &'static str {
        "azurerm.redis.operations"
    }

    fn description(&self) -> &'static str {
        "Ensure Redis caches are present or absent"
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

    fn cache(extra: Value) -> ModuleParams {
        let mut base = json!({
            "name": "cache1",
            "resource_group": "rg1",
            "location": "eastus",
            "sku": {"name": "Standard", "family": "C", "capacity": 1},
            "redis_configuration": {"maxmemory-policy": "allkeys-lru"}
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        params(base)
    }

    #[tokio::test]
    async fn test_create_then_present() {
        let (fake, ctx) = context();
        let ret = RedisState.apply("present", &cache(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Redis cache cache1 has been created.");
        assert_eq!(fake.sent(Method::Put).len(), 1);

        // Settings the service adds to the configuration are not changes.
        let path = ctx.provider_path("rg1", crate::client::Service::Redis, "redis/cache1");
        fake.respond(
            Method::Get,
            &path,
            crate::client::ArmResponse::new(
                200,
                json!({
                    "name": "cache1",
                    "location": "eastus",
                    "properties": {
                        "sku": {"name": "Standard", "family": "C", "capacity": 1},
                        "redisConfiguration": {"maxmemory-policy": "allkeys-lru", "maxclients": "1000"},
                        "enableNonSslPort": false
                    }
                }),
            ),
        );
        let ret = RedisState.apply("present", &cache(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Redis cache cache1 is already present.");
    }

    #[tokio::test]
    async fn test_existing_cache_is_updated_not_recreated() {
        let (fake, ctx) = context();
        RedisState.apply("present", &cache(json!({})), &ctx).await.unwrap();
        let ret = RedisState
            .apply(
                "present",
                &cache(json!({"sku": {"name": "Standard", "family": "C", "capacity": 2}, "enable_non_ssl_port": true})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(ret.comment, "Redis cache cache1 has been updated.");
        assert_eq!(ret.changes["sku"], json!({"capacity": {"old": 1, "new": 2}}));
        assert_eq!(ret.changes["enable_non_ssl_port"], json!({"old": null, "new": true}));
        assert_eq!(fake.sent(Method::Put).len(), 1);
        assert_eq!(fake.sent(Method::Patch).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_sku_fails_without_requests() {
        let (fake, ctx) = context();
        let p = params(json!({"name": "cache1", "resource_group": "rg1"}));
        let ret = RedisState.apply("present", &p, &ctx).await.unwrap();
        assert_eq!(ret.result, Some(false));
        assert!(fake.requests().is_empty());
    }
}
