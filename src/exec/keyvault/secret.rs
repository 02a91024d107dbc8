//! Key Vault secrets (data plane).
//!
//! Requests go straight to the vault URL with a Key Vault token. Secret
//! bundles are reshaped to `{id, name, value, properties: {...}}` with
//! timestamps rendered as RFC 3339.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{ArmRequest, Audience, AzureError, AzureResult, Method, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::KeyVault;
const API_VERSION: &str = "7.4";

/// Settable secret attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretProperties {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub expires_on: Option<String>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl SecretProperties {
    fn is_empty(&self) -> bool {
        *self == SecretProperties::default()
    }
}

/// Parse an RFC 3339 timestamp parameter.
pub fn parse_timestamp(key: &str, value: &str) -> AzureResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AzureError::InvalidParameter(format!("{} must be an ISO-8601 timestamp ({})", key, e)))
}

fn request(method: Method, vault_url: &str, path: &str) -> ArmRequest {
    ArmRequest::url(
        method,
        format!("{}/{}", vault_url.trim_end_matches('/'), path.trim_start_matches('/')),
    )
    .with_query("api-version", API_VERSION)
    .with_audience(Audience::KeyVault)
}

fn properties_body(props: &SecretProperties) -> AzureResult<Map<String, Value>> {
    let mut attributes = Map::new();
    if let Some(enabled) = props.enabled {
        attributes.insert("enabled".into(), json!(enabled));
    }
    if let Some(ref exp) = props.expires_on {
        attributes.insert("exp".into(), json!(parse_timestamp("expires_on", exp)?.timestamp()));
    }
    if let Some(ref nbf) = props.not_before {
        attributes.insert("nbf".into(), json!(parse_timestamp("not_before", nbf)?.timestamp()));
    }

    let mut body = Map::new();
    if !attributes.is_empty() {
        body.insert("attributes".into(), Value::Object(attributes));
    }
    if let Some(ref content_type) = props.content_type {
        body.insert("contentType".into(), json!(content_type));
    }
    if let Some(ref tags) = props.tags {
        body.insert("tags".into(), serde_json::to_value(tags)?);
    }
    Ok(body)
}

fn rfc3339(seconds: Option<&Value>) -> Value {
    seconds
        .and_then(Value::as_i64)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .map(|dt| json!(dt.to_rfc3339()))
        .unwrap_or(Value::Null)
}

/// Split `https://{vault}/secrets/{name}[/{version}]` into its parts.
fn id_parts(id: &str) -> (Option<String>, Option<String>, Option<String>) {
    let url = match url::Url::parse(id) {
        Ok(url) => url,
        Err(_) => return (None, None, None),
    };
    let vault_url = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    (
        Some(vault_url),
        segments.get(1).map(|s| s.to_string()),
        segments.get(2).map(|s| s.to_string()),
    )
}

/// Reshape a secret bundle (or a secret item of a list).
pub fn secret_as_dict(bundle: &Value) -> Value {
    let id = bundle
        .get("id")
        .or_else(|| bundle.get("kid"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (vault_url, name, version) = id_parts(id);
    let attributes = bundle.get("attributes").cloned().unwrap_or_else(|| json!({}));

    let properties = json!({
        "content_type": bundle.get("contentType"),
        "created_on": rfc3339(attributes.get("created")),
        "enabled": attributes.get("enabled"),
        "expires_on": rfc3339(attributes.get("exp")),
        "id": id,
        "key_id": bundle.get("kid"),
        "name": name,
        "not_before": rfc3339(attributes.get("nbf")),
        "recovery_level": attributes.get("recoveryLevel"),
        "tags": bundle.get("tags"),
        "updated_on": rfc3339(attributes.get("updated")),
        "vault_url": vault_url,
        "version": version,
    });

    let mut out = json!({
        "id": id,
        "name": name,
        "properties": properties,
    });
    if let Some(value) = bundle.get("value") {
        out["value"] = value.clone();
    }
    for key in ["recoveryId", "deletedDate", "scheduledPurgeDate"] {
        if let Some(v) = bundle.get(key) {
            let snake = crate::normalize::to_snake(key);
            out[snake.as_str()] = if key == "recoveryId" { v.clone() } else { rfc3339(Some(v)) };
        }
    }
    out
}

async fn send(ctx: &ExecContext, request: ArmRequest) -> AzureResult<Value> {
    Ok(ctx.call(SERVICE, request).await?.body)
}

/// Set a secret value, creating a new version.
pub async fn set_secret(
    ctx: &ExecContext,
    name: &str,
    value: &str,
    vault_url: &str,
    props: &SecretProperties,
) -> AzureResult<Value> {
    let mut body = properties_body(props)?;
    body.insert("value".into(), json!(value));
    let bundle = send(
        ctx,
        request(Method::Put, vault_url, &format!("secrets/{}", name)).with_json(Value::Object(body)),
    )
    .await?;
    Ok(secret_as_dict(&bundle))
}

/// Get the latest version of a secret, or a specific one.
pub async fn get_secret(ctx: &ExecContext, name: &str, vault_url: &str, version: Option<&str>) -> AzureResult<Value> {
    let path = match version {
        Some(v) => format!("secrets/{}/{}", name, v),
        None => format!("secrets/{}", name),
    };
    Ok(secret_as_dict(&send(ctx, request(Method::Get, vault_url, &path)).await?))
}

async fn list(ctx: &ExecContext, vault_url: &str, path: &str) -> AzureResult<Value> {
    let items = ctx
        .collect_pages(SERVICE, request(Method::Get, vault_url, path))
        .await?;
    Ok(Value::Array(items.iter().map(secret_as_dict).collect()))
}

/// List secret properties (values are never returned by list operations).
pub async fn list_properties_of_secrets(ctx: &ExecContext, vault_url: &str) -> AzureResult<Value> {
    list(ctx, vault_url, "secrets").await
}

pub async fn list_properties_of_secret_versions(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<Value> {
    list(ctx, vault_url, &format!("secrets/{}/versions", name)).await
}

/// Delete a secret; in a soft-delete vault it can be recovered or purged later.
pub async fn delete_secret(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<Value> {
    let bundle = send(ctx, request(Method::Delete, vault_url, &format!("secrets/{}", name))).await?;
    Ok(secret_as_dict(&bundle))
}

pub async fn get_deleted_secret(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<Value> {
    let bundle = send(ctx, request(Method::Get, vault_url, &format!("deletedsecrets/{}", name))).await?;
    Ok(secret_as_dict(&bundle))
}

pub async fn list_deleted_secrets(ctx: &ExecContext, vault_url: &str) -> AzureResult<Value> {
    list(ctx, vault_url, "deletedsecrets").await
}

/// Permanently delete a deleted secret.
pub async fn purge_deleted_secret(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<()> {
    send(ctx, request(Method::Delete, vault_url, &format!("deletedsecrets/{}", name)))
        .await
        .map(|_| ())
}

pub async fn recover_deleted_secret(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<Value> {
    let bundle = send(
        ctx,
        request(Method::Post, vault_url, &format!("deletedsecrets/{}/recover", name)),
    )
    .await?;
    Ok(secret_as_dict(&bundle))
}

/// Back up a secret; the result is an opaque base64url blob.
pub async fn backup_secret(ctx: &ExecContext, name: &str, vault_url: &str) -> AzureResult<Value> {
    let body = send(ctx, request(Method::Post, vault_url, &format!("secrets/{}/backup", name))).await?;
    body.get("value")
        .cloned()
        .ok_or_else(|| AzureError::OperationFailed {
            status: "Succeeded".to_string(),
            message: "backup response carried no value".to_string(),
        })
}

pub async fn restore_secret_backup(ctx: &ExecContext, backup: &str, vault_url: &str) -> AzureResult<Value> {
    let bundle = send(
        ctx,
        request(Method::Post, vault_url, "secrets/restore").with_json(json!({"value": backup})),
    )
    .await?;
    Ok(secret_as_dict(&bundle))
}

/// Update everything but the value of a secret version (latest by default).
pub async fn update_secret_properties(
    ctx: &ExecContext,
    name: &str,
    vault_url: &str,
    version: Option<&str>,
    props: &SecretProperties,
) -> AzureResult<Value> {
    let path = format!("secrets/{}/{}", name, version.unwrap_or_default());
    let bundle = send(
        ctx,
        request(Method::Patch, vault_url, path.trim_end_matches('/'))
            .with_json(Value::Object(properties_body(props)?)),
    )
    .await?;
    Ok(secret_as_dict(&bundle))
}

pub struct SecretExec;

#[async_trait]
impl ExecModule for SecretExec {
    fn name(&self) -> &'static str {
        "azurerm.keyvault.secret"
    }

    fn description(&self) -> &'static str {
        "Manage Key Vault secrets"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "backup_secret",
            "delete_secret",
            "get_deleted_secret",
            "get_secret",
            "list_deleted_secrets",
            "list_properties_of_secret_versions",
            "list_properties_of_secrets",
            "purge_deleted_secret",
            "recover_deleted_secret",
            "restore_secret_backup",
            "set_secret",
            "update_secret_properties",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let vault_url = params.get_string_required("vault_url")?;
        let name = || params.get_string_required("name");
        match function {
            "backup_secret" => backup_secret(ctx, &name()?, &vault_url).await,
            "delete_secret" => delete_secret(ctx, &name()?, &vault_url).await,
            "get_deleted_secret" => get_deleted_secret(ctx, &name()?, &vault_url).await,
            "get_secret" => {
                get_secret(ctx, &name()?, &vault_url, params.get_string("version")?.as_deref()).await
            }
            "list_deleted_secrets" => list_deleted_secrets(ctx, &vault_url).await,
            "list_properties_of_secret_versions" => {
                list_properties_of_secret_versions(ctx, &name()?, &vault_url).await
            }
            "list_properties_of_secrets" => list_properties_of_secrets(ctx, &vault_url).await,
            "purge_deleted_secret" => {
                purge_deleted_secret(ctx, &name()?, &vault_url).await?;
                Ok(json!(true))
            }
            "recover_deleted_secret" => recover_deleted_secret(ctx, &name()?, &vault_url).await,
            "restore_secret_backup" => {
                restore_secret_backup(ctx, &params.get_string_required("backup")?, &vault_url).await
            }
            "set_secret" => {
                let props: SecretProperties = parse_params(params)?;
                set_secret(ctx, &name()?, &params.get_string_required("value")?, &vault_url, &props).await
            }
            "update_secret_properties" => {
                let props: SecretProperties = parse_params(params)?;
                if props.is_empty() {
                    return Err(AzureError::MissingParameter(
                        "content_type, enabled, expires_on, not_before or tags".to_string(),
                    ));
                }
                update_secret_properties(
                    ctx,
                    &name()?,
                    &vault_url,
                    params.get_string("version")?.as_deref(),
                    &props,
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
    use crate::client::{ArmResponse, Body};
    use crate::exec::testing::{context, params};

    const VAULT: &str = "https://kv1.vault.azure.net/";

    #[test]
    fn test_secret_as_dict() {
        let bundle = json!({
            "id": "https://kv1.vault.azure.net/secrets/db-password/4387e9f3d6e14c459867679a90fd0f79",
            "value": "hunter2",
            "attributes": {"enabled": true, "created": 1_600_000_000, "exp": 1_700_000_000, "recoveryLevel": "Recoverable"},
            "tags": {"env": "dev"}
        });
        let out = secret_as_dict(&bundle);
        assert_eq!(out["name"], "db-password");
        assert_eq!(out["value"], "hunter2");
        assert_eq!(out["properties"]["version"], "4387e9f3d6e14c459867679a90fd0f79");
        assert_eq!(out["properties"]["vault_url"], "https://kv1.vault.azure.net");
        assert_eq!(out["properties"]["expires_on"], "2023-11-14T22:13:20+00:00");
        assert_eq!(out["properties"]["recovery_level"], "Recoverable");
        assert_eq!(out["properties"]["tags"]["env"], "dev");
    }

    #[tokio::test]
    async fn test_set_secret_body_and_audience() {
        let (fake, ctx) = context();
        SecretExec
            .call(
                "set_secret",
                &params(json!({
                    "name": "s1",
                    "value": "v1",
                    "vault_url": VAULT,
                    "content_type": "text/plain",
                    "expires_on": "2030-01-01T00:00:00Z"
                })),
                &ctx,
            )
            .await
            .unwrap();

        let put = &fake.sent(Method::Put)[0];
        assert_eq!(put.target(), "https://kv1.vault.azure.net/secrets/s1");
        assert_eq!(put.audience, Audience::KeyVault);
        assert!(put.query.contains(&("api-version".to_string(), "7.4".to_string())));
        match &put.body {
            Some(Body::Json(body)) => {
                assert_eq!(body["value"], "v1");
                assert_eq!(body["contentType"], "text/plain");
                assert_eq!(body["attributes"]["exp"], 1_893_456_000);
            }
            other => panic!("unexpected body {:?}", other),
        }

        let secret = get_secret(&ctx, "s1", VAULT, None).await.unwrap();
        assert_eq!(secret["value"], "v1");
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let (_fake, ctx) = context();
        let err = get_secret(&ctx, "nope", VAULT, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_backup_returns_blob() {
        let (fake, ctx) = context();
        fake.respond(
            Method::Post,
            "https://kv1.vault.azure.net/secrets/s1/backup",
            ArmResponse::new(200, json!({"value": "YmFja3Vw"})),
        );
        assert_eq!(backup_secret(&ctx, "s1", VAULT).await.unwrap(), json!("YmFja3Vw"));
    }

    #[test]
    fn test_bad_timestamp() {
        let props = SecretProperties {
            expires_on: Some("next tuesday".into()),
            ..Default::default()
        };
        assert!(matches!(properties_body(&props), Err(AzureError::InvalidParameter(_))));
    }
}
