//! Key Vault secret state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{AzureError, AzureResult};
use crate::exec::keyvault::secret::{self, parse_timestamp, SecretProperties};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams};
use crate::states::diff::deep_diff;
use crate::states::{lookup, Action, StateModule, StateReturn};

const LABEL: &str = "Secret";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecretPresentParams {
    pub name: String,
    pub value: String,
    pub vault_url: String,
    #[serde(flatten)]
    pub properties: SecretProperties,
    /// Version whose properties are updated; latest when omitted.
    #[serde(default)]
    pub version: Option<String>,
}

fn same_instant(old: Option<&str>, new: &str) -> bool {
    match (old, parse_timestamp("", new)) {
        (Some(old), Ok(new)) => parse_timestamp("", old).map(|old| old == new).unwrap_or(false),
        _ => false,
    }
}

/// Ensure a secret exists with the given value and properties.
///
/// A new secret version is only written when the value differs.
pub async fn present(ctx: &ExecContext, params: &SecretPresentParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let wanted = &params.properties;
    let existing = lookup(secret::get_secret(&ctx.quiet(), &params.name, &params.vault_url, None)).await?;

    let action = match existing {
        Some(current) => {
            if current.get("value").and_then(Value::as_str) != Some(params.value.as_str()) {
                ret.change(
                    "value",
                    json!({"old": "REDACTED_OLD_VALUE", "new": "REDACTED_NEW_VALUE"}),
                );
            }
            let props = current.get("properties").cloned().unwrap_or_else(|| json!({}));

            if let Some(ref tags) = wanted.tags {
                let old_tags = props
                    .get("tags")
                    .filter(|t| !t.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                ret.change_if("tags", deep_diff(&old_tags, &serde_json::to_value(tags)?));
            }

            if let Some(ref content_type) = wanted.content_type {
                let old = props.get("content_type").and_then(Value::as_str);
                if !old.unwrap_or_default().eq_ignore_ascii_case(content_type) {
                    ret.change("content_type", json!({"old": old, "new": content_type}));
                }
            }

            if let Some(enabled) = wanted.enabled {
                let old = props.get("enabled").and_then(Value::as_bool);
                if old != Some(enabled) {
                    ret.change("enabled", json!({"old": old, "new": enabled}));
                }
            }

            for (key, new) in [("expires_on", &wanted.expires_on), ("not_before", &wanted.not_before)] {
                if let Some(new) = new {
                    let old = props.get(key).and_then(Value::as_str);
                    if !same_instant(old, new) {
                        ret.change(key, json!({"old": old, "new": new}));
                    }
                }
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            ret.change("name", json!({"new": params.name}));
            ret.change("value", json!({"new": "REDACTED_VALUE"}));
            if let Some(ref tags) = wanted.tags {
                ret.change("tags", json!({"new": tags}));
            }
            if let Some(ref content_type) = wanted.content_type {
                ret.change("content_type", json!({"new": content_type}));
            }
            if let Some(enabled) = wanted.enabled {
                ret.change("enabled", json!({"new": enabled}));
            }
            if let Some(ref expires_on) = wanted.expires_on {
                ret.change("expires_on", json!({"new": expires_on}));
            }
            if let Some(ref not_before) = wanted.not_before {
                ret.change("not_before", json!({"new": not_before}));
            }
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }

    let value_changed = ret.changes.contains_key("value");
    let properties_changed = ret.changes.keys().any(|k| k != "name" && k != "value");
    let result = async {
        if value_changed {
            secret::set_secret(ctx, &params.name, &params.value, &params.vault_url, wanted).await?;
        }
        if properties_changed && !(value_changed && params.version.is_none()) {
            secret::update_secret_properties(
                ctx,
                &params.name,
                &params.vault_url,
                params.version.as_deref(),
                wanted,
            )
            .await?;
        }
        Ok::<_, AzureError>(())
    }
    .await;
    Ok(ret.finish(LABEL, action, result))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretAbsentParams {
    pub name: String,
    pub vault_url: String,
    /// Also purge the deleted secret (soft-delete vaults only).
    #[serde(default)]
    pub purge: bool,
}

/// Ensure a secret is deleted, and optionally purged.
pub async fn absent(ctx: &ExecContext, params: &SecretAbsentParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let quiet = ctx.quiet();
    let verb = if params.purge { "purge" } else { "delete" };

    let mut existing = lookup(secret::get_secret(&quiet, &params.name, &params.vault_url, None)).await?;
    let live = existing.is_some();
    if !live && params.purge {
        existing = lookup(secret::get_deleted_secret(&quiet, &params.name, &params.vault_url)).await?;
    }
    let existing = match existing {
        Some(existing) => existing,
        None => return Ok(ret.succeed(format!("Secret {} was not found.", params.name))),
    };

    ret.set_old_new(existing, json!({}));
    if ctx.test {
        let comment = format!("Secret {} would be {}d.", params.name, verb);
        return Ok(ret.pending(comment));
    }

    let result = async {
        if live {
            secret::delete_secret(ctx, &params.name, &params.vault_url).await?;
        }
        if params.purge {
            secret::purge_deleted_secret(ctx, &params.name, &params.vault_url).await?;
        }
        Ok::<_, AzureError>(())
    }
    .await;

    Ok(match result {
        Ok(()) => {
            let comment = format!("Secret {} has been {}d.", params.name, verb);
            ret.succeed(comment)
        }
        Err(err) => {
            let comment = format!("Failed to {} Secret {}! ({})", verb, params.name, err);
            ret.fail(comment)
        }
    })
}

pub struct SecretState;

#[async_trait]
impl StateModule for SecretState {
    fn name(&self) -> &'static str {
        "azurerm.keyvault.secret"
    }

    fn description(&self) -> &'static str {
        "Ensure Key Vault secrets are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["present", "absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "present" => present(ctx, &parse_params(params)?).await,
            "absent" => absent(ctx, &parse_params(params)?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
