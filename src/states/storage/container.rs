//! Blob container state.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::storage::container::{self, ContainerParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{deep_diff, value_change};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "blob container";

pub async fn present(ctx: &ExecContext, params: &ContainerParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(container::get(
        &ctx.quiet(),
        &params.name,
        &params.account,
        &params.resource_group,
    ))
    .await?;

    let action = match existing {
        Some(current) => {
            let wanted_access = params.public_access.as_ref().map(|a| json!(a));
            ret.change_if(
                "public_access",
                value_change(current.get("public_access"), wanted_access.as_ref()),
            );
            if let Some(ref metadata) = params.metadata {
                let old = current
                    .get("metadata")
                    .filter(|m| !m.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                ret.change_if("metadata", deep_diff(&old, &serde_json::to_value(metadata)?));
            }
            ret.change_if(
                "default_encryption_scope",
                value_change(
                    current.get("default_encryption_scope"),
                    params.default_encryption_scope.as_ref().map(|s| json!(s)).as_ref(),
                ),
            );
            ret.change_if(
                "deny_encryption_scope_override",
                value_change(
                    current.get("deny_encryption_scope_override"),
                    params.deny_encryption_scope_override.map(|d| json!(d)).as_ref(),
                ),
            );

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
        Action::Create => container::create(ctx, params).await,
        Action::Update => container::update(ctx, params).await,
    };
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
) -> AzureResult<StateReturn> {
    let existing = lookup(container::get(&ctx.quiet(), name, account, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || {
        container::delete(ctx, name, account, resource_group)
    })
    .await)
}

pub struct ContainerState;

#[async_trait]
impl StateModule for ContainerState {
    fn name(&self) -> &'static str {
        "azurerm.storage.container"
    }

    fn description(&self) -> &'static str {
        "Ensure blob containers are present or absent"
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
                    &params.get_string_required("account")?,
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

    fn container(extra: Value) -> ModuleParams {
        let mut base = json!({
            "name": "releases",
            "account": "acct1",
            "resource_group": "rg1",
            "public_access": "None",
            "metadata": {"team": "web"}
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        params(base)
    }

    #[tokio::test]
    async fn test_create_then_present() {
        let (fake, ctx) = context();
        let ret = ContainerState.apply("present", &container(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Blob container releases has been created.");
        assert_eq!(fake.sent(Method::Put).len(), 1);

        let ret = ContainerState.apply("present", &container(json!({})), &ctx).await.unwrap();
        assert_eq!(ret.comment, "Blob container releases is already present.");
        assert!(ret.changes.is_empty());
    }

    #[tokio::test]
    async fn test_update_patches() {
        let (fake, ctx) = context();
        ContainerState.apply("present", &container(json!({})), &ctx).await.unwrap();

        let ret = ContainerState
            .apply(
                "present",
                &container(json!({"public_access": "Blob", "metadata": {"team": "ops"}})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(ret.comment, "Blob container releases has been updated.");
        assert_eq!(ret.changes["public_access"], json!({"old": "None", "new": "Blob"}));
        assert_eq!(ret.changes["metadata"], json!({"team": {"old": "web", "new": "ops"}}));
        assert_eq!(fake.sent(Method::Patch).len(), 1);
    }

    #[tokio::test]
    async fn test_absent() {
        let (_fake, ctx) = context();
        let p = params(json!({"name": "releases", "account": "acct1", "resource_group": "rg1"}));
        let ret = ContainerState.apply("absent", &p, &ctx).await.unwrap();
        assert_eq!(ret.comment, "Blob container releases was not found.");

        ContainerState.apply("present", &container(json!({})), &ctx).await.unwrap();
        let ret = ContainerState.apply("absent", &p, &ctx).await.unwrap();
        assert_eq!(ret.comment, "Blob container releases has been deleted.");
    }
}
