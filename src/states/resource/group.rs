//! Resource group state.

use async_trait::async_trait;
use serde_json::json;

use crate::client::AzureResult;
use crate::exec::resource::group::{self, ResourceGroupParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::deep_diff;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "resource group";

/// Ensure a resource group exists with the given tags.
pub async fn present(ctx: &ExecContext, params: &ResourceGroupParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(group::get(&ctx.quiet(), &params.name)).await?;

    let action = match existing {
        Some(group) => {
            let old_tags = group.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

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
    let result = group::create_or_update(ctx, params).await;
    Ok(ret.finish(LABEL, action, result))
}

/// Ensure a resource group does not exist.
pub async fn absent(ctx: &ExecContext, name: &str) -> AzureResult<StateReturn> {
    let existing = lookup(group::get(&ctx.quiet(), name)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || group::delete(ctx, name)).await)
}

pub struct ResourceGroupState;

#[async_trait]
impl StateModule for ResourceGroupState {
    fn name(&self) -> &'static str {
        "azurerm.resource.group"
    }

    fn description(&self) -> &'static str {
        "Ensure resource groups are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["present", "absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "present" => present(ctx, &parse_params(params)?).await,
            "absent" => absent(ctx, &params.get_string_required("name")?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::context;
    use std::collections::BTreeMap;

    fn params(tags: &[(&str, &str)]) -> ResourceGroupParams {
        ResourceGroupParams {
            name: "rg1".into(),
            location: "eastus".into(),
            managed_by: None,
            tags: Some(
                tags.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }

    #[tokio::test]
    async fn test_create_then_idempotent() {
        let (_fake, ctx) = context();
        let ret = present(&ctx, &params(&[("env", "dev")])).await.unwrap();
        assert_eq!(ret.result, Some(true));
        assert_eq!(ret.comment, "Resource group rg1 has been created.");
        assert_eq!(ret.changes["new"]["location"], "eastus");

        let ret = present(&ctx, &params(&[("env", "dev")])).await.unwrap();
        assert_eq!(ret.result, Some(true));
        assert_eq!(ret.comment, "Resource group rg1 is already present.");
        assert!(ret.changes.is_empty());
    }

    #[tokio::test]
    async fn test_tag_change_in_test_mode() {
        let (fake, ctx) = context();
        present(&ctx, &params(&[("env", "dev")])).await.unwrap();

        let ret = present(&ctx.clone().with_test(true), &params(&[("env", "prod")]))
            .await
            .unwrap();
        assert_eq!(ret.result, None);
        assert_eq!(ret.comment, "Resource group rg1 would be updated.");
        assert_eq!(ret.changes["tags"]["env"], json!({"old": "dev", "new": "prod"}));

        let stored = fake
            .get(&ctx.resource_group_path("rg1"))
            .unwrap();
        assert_eq!(stored["tags"]["env"], "dev");
    }

    #[tokio::test]
    async fn test_absent() {
        let (_fake, ctx) = context();
        present(&ctx, &params(&[])).await.unwrap();
        let ret = absent(&ctx, "rg1").await.unwrap();
        assert_eq!(ret.comment, "Resource group rg1 has been deleted.");
        let ret = absent(&ctx, "rg1").await.unwrap();
        assert_eq!(ret.comment, "Resource group rg1 was not found.");
    }
}
