//! Role assignment states.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::authorization::role::{self, AssignmentParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams};
use crate::resource_id::last_segment;
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "role assignment";

/// Ensure `principal_id` holds `role_definition` at `scope`.
///
/// Assignments cannot be modified in place; a changed role or principal
/// replaces the assignment.
pub async fn assignment_present(ctx: &ExecContext, params: &AssignmentParams) -> AzureResult<StateReturn> {
    let role_id = role::resolve_role_definition_id(ctx, &params.scope, &params.role_definition).await?;
    let name = params
        .name
        .clone()
        .unwrap_or_else(|| role::assignment_name(&params.scope, &role_id, &params.principal_id));
    let request = AssignmentParams {
        name: Some(name.clone()),
        role_definition: role_id.clone(),
        ..params.clone()
    };

    let mut ret = StateReturn::new(&name);
    let existing = lookup(role::assignments_get(&ctx.quiet(), &name, &params.scope)).await?;

    let action = match existing {
        Some(current) => {
            let old_role = current
                .get("role_definition_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !last_segment(old_role).eq_ignore_ascii_case(last_segment(&role_id)) {
                ret.change("role_definition_id", json!({"old": old_role, "new": role_id}));
            }
            let old_principal = current
                .get("principal_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !old_principal.eq_ignore_ascii_case(&params.principal_id) {
                ret.change(
                    "principal_id",
                    json!({"old": old_principal, "new": params.principal_id}),
                );
            }
            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(&request));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }
    let result = async {
        if action == Action::Update {
            role::assignments_delete(ctx, &name, &params.scope).await?;
        }
        role::assignments_create(ctx, &request).await
    }
    .await;
    Ok(ret.finish(LABEL, action, result))
}

#[derive(Debug, Deserialize)]
struct AbsentParams {
    #[serde(default)]
    name: Option<String>,
    scope: String,
    #[serde(default)]
    role_definition: Option<String>,
    #[serde(default)]
    principal_id: Option<String>,
}

/// Ensure an assignment is gone, by name or by role and principal.
pub async fn assignment_absent(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<StateReturn> {
    let existing = lookup(role::assignments_get(&ctx.quiet(), name, scope)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || role::assignments_delete(ctx, name, scope)).await)
}

async fn absent_name(ctx: &ExecContext, params: &AbsentParams) -> AzureResult<Option<String>> {
    if let Some(ref name) = params.name {
        return Ok(Some(name.clone()));
    }
    match (&params.role_definition, &params.principal_id) {
        (Some(role_definition), Some(principal_id)) => {
            let role_id = role::resolve_role_definition_id(ctx, &params.scope, role_definition).await?;
            Ok(Some(role::assignment_name(&params.scope, &role_id, principal_id)))
        }
        _ => Ok(None),
    }
}

pub struct RoleState;

#[async_trait]
impl StateModule for RoleState {
    fn name(&self) -> &'static str {
        "azurerm.authorization.role"
    }

    fn description(&self) -> &'static str {
        "Ensure role assignments are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["assignment_present", "assignment_absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "assignment_present" => assignment_present(ctx, &parse_params(params)?).await,
            "assignment_absent" => {
                let req: AbsentParams = parse_params(params)?;
                match absent_name(ctx, &req).await? {
                    Some(name) => assignment_absent(ctx, &name, &req.scope).await,
                    None => Ok(StateReturn::new(&req.scope).fail(
                        "Either \"name\" or both \"role_definition\" and \"principal_id\" are required!",
                    )),
                }
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

    const READER: &str = "acdd72a7-3385-48ef-bd42-f606fba81ae7";
    const CONTRIBUTOR: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

    #[tokio::test]
    async fn test_present_is_idempotent() {
        let (_fake, ctx) = context();
        let p = params(json!({
            "name": "6a1a1f14-79b6-4bd5-9c7e-2a3b8b3c4d5e",
            "scope": ctx.resource_group_path("rg1"),
            "role_definition": READER,
            "principal_id": "p1"
        }));
        let ret = RoleState.apply("assignment_present", &p, &ctx).await.unwrap();
        assert_eq!(ret.result, Some(true));
        assert!(ret.comment.ends_with("has been created."));

        let ret = RoleState.apply("assignment_present", &p, &ctx).await.unwrap();
        assert!(ret.comment.ends_with("is already present."));
    }

    #[tokio::test]
    async fn test_role_change_replaces_assignment() {
        let (fake, ctx) = context();
        let scope = ctx.resource_group_path("rg1");
        let mut p = params(json!({
            "name": "6a1a1f14-79b6-4bd5-9c7e-2a3b8b3c4d5e",
            "scope": scope,
            "role_definition": READER,
            "principal_id": "p1"
        }));
        RoleState.apply("assignment_present", &p, &ctx).await.unwrap();

        p.insert("role_definition".into(), json!(CONTRIBUTOR));
        let ret = RoleState.apply("assignment_present", &p, &ctx).await.unwrap();
        assert!(ret.comment.ends_with("has been updated."));
        assert_eq!(fake.sent(Method::Delete).len(), 1);
    }

    #[tokio::test]
    async fn test_absent_by_role_and_principal() {
        let (_fake, ctx) = context();
        let scope = ctx.resource_group_path("rg1");
        let p = params(json!({"scope": scope, "role_definition": READER, "principal_id": "p1"}));
        RoleState.apply("assignment_present", &p, &ctx).await.unwrap();

        let ret = RoleState.apply("assignment_absent", &p, &ctx).await.unwrap();
        assert_eq!(ret.result, Some(true));
        assert!(ret.comment.ends_with("has been deleted."));

        let ret = RoleState
            .apply("assignment_absent", &params(json!({"scope": scope})), &ctx)
            .await
            .unwrap();
        assert_eq!(ret.result, Some(false));
    }
}
