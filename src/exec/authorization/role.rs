//! Role definitions and role assignments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::Authorization;

/// A role assignment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentParams {
    /// Assignment GUID; derived from the other fields when omitted.
    #[serde(default)]
    pub name: Option<String>,
    pub scope: String,
    /// Role name, role GUID or full role definition id.
    pub role_definition: String,
    pub principal_id: String,
    #[serde(default)]
    pub principal_type: Option<String>,
}

fn provider_path(scope: &str, rest: &str) -> String {
    format!(
        "{}/providers/{}/{}",
        scope.trim_end_matches('/'),
        SERVICE.namespace(),
        rest
    )
}

/// Stable assignment name for a scope, role and principal.
pub fn assignment_name(scope: &str, role_definition_id: &str, principal_id: &str) -> String {
    let seed = format!(
        "{}|{}|{}",
        scope.trim_end_matches('/'),
        role_definition_id,
        principal_id
    )
    .to_ascii_lowercase();
    Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()).to_string()
}

pub async fn definitions_get(ctx: &ExecContext, role_id: &str, scope: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &provider_path(scope, &format!("roleDefinitions/{}", role_id)))
        .await
}

pub async fn definitions_get_by_id(ctx: &ExecContext, role_id: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, role_id).await
}

/// List role definitions at a scope, keyed by role name.
pub async fn definitions_list(ctx: &ExecContext, scope: &str, filter: Option<&str>) -> AzureResult<Value> {
    let query: Vec<(&str, &str)> = filter.map(|f| ("$filter", f)).into_iter().collect();
    let items = ctx
        .list_with_query(SERVICE, &provider_path(scope, "roleDefinitions"), &query)
        .await?;
    let mut out = serde_json::Map::new();
    for item in items {
        if let Some(name) = item.get("role_name").and_then(Value::as_str) {
            out.insert(name.to_string(), item.clone());
        }
    }
    Ok(Value::Object(out))
}

/// Resolve a role name, GUID or id to a role definition id.
pub async fn resolve_role_definition_id(ctx: &ExecContext, scope: &str, role: &str) -> AzureResult<String> {
    if role.contains('/') {
        return Ok(role.to_string());
    }
    if Uuid::parse_str(role).is_ok() {
        return Ok(provider_path(&ctx.subscription_path(), &format!("roleDefinitions/{}", role)));
    }
    let filter = format!("roleName eq '{}'", role);
    let items = ctx
        .list_with_query(SERVICE, &provider_path(scope, "roleDefinitions"), &[("$filter", &filter)])
        .await?;
    items
        .iter()
        .find(|d| {
            d.get("role_name")
                .and_then(Value::as_str)
                .map(|n| n.eq_ignore_ascii_case(role))
                .unwrap_or(false)
        })
        .and_then(|d| d.get("id").and_then(Value::as_str))
        .map(String::from)
        .ok_or_else(|| {
            AzureError::InvalidParameter(format!(
                "The role definition named \"{}\" could not be found.",
                role
            ))
        })
}

/// Create a role assignment. Returns the assignment.
pub async fn assignments_create(ctx: &ExecContext, params: &AssignmentParams) -> AzureResult<Value> {
    let role_id = resolve_role_definition_id(ctx, &params.scope, &params.role_definition).await?;
    let name = params
        .name
        .clone()
        .unwrap_or_else(|| assignment_name(&params.scope, &role_id, &params.principal_id));

    let mut properties = json!({
        "roleDefinitionId": role_id,
        "principalId": params.principal_id,
    });
    if let Some(ref principal_type) = params.principal_type {
        properties["principalType"] = json!(principal_type);
    }
    ctx.put(
        SERVICE,
        &provider_path(&params.scope, &format!("roleAssignments/{}", name)),
        json!({ "properties": properties }),
    )
    .await
}

pub async fn assignments_delete(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &provider_path(scope, &format!("roleAssignments/{}", name)))
        .await
}

pub async fn assignments_get(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &provider_path(scope, &format!("roleAssignments/{}", name)))
        .await
}

pub async fn assignments_get_by_id(ctx: &ExecContext, assignment_id: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, assignment_id).await
}

pub async fn assignments_list(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &provider_path(&ctx.subscription_path(), "roleAssignments"))
        .await
}

pub async fn assignments_list_for_resource_group(ctx: &ExecContext, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(
        SERVICE,
        &provider_path(&ctx.resource_group_path(resource_group), "roleAssignments"),
    )
    .await
}

pub async fn assignments_list_for_scope(ctx: &ExecContext, scope: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &provider_path(scope, "roleAssignments"))
        .await
}

pub struct RoleExec;

#[async_trait]
impl ExecModule for RoleExec {
    fn name(&self) -> &'static str {
        "azurerm.authorization.role"
    }

    fn description(&self) -> &'static str {
        "Manage role definitions and role assignments"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "definitions_get",
            "definitions_get_by_id",
            "definitions_list",
            "assignments_create",
            "assignments_delete",
            "assignments_get",
            "assignments_get_by_id",
            "assignments_list",
            "assignments_list_for_resource_group",
            "assignments_list_for_scope",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        match function {
            "definitions_get" => {
                definitions_get(
                    ctx,
                    &params.get_string_required("role_id")?,
                    &params.get_string_required("scope")?,
                )
                .await
            }
            "definitions_get_by_id" => definitions_get_by_id(ctx, &params.get_string_required("role_id")?).await,
            "definitions_list" => {
                definitions_list(
                    ctx,
                    &params.get_string_required("scope")?,
                    params.get_string("filter")?.as_deref(),
                )
                .await
            }
            "assignments_create" => assignments_create(ctx, &parse_params(params)?).await,
            "assignments_delete" => {
                assignments_delete(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("scope")?,
                )
                .await?;
                Ok(json!(true))
            }
            "assignments_get" => {
                assignments_get(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("scope")?,
                )
                .await
            }
            "assignments_get_by_id" => {
                assignments_get_by_id(ctx, &params.get_string_required("assignment_id")?).await
            }
            "assignments_list" => assignments_list(ctx).await,
            "assignments_list_for_resource_group" => {
                assignments_list_for_resource_group(ctx, &params.get_string_required("resource_group")?).await
            }
            "assignments_list_for_scope" => {
                assignments_list_for_scope(ctx, &params.get_string_required("scope")?).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
