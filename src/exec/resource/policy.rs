//! Policy definitions and assignments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::Policy;

/// A policy definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionParams {
    pub name: String,
    pub policy_rule: Value,
    #[serde(default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// A policy assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentParams {
    pub name: String,
    pub scope: String,
    pub definition_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

fn definition_path(ctx: &ExecContext, name: &str) -> String {
    ctx.subscription_provider_path(SERVICE, &format!("policyDefinitions/{}", name))
}

fn builtin_definition_path(name: &str) -> String {
    format!("/providers/{}/policyDefinitions/{}", SERVICE.namespace(), name)
}

fn assignment_path(scope: &str, name: &str) -> String {
    format!(
        "{}/providers/{}/policyAssignments/{}",
        scope.trim_end_matches('/'),
        SERVICE.namespace(),
        name
    )
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: &Option<impl Serialize>) {
    if let Some(v) = value {
        if let Ok(v) = serde_json::to_value(v) {
            map.insert(key.to_string(), v);
        }
    }
}

pub async fn definition_create_or_update(ctx: &ExecContext, params: &DefinitionParams) -> AzureResult<Value> {
    if !params.policy_rule.is_object() {
        return Err(AzureError::InvalidParameter(
            "The policy rule must be a dictionary!".to_string(),
        ));
    }
    let mut properties = Map::new();
    properties.insert("policyRule".to_string(), params.policy_rule.clone());
    insert_opt(&mut properties, "policyType", &params.policy_type);
    insert_opt(&mut properties, "mode", &params.mode);
    insert_opt(&mut properties, "displayName", &params.display_name);
    insert_opt(&mut properties, "description", &params.description);
    insert_opt(&mut properties, "metadata", &params.metadata);
    insert_opt(&mut properties, "parameters", &params.parameters);

    ctx.put(
        SERVICE,
        &definition_path(ctx, &params.name),
        json!({ "properties": properties }),
    )
    .await
}

pub async fn definition_delete(ctx: &ExecContext, name: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &definition_path(ctx, name)).await
}

/// Get a policy definition.
///
/// GUID names and `policy_type = BuiltIn` go straight to the built-in
/// definitions; other names are looked up among custom definitions first.
pub async fn definition_get(ctx: &ExecContext, name: &str, policy_type: Option<&str>) -> AzureResult<Value> {
    let builtin = match policy_type {
        Some(t) => t.eq_ignore_ascii_case("builtin"),
        None => Uuid::parse_str(name).is_ok(),
    };
    if builtin {
        return ctx.get(SERVICE, &builtin_definition_path(name)).await;
    }
    match ctx.quiet().get(SERVICE, &definition_path(ctx, name)).await {
        Err(err) if err.is_not_found() && policy_type.is_none() => {
            debug!("Policy definition {} is not custom, trying built-in", name);
            ctx.get(SERVICE, &builtin_definition_path(name)).await
        }
        other => other,
    }
}

/// List policy definitions, keyed by name.
pub async fn definitions_list(ctx: &ExecContext, hide_builtin: bool) -> AzureResult<Value> {
    let items = ctx
        .list(SERVICE, &ctx.subscription_provider_path(SERVICE, "policyDefinitions"))
        .await?;
    let mut out = Map::new();
    for item in items {
        let is_builtin = item
            .get("policy_type")
            .and_then(Value::as_str)
            .map(|t| t.eq_ignore_ascii_case("BuiltIn"))
            .unwrap_or(false);
        if hide_builtin && is_builtin {
            continue;
        }
        if let Some(name) = item.get("name").and_then(Value::as_str) {
            out.insert(name.to_string(), item.clone());
        }
    }
    Ok(Value::Object(out))
}

/// Create a policy assignment; the definition id is resolved by name.
pub async fn assignment_create(ctx: &ExecContext, params: &AssignmentParams) -> AzureResult<Value> {
    let definition = definition_get(ctx, &params.definition_name, None)
        .await
        .map_err(|err| {
            if err.is_not_found() {
                AzureError::InvalidParameter(format!(
                    "The policy definition named \"{}\" could not be found.",
                    params.definition_name
                ))
            } else {
                err
            }
        })?;
    let definition_id = definition
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AzureError::InvalidParameter("policy definition has no id".to_string()))?;

    let mut properties = Map::new();
    properties.insert("policyDefinitionId".to_string(), json!(definition_id));
    insert_opt(&mut properties, "displayName", &params.display_name);
    insert_opt(&mut properties, "description", &params.description);
    insert_opt(&mut properties, "parameters", &params.parameters);

    ctx.put(
        SERVICE,
        &assignment_path(&params.scope, &params.name),
        json!({ "properties": properties }),
    )
    .await
}

pub async fn assignment_delete(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &assignment_path(scope, name)).await
}

pub async fn assignment_get(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &assignment_path(scope, name)).await
}

pub async fn assignments_list(ctx: &ExecContext) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.subscription_provider_path(SERVICE, "policyAssignments"))
        .await
}

pub async fn assignments_list_for_resource_group(ctx: &ExecContext, resource_group: &str) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &ctx.provider_path(resource_group, SERVICE, "policyAssignments"))
        .await
}

pub struct PolicyExec;

#[async_trait]
impl ExecModule for PolicyExec {
    fn name(&self) -> &'static str {
        "azurerm.resource.policy"
    }

    fn description(&self) -> &'static str {
        "Manage policy definitions and assignments"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "definition_create_or_update",
            "definition_delete",
            "definition_get",
            "definitions_list",
            "assignment_create",
            "assignment_delete",
            "assignment_get",
            "assignments_list",
            "assignments_list_for_resource_group",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        match function {
            "definition_create_or_update" => definition_create_or_update(ctx, &parse_params(params)?).await,
            "definition_delete" => {
                definition_delete(ctx, &params.get_string_required("name")?).await?;
                Ok(json!(true))
            }
            "definition_get" => {
                definition_get(
                    ctx,
                    &params.get_string_required("name")?,
                    params.get_string("policy_type")?.as_deref(),
                )
                .await
            }
            "definitions_list" => definitions_list(ctx, params.get_bool_or("hide_builtin", false)).await,
            "assignment_create" => assignment_create(ctx, &parse_params(params)?).await,
            "assignment_delete" => {
                assignment_delete(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("scope")?,
                )
                .await?;
                Ok(json!(true))
            }
            "assignment_get" => {
                assignment_get(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("scope")?,
                )
                .await
            }
            "assignments_list" => assignments_list(ctx).await,
            "assignments_list_for_resource_group" => {
                assignments_list_for_resource_group(ctx, &params.get_string_required("resource_group")?).await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ArmResponse, Method};
    use crate::exec::testing::{context, params, SUB};

    fn rule() -> Value {
        json!({"if": {"field": "location", "notIn": ["eastus"]}, "then": {"effect": "deny"}})
    }

    #[tokio::test]
    async fn test_definition_roundtrip() {
        let (_fake, ctx) = context();
        let created = PolicyExec
            .call(
                "definition_create_or_update",
                &params(json!({"name": "allowed-locations", "policy_rule": rule(), "mode": "All"})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(created["policy_rule"], rule());
        assert_eq!(created["mode"], "All");
    }

    #[tokio::test]
    async fn test_definition_get_falls_back_to_builtin() {
        let (fake, ctx) = context();
        fake.insert(
            "/providers/Microsoft.Authorization/policyDefinitions/audit-vms",
            json!({"properties": {"policyType": "BuiltIn"}}),
        );
        let def = definition_get(&ctx, "audit-vms", None).await.unwrap();
        assert_eq!(def["policy_type"], "BuiltIn");
    }

    #[tokio::test]
    async fn test_definitions_list_hides_builtin() {
        let (fake, ctx) = context();
        fake.respond(
            Method::Get,
            &format!("/subscriptions/{}/providers/Microsoft.Authorization/policyDefinitions", SUB),
            ArmResponse::new(200, json!({"value": [
                {"name": "custom", "properties": {"policyType": "Custom"}},
                {"name": "builtin", "properties": {"policyType": "BuiltIn"}}
            ]})),
        );
        let all = definitions_list(&ctx, false).await.unwrap();
        assert_eq!(all.as_object().unwrap().len(), 2);
        let custom = definitions_list(&ctx, true).await.unwrap();
        assert!(custom.get("builtin").is_none());
    }

    #[tokio::test]
    async fn test_assignment_resolves_definition_id() {
        let (fake, ctx) = context();
        definition_create_or_update(
            &ctx,
            &DefinitionParams {
                name: "pol1".into(),
                policy_rule: rule(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let scope = format!("/subscriptions/{}", SUB);
        let assignment = assignment_create(
            &ctx,
            &AssignmentParams {
                name: "assign1".into(),
                scope: scope.clone(),
                definition_name: "pol1".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(assignment["policy_definition_id"]
            .as_str()
            .unwrap()
            .ends_with("/policyDefinitions/pol1"));
        assert!(fake
            .get(&format!("{}/providers/Microsoft.Authorization/policyAssignments/assign1", scope))
            .is_some());
    }

    #[tokio::test]
    async fn test_assignment_unknown_definition() {
        let (_fake, ctx) = context();
        let err = assignment_create(
            &ctx,
            &AssignmentParams {
                name: "a".into(),
                scope: "/subscriptions/x".into(),
                definition_name: "nope".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter: The policy definition named \"nope\" could not be found."
        );
    }
}
