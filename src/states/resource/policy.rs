//! Policy definition and assignment states.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::AzureResult;
use crate::exec::resource::policy::{self, AssignmentParams, DefinitionParams};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::resource_id::last_segment;
use crate::states::diff::{deep_diff, str_changed};
use crate::states::{desired, ensure_absent, lookup, Action, StateModule, StateReturn};

const DEFINITION: &str = "policy definition";
const ASSIGNMENT: &str = "policy assignment";

/// Parameters of `definition_present`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefinitionPresentParams {
    pub name: String,
    #[serde(default)]
    pub policy_rule: Option<Value>,
    #[serde(default)]
    pub policy_rule_json: Option<String>,
    #[serde(default)]
    pub policy_rule_file: Option<PathBuf>,
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

impl DefinitionPresentParams {
    /// Resolve the three rule sources into one definition.
    ///
    /// `Err` carries the comment of a failed state.
    pub fn resolve(&self) -> Result<DefinitionParams, String> {
        let sources = [
            self.policy_rule.is_some(),
            self.policy_rule_json.is_some(),
            self.policy_rule_file.is_some(),
        ];
        match sources.iter().filter(|s| **s).count() {
            0 => {
                return Err(
                    "One of \"policy_rule\", \"policy_rule_json\", or \"policy_rule_file\" is required!"
                        .to_string(),
                )
            }
            1 => {}
            _ => {
                return Err(
                    "Only one of \"policy_rule\", \"policy_rule_json\", or \"policy_rule_file\" is allowed!"
                        .to_string(),
                )
            }
        }

        if let Some(ref rule) = self.policy_rule {
            return Ok(DefinitionParams {
                name: self.name.clone(),
                policy_rule: rule.clone(),
                policy_type: self.policy_type.clone(),
                mode: self.mode.clone(),
                display_name: self.display_name.clone(),
                description: self.description.clone(),
                metadata: self.metadata.clone(),
                parameters: self.parameters.clone(),
            });
        }

        if self.policy_type.is_some()
            || self.mode.is_some()
            || self.display_name.is_some()
            || self.description.is_some()
            || self.metadata.is_some()
            || self.parameters.is_some()
        {
            return Err(
                "Policy definitions cannot be passed when \"policy_rule_json\" or \"policy_rule_file\" is defined!"
                    .to_string(),
            );
        }

        let document: Value = if let Some(ref text) = self.policy_rule_json {
            serde_json::from_str(text)
                .map_err(|e| format!("Unable to load policy rule json! ({})", e))?
        } else {
            let path = self.policy_rule_file.clone().unwrap_or_default();
            let text = std::fs::read_to_string(&path).map_err(|e| {
                format!("Unable to load policy rule file \"{}\"! ({})", path.display(), e)
            })?;
            serde_json::from_str(&text).map_err(|e| {
                format!("Unable to load policy rule file \"{}\"! ({})", path.display(), e)
            })?
        };

        let props = document.get("properties").cloned().unwrap_or_else(|| json!({}));
        let text = |key: &str| props.get(key).and_then(Value::as_str).map(String::from);
        Ok(DefinitionParams {
            name: document
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .unwrap_or(&self.name)
                .to_string(),
            policy_rule: props.get("policyRule").cloned().unwrap_or(Value::Null),
            policy_type: text("policyType"),
            mode: text("mode"),
            display_name: text("displayName"),
            description: text("description"),
            metadata: props.get("metadata").cloned(),
            parameters: props.get("parameters").cloned(),
        })
    }
}

fn text_change(existing: &Value, key: &str, new: &Option<String>) -> Option<Value> {
    let old = existing.get(key).and_then(Value::as_str).unwrap_or_default();
    let new_text = new.as_deref().unwrap_or_default();
    (!old.eq_ignore_ascii_case(new_text)).then(|| json!({"old": existing.get(key), "new": new}))
}

/// Ensure a policy definition exists.
pub async fn definition_present(ctx: &ExecContext, params: &DefinitionPresentParams) -> AzureResult<StateReturn> {
    let definition = match params.resolve() {
        Ok(definition) => definition,
        Err(comment) => return Ok(StateReturn::new(&params.name).fail(comment)),
    };
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(policy::definition_get(&ctx.quiet(), &definition.name, None)).await?;

    let action = match existing {
        Some(current) => {
            if str_changed(
                current.get("policy_type").and_then(Value::as_str),
                definition.policy_type.as_deref(),
            ) {
                ret.change(
                    "policy_type",
                    json!({"old": current.get("policy_type"), "new": definition.policy_type}),
                );
            }
            ret.change_if("mode", text_change(&current, "mode", &definition.mode));
            ret.change_if("display_name", text_change(&current, "display_name", &definition.display_name));
            ret.change_if("description", text_change(&current, "description", &definition.description));

            let old_rule = current.get("policy_rule").cloned().unwrap_or_else(|| json!({}));
            ret.change_if("policy_rule", deep_diff(&old_rule, &definition.policy_rule));

            let old_meta = current.get("metadata").cloned().unwrap_or_else(|| json!({}));
            let new_meta = definition.metadata.clone().unwrap_or_else(|| json!({}));
            ret.change_if("metadata", deep_diff(&old_meta, &new_meta));

            let old_params = current.get("parameters").cloned().unwrap_or_else(|| json!({}));
            let new_params = definition.parameters.clone().unwrap_or_else(|| json!({}));
            ret.change_if("parameters", deep_diff(&old_params, &new_params));

            if !ret.has_changes() {
                return Ok(ret.already_present(DEFINITION));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(&definition));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(DEFINITION, action));
    }
    let result = policy::definition_create_or_update(ctx, &definition).await;
    Ok(ret.finish(DEFINITION, action, result))
}

pub async fn definition_absent(ctx: &ExecContext, name: &str) -> AzureResult<StateReturn> {
    let existing = lookup(policy::definition_get(&ctx.quiet(), name, Some("Custom"))).await?;
    Ok(ensure_absent(ctx, name, DEFINITION, existing, || policy::definition_delete(ctx, name)).await)
}

/// Ensure a policy assignment exists.
pub async fn assignment_present(ctx: &ExecContext, params: &AssignmentParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);
    let existing = lookup(policy::assignment_get(&ctx.quiet(), &params.name, &params.scope)).await?;

    let action = match existing {
        Some(current) => {
            if let Some(old_scope) = current.get("scope").and_then(Value::as_str) {
                if !old_scope.eq_ignore_ascii_case(&params.scope) {
                    ret.change("scope", json!({"old": old_scope, "new": params.scope}));
                }
            }

            let old_definition = current
                .get("policy_definition_id")
                .and_then(Value::as_str)
                .map(last_segment)
                .unwrap_or_default();
            if !old_definition.eq_ignore_ascii_case(&params.definition_name) {
                ret.change(
                    "definition_name",
                    json!({"old": old_definition, "new": params.definition_name}),
                );
            }

            ret.change_if("display_name", text_change(&current, "display_name", &params.display_name));
            ret.change_if("description", text_change(&current, "description", &params.description));

            let old_params = current.get("parameters").cloned().unwrap_or_else(|| json!({}));
            let new_params = params.parameters.clone().unwrap_or_else(|| json!({}));
            ret.change_if("parameters", deep_diff(&old_params, &new_params));

            if !ret.has_changes() {
                return Ok(ret.already_present(ASSIGNMENT));
            }
            Action::Update
        }
        None => {
            ret.set_old_new(json!({}), desired(params));
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(ASSIGNMENT, action));
    }
    let result = policy::assignment_create(ctx, params).await;
    Ok(ret.finish(ASSIGNMENT, action, result))
}

pub async fn assignment_absent(ctx: &ExecContext, name: &str, scope: &str) -> AzureResult<StateReturn> {
    let existing = lookup(policy::assignment_get(&ctx.quiet(), name, scope)).await?;
    Ok(ensure_absent(ctx, name, ASSIGNMENT, existing, || policy::assignment_delete(ctx, name, scope)).await)
}

pub struct PolicyState;

#[async_trait]
impl StateModule for PolicyState {
    fn name(&self) -> &'static str {
        "azurerm.resource.policy"
    }

    fn description(&self) -> &'static str {
        "Ensure policy definitions and assignments are present or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["definition_present", "definition_absent", "assignment_present", "assignment_absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        match function {
            "definition_present" => definition_present(ctx, &parse_params(params)?).await,
            "definition_absent" => definition_absent(ctx, &params.get_string_required("name")?).await,
            "assignment_present" => assignment_present(ctx, &parse_params(params)?).await,
            "assignment_absent" => {
                assignment_absent(
                    ctx,
                    &params.get_string_required("name")?,
                    &params.get_string_required("scope")?,
                )
                .await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
