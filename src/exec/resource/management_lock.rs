//! Management locks at subscription, resource group, resource or arbitrary scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::ManagementLock;

/// Lock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockLevel {
    NotSpecified,
    CanNotDelete,
    ReadOnly,
}

impl LockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockLevel::NotSpecified => "NotSpecified",
            LockLevel::CanNotDelete => "CanNotDelete",
            LockLevel::ReadOnly => "ReadOnly",
        }
    }
}

/// Lock definition shared by every `create_or_update_*` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockParams {
    pub name: String,
    pub lock_level: LockLevel,
    #[serde(default)]
    pub notes: Option<String>,
    /// Application ids of the lock owners.
    #[serde(default)]
    pub owners: Option<Vec<String>>,
}

/// A resource below a resource group, addressed by its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAddress {
    pub resource_group: String,
    pub resource_provider_namespace: String,
    #[serde(default)]
    pub parent_resource_path: Option<String>,
    pub resource_type: String,
    pub resource: String,
}

/// Where a lock lives.
#[derive(Debug, Clone, PartialEq)]
pub enum LockScope {
    Subscription,
    ResourceGroup(String),
    Resource(ResourceAddress),
    /// Any scope id (`/subscriptions/..`, a resource group id, a resource id).
    Scope(String),
}

impl LockScope {
    fn path(&self, ctx: &ExecContext) -> String {
        match self {
            LockScope::Subscription => ctx.subscription_path(),
            LockScope::ResourceGroup(rg) => ctx.resource_group_path(rg),
            LockScope::Resource(addr) => {
                let parent = addr
                    .parent_resource_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(|p| format!("{}/", p.trim_matches('/')))
                    .unwrap_or_default();
                format!(
                    "{}/providers/{}/{}{}/{}",
                    ctx.resource_group_path(&addr.resource_group),
                    addr.resource_provider_namespace,
                    parent,
                    addr.resource_type,
                    addr.resource
                )
            }
            LockScope::Scope(scope) => scope.trim_end_matches('/').to_string(),
        }
    }
}

fn collection(ctx: &ExecContext, scope: &LockScope) -> String {
    format!("{}/providers/{}/locks", scope.path(ctx), SERVICE.namespace())
}

fn lock_path(ctx: &ExecContext, scope: &LockScope, name: &str) -> String {
    format!("{}/{}", collection(ctx, scope), name)
}

fn lock_body(params: &LockParams) -> Value {
    let owners: Vec<Value> = params
        .owners
        .iter()
        .flatten()
        .map(|id| json!({ "applicationId": id }))
        .collect();
    let mut properties = json!({
        "level": params.lock_level.as_str(),
        "owners": owners,
    });
    if let Some(ref notes) = params.notes {
        properties["notes"] = json!(notes);
    }
    json!({ "properties": properties })
}

pub async fn create_or_update(ctx: &ExecContext, scope: &LockScope, params: &LockParams) -> AzureResult<Value> {
    ctx.put(SERVICE, &lock_path(ctx, scope, &params.name), lock_body(params))
        .await
}

pub async fn get(ctx: &ExecContext, scope: &LockScope, name: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &lock_path(ctx, scope, name)).await
}

pub async fn delete(ctx: &ExecContext, scope: &LockScope, name: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &lock_path(ctx, scope, name)).await
}

/// List locks at a scope, keyed by name.
pub async fn list(ctx: &ExecContext, scope: &LockScope) -> AzureResult<Value> {
    ctx.list_by_name(SERVICE, &collection(ctx, scope)).await
}

/// Read the scope implied by a function name's suffix.
fn scope_for(function: &str, params: &ModuleParams) -> AzureResult<LockScope> {
    if function.ends_with("at_subscription_level") {
        Ok(LockScope::Subscription)
    } else if function.ends_with("at_resource_group_level") {
        Ok(LockScope::ResourceGroup(params.get_string_required("resource_group")?))
    } else if function.ends_with("at_resource_level") {
        Ok(LockScope::Resource(parse_params(params)?))
    } else if function.ends_with("by_scope") {
        Ok(LockScope::Scope(params.get_string_required("scope")?))
    } else {
        Err(AzureError::FunctionNotFound(function.to_string()))
    }
}

pub struct ManagementLockExec;

#[async_trait]
impl ExecModule for ManagementLockExec {
    fn name(&self) -> &'static str {
        "azurerm.resource.management_lock"
    }

    fn description(&self) -> &'static str {
        "Manage management locks"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "create_or_update_at_resource_group_level",
            "delete_at_resource_group_level",
            "get_at_resource_group_level",
            "create_or_update_by_scope",
            "delete_by_scope",
            "get_by_scope",
            "create_or_update_at_resource_level",
            "delete_at_resource_level",
            "get_at_resource_level",
            "create_or_update_at_subscription_level",
            "delete_at_subscription_level",
            "get_at_subscription_level",
            "list_at_resource_group_level",
            "list_at_resource_level",
            "list_at_subscription_level",
            "list_by_scope",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        if !self.functions().contains(&function) {
            return Err(unknown_function(self.name(), function));
        }
        let scope = scope_for(function, params)?;
        if function.starts_with("create_or_update") {
            create_or_update(ctx, &scope, &parse_params(params)?).await
        } else if function.starts_with("delete") {
            delete(ctx, &scope, &params.get_string_required("name")?).await?;
            Ok(json!(true))
        } else if function.starts_with("get") {
            get(ctx, &scope, &params.get_string_required("name")?).await
        } else {
            list(ctx, &scope).await
        }
    }
}
