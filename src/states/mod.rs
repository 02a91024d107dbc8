//! State modules.
//!
//! A state makes one resource match a desired configuration: it fetches the
//! resource, diffs it against the parameters, and then does nothing,
//! reports the pending change (test mode), or applies it through the
//! matching execution module.

pub mod authorization;
pub mod compute;
pub mod containerregistry;
pub mod diff;
pub mod keyvault;
pub mod network;
pub mod redis;
pub mod resource;
pub mod storage;
pub mod web;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{AzureError, AzureResult};
use crate::exec::{ExecContext, ModuleParams, ParamExt};

/// Outcome category of a state, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    /// Already in the desired state.
    Ok,
    /// Changes were applied.
    Changed,
    /// Test mode: changes would be applied.
    Pending,
    Failed,
    /// Not run because a requisite failed.
    Skipped,
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateStatus::Ok => "ok",
            StateStatus::Changed => "changed",
            StateStatus::Pending => "pending",
            StateStatus::Failed => "failed",
            StateStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// What a state did.
///
/// `result` is `Some(true)` on success, `Some(false)` on failure and `None`
/// in test mode when changes are pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReturn {
    pub name: String,
    pub result: Option<bool>,
    pub comment: String,
    pub changes: Map<String, Value>,
}

/// Create or update, for comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
}

impl Action {
    fn verb(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
        }
    }

    fn past(&self) -> &'static str {
        match self {
            Action::Create => "created",
            Action::Update => "updated",
        }
    }
}

/// Upper-case the first letter of a resource label.
fn sentence(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl StateReturn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Some(false),
            comment: String::new(),
            changes: Map::new(),
        }
    }

    pub fn succeed(mut self, comment: impl Into<String>) -> Self {
        self.result = Some(true);
        self.comment = comment.into();
        self
    }

    pub fn pending(mut self, comment: impl Into<String>) -> Self {
        self.result = None;
        self.comment = comment.into();
        self
    }

    /// Mark failed; a failed state reports no changes.
    pub fn fail(mut self, comment: impl Into<String>) -> Self {
        self.result = Some(false);
        self.comment = comment.into();
        self.changes.clear();
        self
    }

    /// Record one changed field.
    pub fn change(&mut self, key: impl Into<String>, value: Value) {
        self.changes.insert(key.into(), value);
    }

    /// Record a changed field when `value` is a diff.
    pub fn change_if(&mut self, key: impl Into<String>, value: Option<Value>) {
        if let Some(value) = value {
            self.change(key, value);
        }
    }

    /// Replace changes with `{"old": old, "new": new}`.
    pub fn set_old_new(&mut self, old: Value, new: Value) {
        self.changes = Map::new();
        self.changes.insert("old".to_string(), old);
        self.changes.insert("new".to_string(), new);
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn status(&self) -> StateStatus {
        match self.result {
            None => StateStatus::Pending,
            Some(false) => StateStatus::Failed,
            Some(true) if self.has_changes() => StateStatus::Changed,
            Some(true) => StateStatus::Ok,
        }
    }

    /// `{Label} {name} is already present.`
    pub fn already_present(self, label: &str) -> Self {
        let comment = format!("{} {} is already present.", sentence(label), self.name);
        self.succeed(comment)
    }

    /// `{Label} {name} would be created/updated.`
    pub fn would(self, label: &str, action: Action) -> Self {
        let comment = format!(
            "{} {} would be {}.",
            sentence(label),
            self.name,
            action.past()
        );
        self.pending(comment)
    }

    /// Record the outcome of applying a create or update.
    pub fn finish<T>(self, label: &str, action: Action, result: AzureResult<T>) -> Self {
        match result {
            Ok(_) => {
                let comment = format!(
                    "{} {} has been {}.",
                    sentence(label),
                    self.name,
                    action.past()
                );
                self.succeed(comment)
            }
            Err(err) => {
                let comment = format!(
                    "Failed to {} {} {}! ({})",
                    action.verb(),
                    label,
                    self.name,
                    err
                );
                self.fail(comment)
            }
        }
    }
}

/// Fetch a resource, mapping "not found" to `None`.
pub async fn lookup<F>(fetch: F) -> AzureResult<Option<Value>>
where
    F: Future<Output = AzureResult<Value>>,
{
    match fetch.await {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Shared `absent` flow: no-op when missing, pending in test mode,
/// otherwise delete.
pub async fn ensure_absent<F, Fut>(
    ctx: &ExecContext,
    name: &str,
    label: &str,
    existing: Option<Value>,
    delete: F,
) -> StateReturn
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AzureResult<()>>,
{
    let mut ret = StateReturn::new(name);
    let existing = match existing {
        Some(existing) => existing,
        None => {
            let comment = format!("{} {} was not found.", sentence(label), name);
            return ret.succeed(comment);
        }
    };

    ret.set_old_new(existing, json!({}));
    if ctx.test {
        let comment = format!("{} {} would be deleted.", sentence(label), name);
        return ret.pending(comment);
    }

    match delete().await {
        Ok(()) => {
            let comment = format!("{} {} has been deleted.", sentence(label), name);
            ret.succeed(comment)
        }
        Err(err) => {
            let comment = format!("Failed to delete {} {}! ({})", label, name, err);
            ret.fail(comment)
        }
    }
}

/// Parameters, serialized as the "new" side of a creation, with secrets
/// and connection settings left out.
pub fn desired(value: &impl Serialize) -> Value {
    let mut v = serde_json::to_value(value).unwrap_or(Value::Null);
    if let Some(map) = v.as_object_mut() {
        for key in ["connection_auth", "value", "password", "secret"] {
            map.remove(key);
        }
        map.retain(|_, v| !v.is_null());
    }
    v
}

/// Trait implemented by every state module.
#[async_trait]
pub trait StateModule: Send + Sync {
    /// Registered name, e.g. `azurerm.resource.group`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// State functions (`present`, `absent`, ...).
    fn functions(&self) -> &'static [&'static str];

    async fn apply(
        &self,
        function: &str,
        params: &ModuleParams,
        ctx: &ExecContext,
    ) -> AzureResult<StateReturn>;
}

/// Registry of state modules.
pub struct StateRegistry {
    modules: HashMap<String, Arc<dyn StateModule>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(resource::group::ResourceGroupState));
        registry.register(Arc::new(resource::management_lock::ManagementLockState));
        registry.register(Arc::new(resource::policy::PolicyState));
        registry.register(Arc::new(authorization::role::RoleState));
        registry.register(Arc::new(keyvault::vault::VaultState));
        registry.register(Arc::new(keyvault::secret::SecretState));
        registry.register(Arc::new(network::virtual_network::VirtualNetworkState));
        registry.register(Arc::new(network::network_security_group::NetworkSecurityGroupState));
        registry.register(Arc::new(network::public_ip_address::PublicIpAddressState));
        registry.register(Arc::new(storage::account::StorageAccountState));
        registry.register(Arc::new(storage::container::ContainerState));
        registry.register(Arc::new(redis::operations::RedisState));
        registry.register(Arc::new(containerregistry::registry::RegistryState));
        registry.register(Arc::new(compute::availability_set::AvailabilitySetState));
        registry.register(Arc::new(compute::disk::DiskState));
        registry.register(Arc::new(compute::virtual_machine::VirtualMachineState));
        registry.register(Arc::new(web::function_app::FunctionAppState));
        registry
    }

    pub fn register(&mut self, module: Arc<dyn StateModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StateModule>> {
        self.modules.get(name).cloned()
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run `azurerm.<family>.<module>.<function>`.
    ///
    /// Errors (bad parameters, lookups failing for reasons other than
    /// "not found") become a failed [`StateReturn`].
    pub async fn run(&self, path: &str, params: &ModuleParams, ctx: &ExecContext) -> StateReturn {
        let name = params.get_string("name").ok().flatten().unwrap_or_default();
        let outcome = match path.rsplit_once('.') {
            Some((module_name, function)) => match self.get(module_name) {
                Some(module) => {
                    debug!("Applying {} for {}", path, name);
                    module.apply(function, params, ctx).await
                }
                None => Err(AzureError::FunctionNotFound(path.to_string())),
            },
            None => Err(AzureError::FunctionNotFound(path.to_string())),
        };
        match outcome {
            Ok(ret) => ret,
            Err(err) => StateReturn::new(name).fail(err.to_string()),
        }
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{context, params};

    #[test]
    fn test_status() {
        assert_eq!(StateReturn::new("x").status(), StateStatus::Failed);
        assert_eq!(StateReturn::new("x").succeed("ok").status(), StateStatus::Ok);
        let mut changed = StateReturn::new("x");
        changed.change("tags", json!({"new": {}}));
        assert_eq!(changed.clone().succeed("done").status(), StateStatus::Changed);
        assert_eq!(changed.pending("later").status(), StateStatus::Pending);
    }

    #[test]
    fn test_fail_clears_changes() {
        let mut ret = StateReturn::new("x");
        ret.change("tags", json!({}));
        let ret = ret.fail("boom");
        assert!(ret.changes.is_empty());
        assert_eq!(ret.result, Some(false));
    }

    #[test]
    fn test_finish_comments() {
        let ok = StateReturn::new("vnet1").finish("virtual network", Action::Create, Ok(()));
        assert_eq!(ok.comment, "Virtual network vnet1 has been created.");

        let err: AzureResult<()> = Err(AzureError::InvalidParameter("bad".into()));
        let failed = StateReturn::new("vnet1").finish("virtual network", Action::Update, err);
        assert_eq!(
            failed.comment,
            "Failed to update virtual network vnet1! (Invalid parameter: bad)"
        );
    }

    #[tokio::test]
    async fn test_ensure_absent_missing() {
        let (_fake, ctx) = context();
        let ret = ensure_absent(&ctx, "rg1", "resource group", None, || async { Ok(()) }).await;
        assert_eq!(ret.result, Some(true));
        assert_eq!(ret.comment, "Resource group rg1 was not found.");
    }

    #[tokio::test]
    async fn test_ensure_absent_test_mode() {
        let (_fake, ctx) = context();
        let ctx = ctx.with_test(true);
        let ret = ensure_absent(&ctx, "rg1", "resource group", Some(json!({"name": "rg1"})), || async {
            Err(AzureError::InvalidParameter("delete ran in test mode".into()))
        })
        .await;
        assert_eq!(ret.result, None);
        assert_eq!(ret.changes["new"], json!({}));
    }

    #[tokio::test]
    async fn test_registry_turns_errors_into_failures() {
        let (_fake, ctx) = context();
        let registry = StateRegistry::with_builtins();
        let ret = registry
            .run("azurerm.resource.group.present", &params(json!({"name": "rg1"})), &ctx)
            .await;
        assert_eq!(ret.result, Some(false));
        assert!(ret.comment.contains("location"));
    }

    #[test]
    fn test_desired_strips_secrets() {
        let v = desired(&json!({"name": "s", "value": "hunter2", "connection_auth": {}, "tags": null}));
        assert_eq!(v, json!({"name": "s"}));
    }
}
