//! Execution modules.
//!
//! An execution module maps keyword parameters onto one ARM operation and
//! returns the normalized response. Modules are registered under
//! `azurerm.<family>.<module>` and called as
//! `azurerm.<family>.<module>.<function>`.

pub mod application_insights;
pub mod authorization;
pub mod compute;
pub mod containerregistry;
pub mod keyvault;
pub mod network;
pub mod redis;
pub mod resource;
pub mod storage;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn, Level};

use crate::auth::CloudEnvironment;
use crate::client::{
    pager, poller, ArmClient, ArmRequest, ArmResponse, AzureError, AzureResult, Method,
    PollerConfig, Service,
};
use crate::normalize;

/// Parameters passed to modules
pub type ModuleParams = HashMap<String, Value>;

/// Everything an execution function needs to reach ARM.
#[derive(Clone)]
pub struct ExecContext {
    client: Arc<dyn ArmClient>,
    cloud: CloudEnvironment,
    poller: PollerConfig,
    log_level: Level,
    /// Test mode: states report what would change without applying it.
    pub test: bool,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("subscription_id", &self.client.subscription_id())
            .field("cloud", &self.cloud.name)
            .field("poller", &self.poller)
            .field("log_level", &self.log_level)
            .field("test", &self.test)
            .finish()
    }
}

impl ExecContext {
    pub fn new(client: Arc<dyn ArmClient>) -> Self {
        Self {
            client,
            cloud: CloudEnvironment::public(),
            poller: PollerConfig::default(),
            log_level: Level::ERROR,
            test: false,
        }
    }

    pub fn with_cloud(mut self, cloud: CloudEnvironment) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Level used for `CloudError` log lines (`azurerm_log_level`).
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Copy that logs errors at info; used for state lookups, where a
    /// missing resource is expected.
    pub fn quiet(&self) -> Self {
        self.clone().with_log_level(Level::INFO)
    }

    pub fn cloud(&self) -> &CloudEnvironment {
        &self.cloud
    }

    pub fn subscription_id(&self) -> &str {
        self.client.subscription_id()
    }

    /// `/subscriptions/{id}`
    pub fn subscription_path(&self) -> String {
        format!("/subscriptions/{}", self.subscription_id())
    }

    /// `/subscriptions/{id}/resourceGroups/{rg}`
    pub fn resource_group_path(&self, resource_group: &str) -> String {
        format!(
            "{}/resourceGroups/{}",
            self.subscription_path(),
            resource_group
        )
    }

    /// `/subscriptions/{id}/resourceGroups/{rg}/providers/{namespace}/{rest}`
    pub fn provider_path(&self, resource_group: &str, service: Service, rest: &str) -> String {
        format!(
            "{}/providers/{}/{}",
            self.resource_group_path(resource_group),
            service.namespace(),
            rest.trim_start_matches('/')
        )
    }

    /// `/subscriptions/{id}/providers/{namespace}/{rest}`
    pub fn subscription_provider_path(&self, service: Service, rest: &str) -> String {
        format!(
            "{}/providers/{}/{}",
            self.subscription_path(),
            service.namespace(),
            rest.trim_start_matches('/')
        )
    }

    /// Log an error the way every module reports service failures.
    pub fn log_cloud_error(&self, service: Service, err: AzureError) -> AzureError {
        let label = service.label();
        match self.log_level {
            Level::ERROR => error!("An Azure {} CloudError has occurred: {}", label, err),
            Level::WARN => warn!("An Azure {} CloudError has occurred: {}", label, err),
            Level::INFO => info!("An Azure {} CloudError has occurred: {}", label, err),
            Level::DEBUG => debug!("An Azure {} CloudError has occurred: {}", label, err),
            _ => trace!("An Azure {} CloudError has occurred: {}", label, err),
        }
        err
    }

    fn request(&self, service: Service, method: Method, path: &str) -> ArmRequest {
        ArmRequest::management(method, path, service.api_version())
    }

    /// Send a request and return the raw response, errors included.
    pub async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse> {
        self.client.send(request).await
    }

    /// Send a request, fail on non-2xx, and log failures.
    pub async fn call(&self, service: Service, request: ArmRequest) -> AzureResult<ArmResponse> {
        match self.client.send(request).await {
            Ok(response) => response
                .error_for_status()
                .map_err(|e| self.log_cloud_error(service, e)),
            Err(e) => Err(self.log_cloud_error(service, e)),
        }
    }

    /// Send a request and drive it through the long-running-operation poller.
    pub async fn call_lro(&self, service: Service, request: ArmRequest) -> AzureResult<Value> {
        let result = async {
            let initial = self.client.send(request.clone()).await?;
            poller::wait(self.client.as_ref(), &request, initial, self.poller).await
        }
        .await;
        result.map_err(|e| self.log_cloud_error(service, e))
    }

    /// GET a resource without normalization.
    pub async fn get_raw(&self, service: Service, path: &str) -> AzureResult<Value> {
        Ok(self
            .call(service, self.request(service, Method::Get, path))
            .await?
            .body)
    }

    /// GET a resource.
    pub async fn get(&self, service: Service, path: &str) -> AzureResult<Value> {
        let body = self.get_raw(service, path).await?;
        Ok(normalize::as_dict(body, service.flattens_properties()))
    }

    /// HEAD a resource; `true` when it exists.
    pub async fn head(&self, service: Service, path: &str) -> AzureResult<bool> {
        let response = self
            .client
            .send(self.request(service, Method::Head, path))
            .await
            .map_err(|e| self.log_cloud_error(service, e))?;
        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(self.log_cloud_error(
                service,
                AzureError::from_response(response.status, &response.body),
            )),
        }
    }

    /// PUT a resource and wait for it to be provisioned.
    pub async fn put(&self, service: Service, path: &str, body: Value) -> AzureResult<Value> {
        let result = self
            .call_lro(service, self.request(service, Method::Put, path).with_json(body))
            .await?;
        Ok(normalize::as_dict(result, service.flattens_properties()))
    }

    /// PATCH a resource and wait for the update.
    pub async fn patch(&self, service: Service, path: &str, body: Value) -> AzureResult<Value> {
        let result = self
            .call_lro(service, self.request(service, Method::Patch, path).with_json(body))
            .await?;
        Ok(normalize::as_dict(result, service.flattens_properties()))
    }

    /// POST an action.
    pub async fn post(
        &self,
        service: Service,
        path: &str,
        body: Option<Value>,
    ) -> AzureResult<Value> {
        let mut request = self.request(service, Method::Post, path);
        if let Some(body) = body {
            request = request.with_json(body);
        }
        let result = self.call_lro(service, request).await?;
        Ok(normalize::as_dict(result, service.flattens_properties()))
    }

    /// DELETE a resource and wait for it to be gone.
    pub async fn delete(&self, service: Service, path: &str) -> AzureResult<()> {
        self.call_lro(service, self.request(service, Method::Delete, path))
            .await
            .map(|_| ())
    }

    /// GET every page of a list operation.
    pub async fn list(&self, service: Service, path: &str) -> AzureResult<Vec<Value>> {
        self.list_with_query(service, path, &[]).await
    }

    pub async fn list_with_query(
        &self,
        service: Service,
        path: &str,
        query: &[(&str, &str)],
    ) -> AzureResult<Vec<Value>> {
        let mut request = self.request(service, Method::Get, path);
        for (k, v) in query {
            request = request.with_query(*k, *v);
        }
        let items = pager::collect(self.client.as_ref(), request)
            .await
            .map_err(|e| self.log_cloud_error(service, e))?;
        Ok(items
            .into_iter()
            .map(|item| normalize::as_dict(item, service.flattens_properties()))
            .collect())
    }

    /// List and key the result by resource name.
    pub async fn list_by_name(&self, service: Service, path: &str) -> AzureResult<Value> {
        Ok(normalize::keyed_by_name(self.list(service, path).await?))
    }

    /// Collect pages of a data-plane list request.
    pub async fn collect_pages(&self, service: Service, request: ArmRequest) -> AzureResult<Vec<Value>> {
        pager::collect(self.client.as_ref(), request)
            .await
            .map_err(|e| self.log_cloud_error(service, e))
    }
}

/// Trait implemented by every execution module.
#[async_trait]
pub trait ExecModule: Send + Sync {
    /// Registered name, e.g. `azurerm.network.virtual_network`.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Callable functions.
    fn functions(&self) -> &'static [&'static str];

    /// Run one function.
    async fn call(
        &self,
        function: &str,
        params: &ModuleParams,
        ctx: &ExecContext,
    ) -> AzureResult<Value>;
}

/// Error for a function name a module does not provide.
pub fn unknown_function(module: &str, function: &str) -> AzureError {
    AzureError::FunctionNotFound(format!("{}.{}", module, function))
}

/// Registry of execution modules.
pub struct ExecRegistry {
    modules: HashMap<String, Arc<dyn ExecModule>>,
}

impl ExecRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Resource manager
        registry.register(Arc::new(resource::group::ResourceGroupExec));
        registry.register(Arc::new(resource::management_lock::ManagementLockExec));
        registry.register(Arc::new(resource::policy::PolicyExec));
        registry.register(Arc::new(authorization::role::RoleExec));

        // Key Vault
        registry.register(Arc::new(keyvault::vault::VaultExec));
        registry.register(Arc::new(keyvault::secret::SecretExec));

        // Network
        registry.register(Arc::new(network::virtual_network::VirtualNetworkExec));
        registry.register(Arc::new(network::network_security_group::NetworkSecurityGroupExec));
        registry.register(Arc::new(network::public_ip_address::PublicIpAddressExec));

        // Storage
        registry.register(Arc::new(storage::account::StorageAccountExec));
        registry.register(Arc::new(storage::container::ContainerExec));

        // Compute
        registry.register(Arc::new(compute::availability_set::AvailabilitySetExec));
        registry.register(Arc::new(compute::disk::DiskExec));
        registry.register(Arc::new(compute::virtual_machine::VirtualMachineExec));

        // Platform services
        registry.register(Arc::new(redis::operations::RedisExec));
        registry.register(Arc::new(containerregistry::registry::RegistryExec));
        registry.register(Arc::new(containerregistry::replication::ReplicationExec));
        registry.register(Arc::new(web::app_service_plan::AppServicePlanExec));
        registry.register(Arc::new(web::app::WebAppExec));
        registry.register(Arc::new(application_insights::component::ComponentExec));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn ExecModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecModule>> {
        self.modules.get(name).cloned()
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Call `azurerm.<family>.<module>.<function>`.
    pub async fn call(
        &self,
        path: &str,
        params: &ModuleParams,
        ctx: &ExecContext,
    ) -> AzureResult<Value> {
        let (module_name, function) = path
            .rsplit_once('.')
            .ok_or_else(|| AzureError::FunctionNotFound(path.to_string()))?;
        let module = self
            .get(module_name)
            .ok_or_else(|| AzureError::FunctionNotFound(path.to_string()))?;
        debug!("Calling {}", path);
        module.call(function, params, ctx).await
    }
}

impl Default for ExecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Deserialize module parameters into a typed request.
pub fn parse_params<T: DeserializeOwned>(params: &ModuleParams) -> AzureResult<T> {
    let map: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(map))
        .map_err(|e| AzureError::InvalidParameter(e.to_string()))
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> AzureResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> AzureResult<String>;
    fn get_bool(&self, key: &str) -> AzureResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_i64(&self, key: &str) -> AzureResult<Option<i64>>;
    fn get_vec_string(&self, key: &str) -> AzureResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> AzureResult<Option<String>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string().trim_matches('"').to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> AzureResult<String> {
        self.get_string(key)?
            .ok_or_else(|| AzureError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> AzureResult<Option<bool>> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(AzureError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(AzureError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_i64(&self, key: &str) -> AzureResult<Option<i64>> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                AzureError::InvalidParameter(format!("{} must be an integer", key))
            }),
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| AzureError::InvalidParameter(format!("{} must be an integer", key))),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(AzureError::InvalidParameter(format!(
                "{} must be an integer",
                key
            ))),
        }
    }

    fn get_vec_string(&self, key: &str) -> AzureResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(Value::Array(arr)) => Ok(Some(
                arr.iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        v => v.to_string().trim_matches('"').to_string(),
                    })
                    .collect(),
            )),
            Some(Value::String(s)) => Ok(Some(
                s.split(',').map(|s| s.trim().to_string()).collect(),
            )),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(AzureError::InvalidParameter(format!(
                "{} must be a list",
                key
            ))),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_ext() {
        let p = params(json!({"name": "rg1", "count": "3", "enabled": "yes", "list": "a, b"}));
        assert_eq!(p.get_string_required("name").unwrap(), "rg1");
        assert_eq!(p.get_i64("count").unwrap(), Some(3));
        assert_eq!(p.get_bool("enabled").unwrap(), Some(true));
        assert_eq!(
            p.get_vec_string("list").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(matches!(
            p.get_string_required("missing"),
            Err(AzureError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_parse_params_reports_missing_field() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Req {
            name: String,
            location: String,
        }
        let err = parse_params::<Req>(&params(json!({"name": "x"}))).err().unwrap();
        assert!(err.to_string().contains("location"));
    }

    #[test]
    fn test_registry_names() {
        let registry = ExecRegistry::with_builtins();
        let names = registry.names();
        assert!(names.contains(&"azurerm.resource.group"));
        assert!(names.contains(&"azurerm.keyvault.secret"));
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_registry_call_unknown_function() {
        let (_fake, ctx) = context();
        let registry = ExecRegistry::with_builtins();
        let err = registry
            .call("azurerm.resource.group.explode", &ModuleParams::new(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AzureError::FunctionNotFound(_)));
    }

    #[tokio::test]
    async fn test_lro_put_is_normalized() {
        let (fake, ctx) = context();
        let path = ctx.provider_path("rg", Service::Network, "publicIPAddresses/ip1");
        let out = ctx
            .put(
                Service::Network,
                &path,
                json!({"location": "eastus", "properties": {"publicIPAllocationMethod": "Static"}}),
            )
            .await
            .unwrap();
        assert_eq!(out["public_ip_allocation_method"], "Static");
        assert_eq!(out["provisioning_state"], "Succeeded");
        assert!(fake.get(&path).is_some());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let (_fake, ctx) = context();
        let path = ctx.resource_group_path("missing");
        let err = ctx.get(Service::Resource, &path).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
