//! Function app state.
//!
//! A function app runs from a zip package kept in the `function-releases`
//! container of a storage account, on a consumption (`Y1`) plan. `present`
//! provisions what the app depends on, uploads the package and points the
//! app settings at it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::client::{AzureError, AzureResult};
use crate::exec::application_insights::component::{self, ComponentParams};
use crate::exec::storage::sas::without_query;
use crate::exec::storage::{account, container};
use crate::exec::web::app::{self, WebAppParams};
use crate::exec::web::app_service_plan::{self, AppServicePlanParams, PlanSku};
use crate::exec::{parse_params, unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::diff::{deep_diff, str_changed};
use crate::states::{ensure_absent, lookup, Action, StateModule, StateReturn};

const LABEL: &str = "function app";

/// Container the packages are uploaded to.
pub const RELEASES_CONTAINER: &str = "function-releases";

const RUN_FROM_PACKAGE: &str = "WEBSITE_RUN_FROM_PACKAGE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionAppParams {
    pub name: String,
    pub resource_group: String,
    /// Local zip file holding the functions.
    pub functions_file_path: PathBuf,
    /// `Linux` or `Windows`
    pub os_type: String,
    /// Worker runtime, e.g. `python`, `node`, `dotnet`.
    pub runtime_stack: String,
    pub storage_account: String,
    /// Defaults to `resource_group`.
    #[serde(default)]
    pub storage_rg: Option<String>,
    /// Defaults to `plan-{name}`.
    #[serde(default)]
    pub app_service_plan: Option<String>,
    #[serde(default = "default_functions_version")]
    pub functions_version: i64,
    #[serde(default)]
    pub enable_app_insights: bool,
    /// Defaults to `app-insights-{name}`.
    #[serde(default)]
    pub app_insights: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn default_functions_version() -> i64 {
    2
}

impl FunctionAppParams {
    fn is_linux(&self) -> bool {
        !self.os_type.eq_ignore_ascii_case("windows")
    }

    fn storage_rg(&self) -> &str {
        self.storage_rg.as_deref().unwrap_or(&self.resource_group)
    }

    fn plan_name(&self) -> String {
        self.app_service_plan
            .clone()
            .unwrap_or_else(|| format!("plan-{}", self.name))
    }

    fn insights_name(&self) -> String {
        self.app_insights
            .clone()
            .unwrap_or_else(|| format!("app-insights-{}", self.name))
    }

    fn kind(&self) -> &'static str {
        if self.is_linux() {
            "functionapp,Linux"
        } else {
            "functionapp"
        }
    }

    /// File name of the package, when it is a zip.
    fn package_name(&self) -> Option<String> {
        let name = Path::new(&self.functions_file_path)
            .file_name()?
            .to_string_lossy()
            .into_owned();
        name.to_ascii_lowercase().ends_with(".zip").then_some(name)
    }
}

/// Why preparing a deployment stopped.
enum Halt {
    /// Report the state as failed with this comment.
    Fail(String),
    Error(AzureError),
}

impl From<AzureError> for Halt {
    fn from(err: AzureError) -> Self {
        Halt::Error(err)
    }
}

fn halt(comment: String) -> Halt {
    error!("{}", comment);
    Halt::Fail(comment)
}

/// Everything the site is configured from.
struct Deployment {
    server_farm_id: String,
    /// Ordered name/value app settings.
    settings: Vec<(String, String)>,
}

impl Deployment {
    fn settings_list(&self) -> Value {
        Value::Array(
            self.settings
                .iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect(),
        )
    }

    fn settings_map(&self) -> Map<String, Value> {
        self.settings
            .iter()
            .map(|(name, value)| (name.clone(), json!(value)))
            .collect()
    }
}

/// Plan the app runs on; created unless it exists. An existing plan must
/// host the same OS.
async fn ensure_plan(ctx: &ExecContext, params: &FunctionAppParams) -> Result<String, Halt> {
    let plan_name = params.plan_name();
    let reserved = params.is_linux();
    match lookup(app_service_plan::get(&ctx.quiet(), &plan_name, &params.resource_group)).await? {
        Some(plan) => {
            let plan_reserved = plan.get("reserved").and_then(Value::as_bool).unwrap_or(false);
            if plan_reserved != reserved {
                return Err(halt(format!(
                    "The OS of the App Service Plan {} does not match the specified OS type for the Function App and thus cannot be used.",
                    plan_name
                )));
            }
            Ok(plan
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| app_service_plan::id(ctx, &params.resource_group, &plan_name)))
        }
        None if ctx.test => Ok(app_service_plan::id(ctx, &params.resource_group, &plan_name)),
        None => {
            let plan = AppServicePlanParams {
                name: plan_name.clone(),
                resource_group: params.resource_group.clone(),
                kind: "functionapp".to_string(),
                sku: PlanSku::Name("Y1".to_string()),
                reserved: Some(reserved),
                location: params.location.clone(),
                tags: None,
            };
            let created = app_service_plan::create_or_update(ctx, &plan).await.map_err(|_| {
                halt(format!(
                    "Unable to create the App Service Plan {} in the resource group {}.",
                    plan_name, params.resource_group
                ))
            })?;
            Ok(created
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| app_service_plan::id(ctx, &params.resource_group, &plan_name)))
        }
    }
}

/// Instrumentation key of the app's Application Insights component,
/// creating the component when missing.
async fn ensure_insights(ctx: &ExecContext, params: &FunctionAppParams) -> Result<Option<String>, Halt> {
    let name = params.insights_name();
    let existing = lookup(component::get(&ctx.quiet(), &name, &params.resource_group)).await?;
    let component = match existing {
        Some(component) => component,
        None if ctx.test => return Ok(None),
        None => {
            let wanted = ComponentParams {
                name: name.clone(),
                resource_group: params.resource_group.clone(),
                kind: "web".to_string(),
                application_type: "web".to_string(),
                location: params.location.clone(),
                ..Default::default()
            };
            component::create_or_update(ctx, &wanted).await.map_err(|_| {
                halt(format!(
                    "Unable to create the Application Insights Component {} within the resource group {}.",
                    name, params.resource_group
                ))
            })?
        }
    };
    let key = component
        .get("instrumentation_key")
        .and_then(Value::as_str)
        .map(String::from);
    if key.is_none() {
        warn!("Application Insights Component {} has no instrumentation key", name);
    }
    Ok(key)
}

/// Upload the package to the releases container.
async fn upload_package(ctx: &ExecContext, params: &FunctionAppParams, package: &str) -> Result<(), Halt> {
    let storage_rg = params.storage_rg();
    let releases = lookup(container::get(
        &ctx.quiet(),
        RELEASES_CONTAINER,
        &params.storage_account,
        storage_rg,
    ))
    .await?;
    if releases.is_none() {
        let wanted = container::ContainerParams {
            name: RELEASES_CONTAINER.to_string(),
            account: params.storage_account.clone(),
            resource_group: storage_rg.to_string(),
            public_access: Some("None".to_string()),
            ..Default::default()
        };
        container::create(ctx, &wanted).await?;
    }

    let upload = container::UploadBlobParams {
        name: package.to_string(),
        container: RELEASES_CONTAINER.to_string(),
        account: params.storage_account.clone(),
        resource_group: storage_rg.to_string(),
        file_path: params.functions_file_path.clone(),
        blob_type: "BlockBlob".to_string(),
        overwrite: true,
    };
    container::upload_blob(ctx, &upload).await.map_err(|err| {
        error!("Package upload failed: {}", err);
        halt(format!(
            "Unable to upload {} to the {} container within the storage account {}.",
            package, RELEASES_CONTAINER, params.storage_account
        ))
    })?;
    Ok(())
}

/// Provision the dependencies and build the app settings. Test mode only
/// reads.
async fn prepare(ctx: &ExecContext, params: &FunctionAppParams) -> Result<Deployment, Halt> {
    let package = params.package_name().ok_or_else(|| {
        halt("The specified file in functions_file_path is not a compressed (zip) file.".to_string())
    })?;

    let storage_rg = params.storage_rg();
    if lookup(account::get_properties(&ctx.quiet(), &params.storage_account, storage_rg))
        .await?
        .is_none()
    {
        return Err(halt(format!(
            "The storage account {} does not exist within the given resource group {}.",
            params.storage_account, storage_rg
        )));
    }

    let server_farm_id = ensure_plan(ctx, params).await?;

    let mut settings = vec![
        ("FUNCTIONS_WORKER_RUNTIME".to_string(), params.runtime_stack.to_ascii_lowercase()),
        ("FUNCTIONS_EXTENSION_VERSION".to_string(), format!("~{}", params.functions_version)),
        ("FUNCTION_APP_EDIT_MODE".to_string(), "readonly".to_string()),
        ("SCM_DO_BUILD_DURING_DEPLOYMENT".to_string(), "false".to_string()),
    ];

    if params.enable_app_insights {
        if let Some(key) = ensure_insights(ctx, params).await? {
            settings.push(("APPINSIGHTS_INSTRUMENTATIONKEY".to_string(), key));
        }
    }

    if !ctx.test {
        upload_package(ctx, params, &package).await?;
    }

    let key = account::primary_key(ctx, &params.storage_account, storage_rg)
        .await
        .map_err(|err| match err {
            AzureError::InvalidParameter(message) => halt(message),
            other => Halt::Error(other),
        })?;
    let (container_url, sas) =
        container::signed_container_url(ctx, &params.storage_account, storage_rg, RELEASES_CONTAINER).await?;

    let connection = format!(
        "DefaultEndpointsProtocol=https;AccountName={};AccountKey={};EndpointSuffix={}",
        params.storage_account,
        key,
        ctx.cloud().storage_suffix
    );
    settings.push(("AzureWebJobsStorage".to_string(), connection.clone()));
    let package_url = container::blob_url(&container_url, &package)?;
    settings.push((RUN_FROM_PACKAGE.to_string(), container::signed_url(&package_url, &sas)));
    if !params.is_linux() {
        settings.push(("WEBSITE_CONTENTAZUREFILECONNECTIONSTRING".to_string(), connection));
        settings.push(("WEBSITE_CONTENTSHARE".to_string(), params.name.to_ascii_lowercase()));
    }

    Ok(Deployment {
        server_farm_id,
        settings,
    })
}

/// Diff current app settings against the wanted ones. The package URL
/// carries a fresh SAS on every run, so it is compared without its query.
fn settings_diff(old: &Value, new: Map<String, Value>) -> Option<Value> {
    let mut old = old.as_object().cloned().unwrap_or_default();
    let mut new = new;
    let old_package = old.remove(RUN_FROM_PACKAGE);
    let new_package = new.remove(RUN_FROM_PACKAGE);
    let old_url = old_package.as_ref().and_then(Value::as_str).unwrap_or_default();
    let new_url = new_package.as_ref().and_then(Value::as_str).unwrap_or_default();
    if without_query(old_url) != without_query(new_url) {
        old.insert(RUN_FROM_PACKAGE.to_string(), json!(old_url));
        new.insert(RUN_FROM_PACKAGE.to_string(), json!(new_url));
    }
    deep_diff(&Value::Object(old), &Value::Object(new))
}

/// Ensure a function app runs the given package.
pub async fn present(ctx: &ExecContext, params: &FunctionAppParams) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(&params.name);

    let deployment = match prepare(ctx, params).await {
        Ok(deployment) => deployment,
        Err(Halt::Fail(comment)) => return Ok(ret.fail(comment)),
        Err(Halt::Error(err)) => return Err(err),
    };

    let existing = lookup(app::get(&ctx.quiet(), &params.name, &params.resource_group)).await?;
    let action = match existing {
        Some(site) => {
            let old_tags = site.get("tags").cloned().unwrap_or_else(|| json!({}));
            let new_tags = serde_json::to_value(params.tags.clone().unwrap_or_default())?;
            ret.change_if("tags", deep_diff(&old_tags, &new_tags));

            let old_farm = site.get("server_farm_id").and_then(Value::as_str);
            if str_changed(old_farm, Some(&deployment.server_farm_id)) {
                ret.change(
                    "server_farm_id",
                    json!({"old": old_farm, "new": deployment.server_farm_id}),
                );
            }

            let old_settings = app::list_application_settings(ctx, &params.name, &params.resource_group).await?;
            if let Some(diff) = settings_diff(&old_settings, deployment.settings_map()) {
                ret.change("site_config", json!({ "app_settings": diff }));
            }

            if !ret.has_changes() {
                return Ok(ret.already_present(LABEL));
            }
            Action::Update
        }
        None => {
            let mut new = json!({
                "name": params.name,
                "resource_group": params.resource_group,
                "app_service_plan": params.plan_name(),
                "os_type": params.os_type,
                "runtime_stack": params.runtime_stack,
                "site_config": {"app_settings": deployment.settings_list()},
                "tags": params.tags,
            });
            if params.enable_app_insights {
                new["application_insights"] = json!(params.insights_name());
            }
            ret.set_old_new(json!({}), new);
            Action::Create
        }
    };

    if ctx.test {
        return Ok(ret.would(LABEL, action));
    }

    let mut site_config = Map::new();
    site_config.insert("app_settings".into(), deployment.settings_list());
    let site = WebAppParams {
        name: params.name.clone(),
        resource_group: params.resource_group.clone(),
        kind: Some(params.kind().to_string()),
        server_farm_id: Some(deployment.server_farm_id.clone()),
        site_config: Some(site_config),
        https_only: None,
        location: params.location.clone(),
        tags: params.tags.clone(),
    };
    let result = app::create_or_update(ctx, &site).await;
    Ok(ret.finish(LABEL, action, result))
}

pub async fn absent(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<StateReturn> {
    let existing = lookup(app::get(&ctx.quiet(), name, resource_group)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || {
        app::delete(ctx, name, resource_group, None, None)
    })
    .await)
}

pub struct FunctionAppState;

#[async_trait]
impl StateModule for FunctionAppState {
    fn name(&self) -> &'static str {
        "azurerm.web.function_app"
    }

    fn description(&self) -> &'static str {
        "Ensure function apps are deployed or absent"
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
                    &params.get_string_required("resource_group")?,
                )
                .await
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
