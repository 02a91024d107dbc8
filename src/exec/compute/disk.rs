//! Managed disks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{AzureError, AzureResult, Service};
use crate::exec::resource::group;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};

const SERVICE: Service = Service::Disks;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskParams {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: Option<String>,
    /// `Standard_LRS`, `Premium_LRS`, `StandardSSD_LRS`, `UltraSSD_LRS`, ...
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<i64>,
    /// `Empty`, `Copy`, `Import`, `FromImage`, ...
    #[serde(default = "default_create_option")]
    pub create_option: String,
    /// Disk or snapshot to copy from.
    #[serde(default)]
    pub source_resource_id: Option<String>,
    /// VHD blob to import.
    #[serde(default)]
    pub source_uri: Option<String>,
    /// Storage account holding `source_uri`.
    #[serde(default)]
    pub storage_account_id: Option<String>,
    /// `Windows` or `Linux`
    #[serde(default)]
    pub os_type: Option<String>,
    /// `AllowAll`, `AllowPrivate` or `DenyAll`
    #[serde(default)]
    pub network_access_policy: Option<String>,
    #[serde(default)]
    pub zones: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn default_create_option() -> String {
    "Empty".to_string()
}

impl Default for DiskParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            resource_group: String::new(),
            location: None,
            sku: None,
            disk_size_gb: None,
            create_option: default_create_option(),
            source_resource_id: None,
            source_uri: None,
            storage_account_id: None,
            os_type: None,
            network_access_policy: None,
            zones: None,
            tags: None,
        }
    }
}

impl DiskParams {
    /// An empty disk needs a size.
    pub fn validate(&self) -> Result<(), String> {
        if self.create_option.eq_ignore_ascii_case("empty") && self.disk_size_gb.is_none() {
            return Err("The disk_size_gb parameter is required for an empty disk.".to_string());
        }
        Ok(())
    }
}

fn path(ctx: &ExecContext, resource_group: &str, name: &str) -> String {
    ctx.provider_path(resource_group, SERVICE, &format!("disks/{}", name))
}

pub async fn create_or_update(ctx: &ExecContext, params: &DiskParams) -> AzureResult<Value> {
    params.validate().map_err(AzureError::InvalidParameter)?;
    let location =
        group::location_or_default(ctx, params.location.as_deref(), &params.resource_group).await?;

    let mut creation = Map::new();
    creation.insert("createOption".into(), json!(params.create_option));
    if let Some(ref id) = params.source_resource_id {
        creation.insert("sourceResourceId".into(), json!(id));
    }
    if let Some(ref uri) = params.source_uri {
        creation.insert("sourceUri".into(), json!(uri));
    }
    if let Some(ref account) = params.storage_account_id {
        creation.insert("storageAccountId".into(), json!(account));
    }

    let mut properties = Map::new();
    properties.insert("creationData".into(), Value::Object(creation));
    if let Some(size) = params.disk_size_gb {
        properties.insert("diskSizeGB".into(), json!(size));
    }
    if let Some(ref os) = params.os_type {
        properties.insert("osType".into(), json!(os));
    }
    if let Some(ref policy) = params.network_access_policy {
        properties.insert("networkAccessPolicy".into(), json!(policy));
    }

    let mut body = json!({"location": location, "properties": properties});
    if let Some(ref sku) = params.sku {
        body["sku"] = json!({ "name": sku });
    }
    if let Some(ref zones) = params.zones {
        body["zones"] = json!(zones);
    }
    if let Some(ref tags) = params.tags {
        body["tags"] = serde_json::to_value(tags)?;
    }
    ctx.put(SERVICE, &path(ctx, &params.resource_group, &params.name), body)
        .await
}

pub async fn get(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn delete(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &path(ctx, resource_group, name)).await
}

pub async fn list(ctx: &ExecContext, resource_group: Option<&str>) -> AzureResult<Value> {
    let path = match resource_group {
        Some(rg) => ctx.provider_path(rg, SERVICE, "disks"),
        None => ctx.subscription_provider_path(SERVICE, "disks"),
    };
    ctx.list_by_name(SERVICE, &path).await
}

/// Grant SAS access to the disk for `duration` seconds; `access` is `Read`
/// or `Write`. Returns the `access_sas` URL.
pub async fn grant_access(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    access: &str,
    duration: i64,
) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &format!("{}/beginGetAccess", path(ctx, resource_group, name)),
        Some(json!({"access": access, "durationInSeconds": duration})),
    )
    .await
}

pub async fn revoke_access(ctx: &ExecContext, name: &str, resource_group: &str) -> AzureResult<()> {
    ctx.post(SERVICE, &format!("{}/endGetAccess", path(ctx, resource_group, name)), None)
        .await
        .map(|_| ())
}

pub struct DiskExec;

#[async_trait]
impl ExecModule for DiskExec {
    fn name(&self) -> &'static str {
        "azurerm.compute.disk"
    }

    fn description(&self) -> &'static str {
        "Manage managed disks"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["create_or_update", "get", "delete", "list", "grant_access", "revoke_access"]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create_or_update" => create_or_update(ctx, &parse_params(params)?).await,
            "get" => get(ctx, &name()?, &resource_group()?).await,
            "delete" => {
                delete(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "list" => list(ctx, params.get_string("resource_group")?.as_deref()).await,
            "grant_access" => {
                let duration = params
                    .get_i64("duration")?
                    .ok_or_else(|| AzureError::MissingParameter("duration".into()))?;
                grant_access(ctx, &name()?, &resource_group()?, &params.get_string_required("access")?, duration)
                    .await
            }
            "revoke_access" => {
                revoke_access(ctx, &name()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            other => Err(unknown_function(self.name(), other)),
        }
    }
}
