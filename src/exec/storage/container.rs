//! Blob containers, plus blob upload and listing through an account SAS.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::client::{ArmRequest, Audience, AzureError, AzureResult, Method, Service};
use crate::exec::storage::account;
use crate::exec::storage::sas::AccountSas;
use crate::exec::{parse_params, unknown_function, ExecContext, ExecModule, ModuleParams, ParamExt};
use crate::normalize;

const SERVICE: Service = Service::Storage;

/// Lifetime of the SAS used for data-plane calls.
const SAS_LIFETIME_DAYS: i64 = 2;


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerParams {
    pub name: String,
    pub account: String,
    pub resource_group: String,
    /// `Container`, `Blob` or `None`
    #[serde(default)]
    pub public_access: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub default_encryption_scope: Option<String>,
    #[serde(default)]
    pub deny_encryption_scope_override: Option<bool>,
}

impl ContainerParams {
    fn body(&self) -> AzureResult<Value> {
        let mut properties = Map::new();
        if let Some(ref access) = self.public_access {
            properties.insert("publicAccess".into(), json!(access));
        }
        if let Some(ref metadata) = self.metadata {
            properties.insert("metadata".into(), serde_json::to_value(metadata)?);
        }
        if let Some(ref scope) = self.default_encryption_scope {
            properties.insert("defaultEncryptionScope".into(), json!(scope));
        }
        if let Some(deny) = self.deny_encryption_scope_override {
            properties.insert("denyEncryptionScopeOverride".into(), json!(deny));
        }
        Ok(json!({ "properties": properties }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBlobParams {
    pub name: String,
    pub container: String,
    pub account: String,
    pub resource_group: String,
    pub file_path: PathBuf,
    /// `BlockBlob` or `AppendBlob`
    #[serde(default = "default_blob_type")]
    pub blob_type: String,
    #[serde(default)]
    pub overwrite: bool,
}

fn default_blob_type() -> String {
    "BlockBlob".to_string()
}

fn container_path(ctx: &ExecContext, resource_group: &str, account: &str, name: &str) -> String {
    ctx.provider_path(
        resource_group,
        SERVICE,
        &format!("storageAccounts/{}/blobServices/default/containers/{}", account, name),
    )
}

fn policy_path(ctx: &ExecContext, resource_group: &str, account: &str, name: &str) -> String {
    format!(
        "{}/immutabilityPolicies/default",
        container_path(ctx, resource_group, account, name)
    )
}

pub async fn create(ctx: &ExecContext, params: &ContainerParams) -> AzureResult<Value> {
    ctx.put(
        SERVICE,
        &container_path(ctx, &params.resource_group, &params.account, &params.name),
        params.body()?,
    )
    .await
}

pub async fn update(ctx: &ExecContext, params: &ContainerParams) -> AzureResult<Value> {
    ctx.patch(
        SERVICE,
        &container_path(ctx, &params.resource_group, &params.account, &params.name),
        params.body()?,
    )
    .await
}

pub async fn get(ctx: &ExecContext, name: &str, account: &str, resource_group: &str) -> AzureResult<Value> {
    ctx.get(SERVICE, &container_path(ctx, resource_group, account, name))
        .await
}

pub async fn delete(ctx: &ExecContext, name: &str, account: &str, resource_group: &str) -> AzureResult<()> {
    ctx.delete(SERVICE, &container_path(ctx, resource_group, account, name))
        .await
}

pub async fn list(ctx: &ExecContext, account: &str, resource_group: &str) -> AzureResult<Value> {
    let path = ctx.provider_path(
        resource_group,
        SERVICE,
        &format!("storageAccounts/{}/blobServices/default/containers", account),
    );
    ctx.list_by_name(SERVICE, &path).await
}

async fn legal_hold(
    ctx: &ExecContext,
    action: &str,
    name: &str,
    account: &str,
    resource_group: &str,
    tags: &[String],
) -> AzureResult<Value> {
    ctx.post(
        SERVICE,
        &format!("{}/{}", container_path(ctx, resource_group, account, name), action),
        Some(json!({ "tags": tags })),
    )
    .await
}

/// Add legal hold tags. Tags are idempotent.
pub async fn set_legal_hold(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
    tags: &[String],
) -> AzureResult<Value> {
    legal_hold(ctx, "setLegalHold", name, account, resource_group, tags).await
}

pub async fn clear_legal_hold(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
    tags: &[String],
) -> AzureResult<Value> {
    legal_hold(ctx, "clearLegalHold", name, account, resource_group, tags).await
}

pub async fn get_immutability_policy(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
) -> AzureResult<Value> {
    ctx.get(SERVICE, &policy_path(ctx, resource_group, account, name))
        .await
}

/// Create or update the unlocked time-based retention policy.
///
/// `if_match` is the policy etag; required by the service when updating.
pub async fn create_or_update_immutability_policy(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
    immutability_period: i64,
    allow_protected_append_writes: Option<bool>,
    if_match: Option<&str>,
) -> AzureResult<Value> {
    let mut properties = Map::new();
    properties.insert(
        "immutabilityPeriodSinceCreationInDays".into(),
        json!(immutability_period),
    );
    if let Some(allow) = allow_protected_append_writes {
        properties.insert("allowProtectedAppendWrites".into(), json!(allow));
    }
    let mut request = ArmRequest::management(
        Method::Put,
        policy_path(ctx, resource_group, account, name),
        SERVICE.api_version(),
    )
    .with_json(json!({ "properties": properties }));
    if let Some(etag) = if_match {
        request = request.with_header("If-Match", etag);
    }
    let result = ctx.call_lro(SERVICE, request).await?;
    Ok(normalize::as_dict(result, SERVICE.flattens_properties()))
}

/// Delete an unlocked immutability policy; `if_match` is its etag.
pub async fn delete_immutability_policy(
    ctx: &ExecContext,
    name: &str,
    account: &str,
    resource_group: &str,
    if_match: &str,
) -> AzureResult<()> {
    let request = ArmRequest::management(
        Method::Delete,
        policy_path(ctx, resource_group, account, name),
        SERVICE.api_version(),
    )
    .with_header("If-Match", if_match);
    ctx.call_lro(SERVICE, request).await.map(|_| ())
}

/// Data-plane URL of a container, and an account SAS query for it.
pub async fn signed_container_url(
    ctx: &ExecContext,
    account_name: &str,
    resource_group: &str,
    container: &str,
) -> AzureResult<(Url, String)> {
    account::get_properties(ctx, account_name, resource_group)
        .await
        .map_err(|err| match err {
            AzureError::NotFound { code, .. } => AzureError::NotFound {
                code,
                message: format!(
                    "The storage account {} does not exist within the specified resource group {}.",
                    account_name, resource_group
                ),
            },
            other => other,
        })?;
    let key = account::primary_key(ctx, account_name, resource_group).await?;
    let sas = AccountSas::blob_read_write(Duration::days(SAS_LIFETIME_DAYS)).sign(account_name, &key)?;
    let endpoint = format!("https://{}.blob.{}/", account_name, ctx.cloud().storage_suffix);
    let mut url = Url::parse(&endpoint)
        .map_err(|e| AzureError::InvalidParameter(format!("Invalid blob endpoint {}: {}", endpoint, e)))?;
    url.path_segments_mut()
        .map_err(|_| AzureError::InvalidParameter(format!("Invalid blob endpoint {}", endpoint)))?
        .pop_if_empty()
        .push(container);
    Ok((url, sas))
}

/// URL of a blob in a container. Each `/`-separated part of the name is
/// percent-encoded as one path segment.
pub fn blob_url(container_url: &Url, blob: &str) -> AzureResult<Url> {
    let mut url = container_url.clone();
    url.path_segments_mut()
        .map_err(|_| AzureError::InvalidParameter(format!("Invalid container URL {}", container_url)))?
        .extend(blob.split('/'));
    Ok(url)
}

/// `url` with the SAS as its query string.
pub fn signed_url(url: &Url, sas: &str) -> String {
    let mut url = url.clone();
    url.set_query(Some(sas));
    url.into()
}

fn data_request(method: Method, url: &Url, sas: &str) -> ArmRequest {
    ArmRequest::url(method, signed_url(url, sas))
        .with_header("x-ms-version", super::sas::SAS_VERSION)
        .with_audience(Audience::Anonymous)
}

/// Upload a local file as a blob.
pub async fn upload_blob(ctx: &ExecContext, params: &UploadBlobParams) -> AzureResult<Value> {
    let (container_url, sas) =
        signed_container_url(ctx, &params.account, &params.resource_group, &params.container).await?;
    let blob_url = blob_url(&container_url, &params.name)?;
    let data = tokio::fs::read(&params.file_path).await?;
    debug!("Uploading {} bytes to {}", data.len(), blob_url);

    let response = match params.blob_type.as_str() {
        "BlockBlob" => {
            let mut request = data_request(Method::Put, &blob_url, &sas)
                .with_header("x-ms-blob-type", "BlockBlob")
                .with_bytes(data);
            if !params.overwrite {
                request = request.with_header("If-None-Match", "*");
            }
            ctx.call(SERVICE, request).await?
        }
        "AppendBlob" => {
            let exists = ctx
                .send(data_request(Method::Head, &blob_url, &sas))
                .await?
                .is_success();
            if params.overwrite || !exists {
                let create = data_request(Method::Put, &blob_url, &sas)
                    .with_header("x-ms-blob-type", "AppendBlob");
                ctx.call(SERVICE, create).await?;
            }
            let append = data_request(Method::Put, &blob_url, &sas)
                .with_query("comp", "appendblock")
                .with_bytes(data);
            ctx.call(SERVICE, append).await?
        }
        other => {
            return Err(AzureError::InvalidParameter(format!(
                "Unsupported blob type {}; use BlockBlob or AppendBlob",
                other
            )))
        }
    };

    Ok(json!({
        "name": params.name,
        "container": params.container,
        "url": blob_url.as_str(),
        "etag": response.header("etag"),
        "last_modified": response.header("last-modified"),
    }))
}

/// One page of a List Blobs response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Parse one page of a List Blobs response into `out`, keyed by blob name.
///
/// Properties become snake_case keys of the blob; user metadata stays
/// verbatim under `metadata`. Returns the continuation marker, if any.
fn parse_blob_list(xml: &str, out: &mut Map<String, Value>) -> AzureResult<Option<String>> {
    let page: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| AzureError::InvalidParameter(format!("Malformed List Blobs response: {}", e)))?;

    for blob in page.blobs.items {
        let mut props: Map<String, Value> = blob
            .properties
            .into_iter()
            .map(|(key, value)| (normalize::to_snake(&key.replace('-', "")), json!(value)))
            .collect();
        props.insert("name".into(), json!(blob.name));
        if !blob.metadata.is_empty() {
            props.insert("metadata".into(), serde_json::to_value(blob.metadata)?);
        }
        out.insert(blob.name, Value::Object(props));
    }
    Ok(page.next_marker.filter(|m| !m.is_empty()))
}

/// List blobs in a container, following continuation markers.
pub async fn list_blobs(ctx: &ExecContext, name: &str, account_name: &str, resource_group: &str) -> AzureResult<Value> {
    let (url, sas) = signed_container_url(ctx, account_name, resource_group, name).await?;
    let mut blobs = Map::new();
    let mut marker: Option<String> = None;
    loop {
        let mut request = data_request(Method::Get, &url, &sas)
            .with_query("restype", "container")
            .with_query("comp", "list");
        if let Some(ref m) = marker {
            request = request.with_query("marker", m.as_str());
        }
        let response = ctx.call(SERVICE, request).await?;
        let xml = response.body.as_str().unwrap_or_default().to_string();
        marker = parse_blob_list(&xml, &mut blobs)?;
        if marker.is_none() {
            break;
        }
    }
    Ok(Value::Object(blobs))
}

fn legal_hold_tags(params: &ModuleParams) -> AzureResult<Vec<String>> {
    params
        .get_vec_string("tags")?
        .ok_or_else(|| AzureError::MissingParameter("tags".into()))
}

pub struct ContainerExec;

#[async_trait]
impl ExecModule for ContainerExec {
    fn name(&self) -> &'static str {
        "azurerm.storage.container"
    }

    fn description(&self) -> &'static str {
        "Manage blob containers and upload blobs"
    }

    fn functions(&self) -> &'static [&'static str] {
        &[
            "create",
            "get",
            "update",
            "delete",
            "list",
            "set_legal_hold",
            "clear_legal_hold",
            "get_immutability_policy",
            "create_or_update_immutability_policy",
            "delete_immutability_policy",
            "upload_blob",
            "list_blobs",
        ]
    }

    async fn call(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<Value> {
        let name = || params.get_string_required("name");
        let account = || params.get_string_required("account");
        let resource_group = || params.get_string_required("resource_group");
        match function {
            "create" => create(ctx, &parse_params(params)?).await,
            "update" => update(ctx, &parse_params(params)?).await,
            "get" => get(ctx, &name()?, &account()?, &resource_group()?).await,
            "delete" => {
                delete(ctx, &name()?, &account()?, &resource_group()?).await?;
                Ok(json!(true))
            }
            "list" => list(ctx, &account()?, &resource_group()?).await,
            "set_legal_hold" => {
                set_legal_hold(ctx, &name()?, &account()?, &resource_group()?, &legal_hold_tags(params)?).await
            }
            "clear_legal_hold" => {
                clear_legal_hold(ctx, &name()?, &account()?, &resource_group()?, &legal_hold_tags(params)?).await
            }
            "get_immutability_policy" => {
                get_immutability_policy(ctx, &name()?, &account()?, &resource_group()?).await
            }
            "create_or_update_immutability_policy" => {
                let period = params
                    .get_i64("immutability_period")?
                    .ok_or_else(|| AzureError::MissingParameter("immutability_period".into()))?;
                create_or_update_immutability_policy(
                    ctx,
                    &name()?,
                    &account()?,
                    &resource_group()?,
                    period,
                    params.get_bool("allow_protected_append_writes")?,
                    params.get_string("if_match")?.as_deref(),
                )
                .await
            }
            "delete_immutability_policy" => {
                delete_immutability_policy(
                    ctx,
                    &name()?,
                    &account()?,
                    &resource_group()?,
                    &params.get_string_required("if_match")?,
                )
                .await?;
                Ok(json!(true))
            }
            "upload_blob" => upload_blob(ctx, &parse_params(params)?).await,
            "list_blobs" => list_blobs(ctx, &name()?, &account()?, &resource_group()?).await,
            other => Err(unknown_function(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ArmResponse, Body};
    use crate::exec::testing::{context, params};
    use base64::Engine;
    use std::io::Write;

    const LIST_PAGE_1: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="https://acct1.blob.core.windows.net/releases">
  <Blobs>
    <Blob><Name>app-1.zip</Name><Properties><Last-Modified>Mon, 01 Jan 2024 00:00:00 GMT</Last-Modified><Content-Length>42</Content-Length><BlobType>BlockBlob</BlobType></Properties></Blob>
  </Blobs>
  <NextMarker>page2</NextMarker>
</EnumerationResults>"#;

    const LIST_PAGE_2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults><Blobs><Blob><Name>app-2.zip</Name><Properties><Content-Length>7</Content-Length></Properties></Blob></Blobs><NextMarker /></EnumerationResults>"#;

    fn storage_account(fake: &crate::client::fake::FakeArm, ctx: &ExecContext) {
        let account = ctx.provider_path("rg1", SERVICE, "storageAccounts/acct1");
        fake.insert(&account, json!({"location": "eastus", "kind": "StorageV2"}));
        let key = base64::engine::general_purpose::STANDARD.encode(b"account-key");
        fake.respond(
            Method::Post,
            &format!("{}/listKeys", account),
            ArmResponse::new(200, json!({"keys": [{"keyName": "key1", "value": key}]})),
        );
    }

    #[test]
    fn test_parse_blob_list() {
        let mut blobs = Map::new();
        let marker = parse_blob_list(LIST_PAGE_1, &mut blobs).unwrap();
        assert_eq!(marker.as_deref(), Some("page2"));
        assert_eq!(blobs["app-1.zip"]["name"], "app-1.zip");
        assert_eq!(blobs["app-1.zip"]["content_length"], "42");
        assert_eq!(blobs["app-1.zip"]["blob_type"], "BlockBlob");
        assert_eq!(blobs["app-1.zip"]["last_modified"], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert_eq!(parse_blob_list(LIST_PAGE_2, &mut blobs).unwrap(), None);
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn test_parse_blob_list_decodes_entities() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults><Blobs><Blob><Name>a&amp;b.txt</Name><Properties><Content-Length>3</Content-Length></Properties></Blob></Blobs><NextMarker>n&lt;1</NextMarker></EnumerationResults>"#;
        let mut blobs = Map::new();
        let marker = parse_blob_list(xml, &mut blobs).unwrap();
        assert_eq!(marker.as_deref(), Some("n<1"));
        assert!(blobs.contains_key("a&b.txt"));
        assert_eq!(blobs["a&b.txt"]["name"], "a&b.txt");
    }

    #[test]
    fn test_metadata_does_not_shadow_properties() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults><Blobs><Blob><Name>c.txt</Name><Metadata><Content-Length>999</Content-Length><Name>other</Name></Metadata><Properties><Content-Length>5</Content-Length></Properties></Blob></Blobs></EnumerationResults>"#;
        let mut blobs = Map::new();
        parse_blob_list(xml, &mut blobs).unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs["c.txt"]["name"], "c.txt");
        assert_eq!(blobs["c.txt"]["content_length"], "5");
        assert_eq!(blobs["c.txt"]["metadata"]["Content-Length"], "999");
        assert_eq!(blobs["c.txt"]["metadata"]["Name"], "other");
    }

    #[test]
    fn test_blob_url_encodes_name() {
        let container = Url::parse("https://acct1.blob.core.windows.net/function-releases").unwrap();
        let url = blob_url(&container, "build#42.zip").unwrap();
        assert_eq!(url.path(), "/function-releases/build%2342.zip");
        assert_eq!(url.fragment(), None);

        let signed = Url::parse(&signed_url(&url, "sv=2019-12-12&sig=abc")).unwrap();
        assert_eq!(signed.path(), "/function-releases/build%2342.zip");
        assert_eq!(signed.query(), Some("sv=2019-12-12&sig=abc"));
        assert_eq!(signed.fragment(), None);

        let nested = blob_url(&container, "v1/app 100%.zip").unwrap();
        assert_eq!(nested.path(), "/function-releases/v1/app%20100%25.zip");
    }

    #[tokio::test]
    async fn test_list_blobs_follows_marker() {
        let (fake, ctx) = context();
        storage_account(&fake, &ctx);
        fake.respond_sequence(
            Method::Get,
            "https://acct1.blob.core.windows.net/releases",
            vec![
                ArmResponse::new(200, json!(LIST_PAGE_1)),
                ArmResponse::new(200, json!(LIST_PAGE_2)),
            ],
        );
        let blobs = list_blobs(&ctx, "releases", "acct1", "rg1").await.unwrap();
        assert_eq!(blobs.as_object().unwrap().len(), 2);

        let gets: Vec<_> = fake
            .sent(Method::Get)
            .into_iter()
            .filter(|r| r.target().contains("blob.core"))
            .collect();
        assert_eq!(gets.len(), 2);
        assert!(gets[1].query.contains(&("marker".to_string(), "page2".to_string())));
        assert_eq!(gets[0].audience, Audience::Anonymous);
    }

    #[tokio::test]
    async fn test_upload_block_blob() {
        let (fake, ctx) = context();
        storage_account(&fake, &ctx);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"zipdata").unwrap();

        let out = ContainerExec
            .call(
                "upload_blob",
                &params(json!({
                    "name": "app.zip",
                    "container": "releases",
                    "account": "acct1",
                    "resource_group": "rg1",
                    "file_path": file.path()
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["url"], "https://acct1.blob.core.windows.net/releases/app.zip");

        let put = fake
            .sent(Method::Put)
            .into_iter()
            .find(|r| r.target().contains("blob.core"))
            .unwrap();
        assert!(put.target().contains("?sv=2019-12-12&ss=b&srt=sco&sp=rwdl"));
        assert!(put.headers.contains(&("x-ms-blob-type".to_string(), "BlockBlob".to_string())));
        assert!(put.headers.contains(&("If-None-Match".to_string(), "*".to_string())));
        assert_eq!(put.body, Some(Body::Bytes(b"zipdata".to_vec())));
    }

    #[tokio::test]
    async fn test_upload_blob_name_with_hash() {
        let (fake, ctx) = context();
        storage_account(&fake, &ctx);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"zipdata").unwrap();

        let out = ContainerExec
            .call(
                "upload_blob",
                &params(json!({
                    "name": "build#42.zip",
                    "container": "releases",
                    "account": "acct1",
                    "resource_group": "rg1",
                    "file_path": file.path()
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["url"], "https://acct1.blob.core.windows.net/releases/build%2342.zip");

        let put = fake
            .sent(Method::Put)
            .into_iter()
            .find(|r| r.target().contains("blob.core"))
            .unwrap();
        let sent = Url::parse(put.target()).unwrap();
        assert_eq!(sent.path(), "/releases/build%2342.zip");
        assert!(sent.query().unwrap_or_default().contains("sig="));
        assert_eq!(sent.fragment(), None);
    }

    #[tokio::test]
    async fn test_upload_needs_existing_account() {
        let (_fake, ctx) = context();
        let p = UploadBlobParams {
            name: "a".into(),
            container: "c".into(),
            account: "missing".into(),
            resource_group: "rg1".into(),
            file_path: PathBuf::from("/nonexistent"),
            blob_type: default_blob_type(),
            overwrite: false,
        };
        let err = upload_blob(&ctx, &p).await.unwrap_err();
        assert!(err.to_string().contains("does not exist within the specified resource group"));
    }

    #[tokio::test]
    async fn test_immutability_policy_if_match() {
        let (fake, ctx) = context();
        create_or_update_immutability_policy(&ctx, "c1", "acct1", "rg1", 30, None, Some("\"etag1\""))
            .await
            .unwrap();
        let put = &fake.sent(Method::Put)[0];
        assert!(put.target().ends_with("containers/c1/immutabilityPolicies/default"));
        assert!(put.headers.contains(&("If-Match".to_string(), "\"etag1\"".to_string())));
    }
}
