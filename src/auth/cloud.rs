//! Azure cloud environments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::{AzureError, AzureResult};

/// Endpoints of one Azure cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEnvironment {
    pub name: String,
    /// Resource manager endpoint, no trailing slash.
    pub resource_manager: String,
    /// Active Directory authority host, no trailing slash.
    pub active_directory: String,
    /// Token audience for resource manager calls.
    pub management_audience: String,
    /// Token audience for Key Vault data-plane calls.
    pub key_vault_audience: String,
    /// DNS suffix of storage endpoints (`core.windows.net`).
    pub storage_suffix: String,
}

impl CloudEnvironment {
    fn known(
        name: &str,
        resource_manager: &str,
        active_directory: &str,
        management_audience: &str,
        key_vault_audience: &str,
        storage_suffix: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            resource_manager: resource_manager.to_string(),
            active_directory: active_directory.to_string(),
            management_audience: management_audience.to_string(),
            key_vault_audience: key_vault_audience.to_string(),
            storage_suffix: storage_suffix.to_string(),
        }
    }

    pub fn public() -> Self {
        Self::known(
            "AZURE_PUBLIC_CLOUD",
            "https://management.azure.com",
            "https://login.microsoftonline.com",
            "https://management.core.windows.net/",
            "https://vault.azure.net",
            "core.windows.net",
        )
    }

    pub fn china() -> Self {
        Self::known(
            "AZURE_CHINA_CLOUD",
            "https://management.chinacloudapi.cn",
            "https://login.chinacloudapi.cn",
            "https://management.core.chinacloudapi.cn/",
            "https://vault.azure.cn",
            "core.chinacloudapi.cn",
        )
    }

    pub fn us_government() -> Self {
        Self::known(
            "AZURE_US_GOV_CLOUD",
            "https://management.usgovcloudapi.net",
            "https://login.microsoftonline.us",
            "https://management.core.usgovcloudapi.net/",
            "https://vault.usgovcloudapi.net",
            "core.usgovcloudapi.net",
        )
    }

    pub fn german() -> Self {
        Self::known(
            "AZURE_GERMAN_CLOUD",
            "https://management.microsoftazure.de",
            "https://login.microsoftonline.de",
            "https://management.core.cloudapi.de/",
            "https://vault.microsoftazure.de",
            "core.cloudapi.de",
        )
    }

    /// Look up one of the well-known clouds by name.
    pub fn by_name(name: &str) -> AzureResult<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AZURE_PUBLIC_CLOUD" => Ok(Self::public()),
            "AZURE_CHINA_CLOUD" => Ok(Self::china()),
            "AZURE_US_GOV_CLOUD" => Ok(Self::us_government()),
            "AZURE_GERMAN_CLOUD" => Ok(Self::german()),
            _ => Err(AzureError::CloudEnvironment(name.to_string())),
        }
    }

    /// Resolve a `cloud_environment` setting.
    ///
    /// `None` is the public cloud. Names resolve from the table, URLs are
    /// read from the resource manager's metadata endpoint.
    pub async fn resolve(setting: Option<&str>, http: &reqwest::Client) -> AzureResult<Self> {
        match setting {
            None => Ok(Self::public()),
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => {
                Self::from_metadata_endpoint(s, http).await
            }
            Some(s) => Self::by_name(s),
        }
    }

    /// Fetch endpoints from `{url}/metadata/endpoints?api-version=2019-05-01`.
    pub async fn from_metadata_endpoint(url: &str, http: &reqwest::Client) -> AzureResult<Self> {
        let base = url.trim_end_matches('/');
        let metadata_url = format!("{}/metadata/endpoints?api-version=2019-05-01", base);
        debug!("Fetching cloud metadata from {}", metadata_url);

        let response = http
            .get(&metadata_url)
            .send()
            .await
            .map_err(|_| AzureError::CloudEnvironment(url.to_string()))?;
        if !response.status().is_success() {
            return Err(AzureError::CloudEnvironment(url.to_string()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|_| AzureError::CloudEnvironment(url.to_string()))?;

        Self::from_metadata(base, &body).ok_or_else(|| AzureError::CloudEnvironment(url.to_string()))
    }

    /// Build an environment from a metadata document.
    ///
    /// The document is either one cloud object or a list of them; in the
    /// list form the entry whose `resourceManager` matches `base` wins.
    pub fn from_metadata(base: &str, body: &Value) -> Option<Self> {
        let entry = match body {
            Value::Array(clouds) => clouds
                .iter()
                .find(|c| {
                    c.get("resourceManager")
                        .and_then(Value::as_str)
                        .map(|rm| rm.trim_end_matches('/').eq_ignore_ascii_case(base))
                        .unwrap_or(false)
                })
                .or_else(|| clouds.first())?,
            other => other,
        };

        let auth = entry.get("authentication")?;
        let login = auth.get("loginEndpoint")?.as_str()?;
        let audience = auth
            .get("audiences")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)?;
        let suffixes = entry.get("suffixes");
        let key_vault_dns = suffixes
            .and_then(|s| s.get("keyVaultDns"))
            .and_then(Value::as_str)
            .unwrap_or("vault.azure.net")
            .trim_start_matches('.');
        let storage = suffixes
            .and_then(|s| s.get("storage"))
            .and_then(Value::as_str)
            .unwrap_or("core.windows.net")
            .trim_start_matches('.');

        Some(Self {
            name: entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(base)
                .to_string(),
            resource_manager: entry
                .get("resourceManager")
                .and_then(Value::as_str)
                .unwrap_or(base)
                .trim_end_matches('/')
                .to_string(),
            active_directory: login.trim_end_matches('/').to_string(),
            management_audience: audience.to_string(),
            key_vault_audience: format!("https://{}", key_vault_dns),
            storage_suffix: storage.to_string(),
        })
    }
}

impl Default for CloudEnvironment {
    fn default() -> Self {
        Self::public()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_clouds() {
        assert_eq!(
            CloudEnvironment::by_name("azure_china_cloud").unwrap().resource_manager,
            "https://management.chinacloudapi.cn"
        );
        let err = CloudEnvironment::by_name("AZURE_MOON_CLOUD").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The Azure cloud environment AZURE_MOON_CLOUD is not available."
        );
    }

    #[test]
    fn test_from_metadata_list() {
        let body = json!([
            {
                "name": "AzureStackHub",
                "resourceManager": "https://management.local.azurestack.external/",
                "authentication": {
                    "loginEndpoint": "https://login.microsoftonline.com/",
                    "audiences": ["https://management.adfs.azurestack.local/abc"]
                },
                "suffixes": {"keyVaultDns": ".vault.local.azurestack.external", "storage": "local.azurestack.external"}
            }
        ]);
        let cloud =
            CloudEnvironment::from_metadata("https://management.local.azurestack.external", &body)
                .unwrap();
        assert_eq!(cloud.name, "AzureStackHub");
        assert_eq!(cloud.active_directory, "https://login.microsoftonline.com");
        assert_eq!(cloud.key_vault_audience, "https://vault.local.azurestack.external");
        assert_eq!(cloud.storage_suffix, "local.azurestack.external");
    }

    #[test]
    fn test_from_metadata_missing_authentication() {
        assert!(CloudEnvironment::from_metadata("https://x", &json!({"name": "x"})).is_none());
    }
}
