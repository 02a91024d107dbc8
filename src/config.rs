//! Configuration for azrm
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/azrm/azrm.toml)
//! - User configuration (~/.azrm.toml)
//! - Project configuration (./azrm.toml)
//! - Environment variables
//!
//! Later files override earlier ones key by key. An explicit path (from
//! `--config` or `AZRM_CONFIG`) replaces the standard locations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acct::Profile;
use crate::client::http::HttpClientConfig;
use crate::client::PollerConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,

    /// Account profiles and the Key Vault backend
    pub acct: AcctConfig,

    pub logging: LoggingConfig,
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Profile used when none is named
    pub profile: String,

    /// Cloud name (`AZURE_PUBLIC_CLOUD`, ...) or metadata endpoint URL
    pub cloud_environment: Option<String>,

    /// Timeout of a single HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Delay between polls of a long-running operation
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Give up on a long-running operation after this long
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Retries of throttled (429) and 5xx requests
    pub max_retries: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            profile: "default".to_string(),
            cloud_environment: None,
            request_timeout: Duration::from_secs(120),
            poll_interval: poller.interval,
            poll_timeout: poller.timeout,
            max_retries: RetryPolicy::default().max_retries,
        }
    }
}

/// Account settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcctConfig {
    /// Profiles by name
    pub profiles: BTreeMap<String, Profile>,

    /// Read further profiles from Key Vault secrets
    pub keyvault: Option<KeyVaultBackendConfig>,
}

/// Key Vault acct backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyVaultBackendConfig {
    /// e.g. `https://myvault.vault.azure.net`
    pub vault_url: String,

    /// Prefix of the secret names to read
    #[serde(default = "default_designator")]
    pub designator: String,

    /// Provider whose profiles are used
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Credentials used to read the vault
    #[serde(flatten)]
    pub credentials: Profile,
}

fn default_designator() -> String {
    crate::acct::keyvault::DEFAULT_DESIGNATOR.to_string()
}

fn default_provider() -> String {
    "azurerm".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `azrm=debug`); `RUST_LOG` and `-v` win
    pub level: Option<String>,

    pub format: LogFormat,
}

/// Deep-merge `other` into `base`; objects merge key by key, anything else
/// is replaced.
fn merge_values(base: &mut Value, other: Value) {
    match (base, other) {
        (Value::Object(base), Value::Object(other)) => {
            for (key, value) in other {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, other) => *base = other,
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("AZRM_CONFIG").ok().map(PathBuf::from);
        let explicit = config_path.map(Path::to_path_buf).or(env_path);
        if let Some(ref path) = explicit {
            if !path.exists() {
                return Err(Error::config_load(path, "file does not exist"));
            }
        }
        let mut config = Self::load_files(&Self::get_config_paths(explicit.as_deref()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        let mut paths = vec![PathBuf::from("/etc/azrm/azrm.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".azrm.toml"));
        }
        paths.push(PathBuf::from("azrm.toml"));
        paths
    }

    /// Merge the files that exist, in order.
    pub fn load_files(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        for path in paths.iter().filter(|p| p.exists()) {
            merge_values(&mut merged, Self::read_file(path)?);
        }
        serde_json::from_value(merged).map_err(|e| Error::ConfigInvalid(e.to_string()))
    }

    /// Parse one file into a generic value, by extension.
    fn read_file(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_load(path, e.to_string()))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let parsed = match extension {
            "yml" | "yaml" => serde_yaml::from_str::<Value>(&content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str::<Value>(&content).map_err(|e| e.to_string()),
            _ => toml::from_str::<Value>(&content).map_err(|e| e.to_string()),
        };
        let value = parsed.map_err(|message| Error::config_load(path, message))?;
        // An empty YAML document is null.
        Ok(if value.is_null() { Value::Object(Default::default()) } else { value })
    }

    /// Apply environment variable overrides. `AZRM_PROFILE` selects the
    /// profile the `AZURE_*` credentials are applied to.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(profile) = var("AZRM_PROFILE") {
            self.defaults.profile = profile;
        }

        let overrides = Profile {
            subscription_id: var("AZURE_SUBSCRIPTION_ID"),
            tenant: var("AZURE_TENANT_ID"),
            client_id: var("AZURE_CLIENT_ID"),
            secret: var("AZURE_CLIENT_SECRET"),
            username: None,
            password: None,
            cloud_environment: var("AZURE_CLOUD_ENVIRONMENT"),
        };
        if !overrides.is_empty() {
            self.acct
                .profiles
                .entry(self.defaults.profile.clone())
                .or_default()
                .merge(&overrides);
        }
    }

    /// The named profile, or the default one.
    pub fn profile(&self, name: Option<&str>) -> Result<Profile> {
        let name = name.unwrap_or(&self.defaults.profile);
        self.acct
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.acct.profiles.keys().map(String::as_str).collect()
    }

    /// Add profiles read from a backend; configured profiles win key by key.
    pub fn add_profiles(&mut self, profiles: BTreeMap<String, Profile>) {
        for (name, profile) in profiles {
            let entry = self.acct.profiles.entry(name).or_default();
            let mut merged = profile;
            merged.merge(entry);
            *entry = merged;
        }
    }

    /// Cloud setting for a profile: the profile's own, else the default.
    pub fn cloud_for<'a>(&'a self, profile: &'a Profile) -> Option<&'a str> {
        profile
            .cloud_environment
            .as_deref()
            .or(self.defaults.cloud_environment.as_deref())
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: self.defaults.poll_interval,
            timeout: self.defaults.poll_timeout,
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.defaults.request_timeout,
            retry: RetryPolicy {
                max_retries: self.defaults.max_retries,
                ..RetryPolicy::default()
            },
            ..HttpClientConfig::default()
        }
    }
}
