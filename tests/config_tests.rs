//! Integration tests for the azrm configuration system
//!
//! These tests verify:
//! - Loading configuration from TOML, YAML, and JSON files
//! - Merging several files, later ones winning key by key
//! - Environment variable overrides
//! - Error handling for missing and malformed files

use azrm::config::{Config, LogFormat};
use azrm::error::Error;
use serial_test::serial;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const ENV_VARS: &[&str] = &[
    "AZRM_CONFIG",
    "AZRM_PROFILE",
    "AZURE_SUBSCRIPTION_ID",
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_CLOUD_ENVIRONMENT",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

// ============================================================================
// File formats
// ============================================================================

#[test]
#[serial]
fn test_load_toml() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.toml");
    std::fs::write(
        &path,
        r#"
[defaults]
profile = "prod"
poll_interval = "2s"
request_timeout = "1m"

[acct.profiles.prod]
subscription_id = "sub-prod"
client_id = "app"
secret = "s3cret"
tenant = "tenant"

[logging]
level = "azrm=debug"
format = "json"
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.defaults.profile, "prod");
    assert_eq!(config.defaults.poll_interval, Duration::from_secs(2));
    assert_eq!(config.defaults.request_timeout, Duration::from_secs(60));
    // Untouched defaults survive.
    assert_eq!(config.defaults.max_retries, 3);
    assert_eq!(config.logging.format, LogFormat::Json);

    let profile = config.profile(None).unwrap();
    assert_eq!(profile.subscription_id.as_deref(), Some("sub-prod"));
    assert_eq!(profile.secret.as_deref(), Some("s3cret"));
}

#[test]
#[serial]
fn test_load_yaml() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.yaml");
    std::fs::write(
        &path,
        r#"
defaults:
  cloud_environment: AZURE_US_GOV_CLOUD
acct:
  profiles:
    default:
      subscription_id: sub1
      username: user@example.com
      password: pw
  keyvault:
    vault_url: https://kv1.vault.azure.net
    subscription_id: sub-vault
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(
        config.defaults.cloud_environment.as_deref(),
        Some("AZURE_US_GOV_CLOUD")
    );
    let backend = config.acct.keyvault.as_ref().unwrap();
    assert_eq!(backend.designator, "acct-provider-");
    assert_eq!(backend.provider, "azurerm");
    assert_eq!(backend.credentials.subscription_id.as_deref(), Some("sub-vault"));
    assert_eq!(config.profile_names(), ["default"]);
}

#[test]
#[serial]
fn test_load_json() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.json");
    std::fs::write(&path, r#"{"defaults": {"max_retries": 0}}"#).unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.defaults.max_retries, 0);
    assert_eq!(config.http_config().retry.max_retries, 0);
}

// ============================================================================
// Merging and overrides
// ============================================================================

#[test]
#[serial]
fn test_later_files_win() {
    clear_env();
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.toml");
    let project = dir.path().join("project.toml");
    std::fs::write(
        &base,
        "[defaults]\nmax_retries = 5\nprofile = \"base\"\n\n[acct.profiles.base]\nsubscription_id = \"sub-base\"\ntenant = \"t\"\n",
    )
    .unwrap();
    std::fs::write(
        &project,
        "[defaults]\nprofile = \"project\"\n\n[acct.profiles.base]\ntenant = \"t2\"\n",
    )
    .unwrap();

    let missing = dir.path().join("missing.toml");
    let config = Config::load_files(&[base, missing, project]).unwrap();
    assert_eq!(config.defaults.max_retries, 5);
    assert_eq!(config.defaults.profile, "project");
    let base_profile = config.profile(Some("base")).unwrap();
    assert_eq!(base_profile.subscription_id.as_deref(), Some("sub-base"));
    assert_eq!(base_profile.tenant.as_deref(), Some("t2"));
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.toml");
    std::fs::write(
        &path,
        "[acct.profiles.default]\nsubscription_id = \"from-file\"\nclient_id = \"app\"\n",
    )
    .unwrap();

    std::env::set_var("AZURE_SUBSCRIPTION_ID", "from-env");
    std::env::set_var("AZURE_CLIENT_SECRET", "env-secret");
    let config = Config::load(Some(path.as_path()));
    clear_env();

    let profile = config.unwrap().profile(None).unwrap();
    assert_eq!(profile.subscription_id.as_deref(), Some("from-env"));
    assert_eq!(profile.secret.as_deref(), Some("env-secret"));
    assert_eq!(profile.client_id.as_deref(), Some("app"));
}

#[test]
#[serial]
fn test_config_path_from_environment() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[defaults]\nprofile = \"custom\"\n").unwrap();

    std::env::set_var("AZRM_CONFIG", &path);
    let config = Config::load(None);
    clear_env();
    assert_eq!(config.unwrap().defaults.profile, "custom");
}

// ============================================================================
// Errors
// ============================================================================

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    clear_env();
    let err = Config::load(Some(Path::new("/nonexistent/azrm.toml"))).unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
    assert_eq!(err.exit_code(), 5);
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.toml");
    std::fs::write(&path, "[defaults\nprofile = ").unwrap();

    let err = Config::load(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("azrm.toml"));
}

#[test]
#[serial]
fn test_invalid_duration_is_an_error() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("azrm.toml");
    std::fs::write(&path, "[defaults]\npoll_interval = \"soon\"\n").unwrap();

    let err = Config::load(Some(path.as_path())).unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid(_)));
}
