//! End-to-end state file runs against a mocked resource manager
//!
//! A state file is parsed, run through the state registry, and the resulting
//! ARM calls are served by wiremock.

use std::sync::Arc;
use std::time::Duration;

use azrm::acct::Profile;
use azrm::auth::{CloudEnvironment, StaticTokenCredential};
use azrm::client::http::HttpClientConfig;
use azrm::client::{HttpArmClient, PollerConfig};
use azrm::exec::ExecContext;
use azrm::retry::RetryPolicy;
use azrm::sls::{RunSummary, StateFile, StateRunner};
use azrm::states::{StateRegistry, StateStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "00000000-0000-0000-0000-000000000000";

const STATES: &str = r#"
rg1:
  azurerm.resource.group.present:
    - location: eastus
    - tags:
        env: dev
"#;

fn rg_path() -> String {
    format!("/subscriptions/{}/resourceGroups/rg1", SUB)
}

fn acct() -> Profile {
    Profile {
        subscription_id: Some(SUB.to_string()),
        ..Default::default()
    }
}

fn context(server: &MockServer) -> ExecContext {
    let cloud = CloudEnvironment {
        resource_manager: server.uri(),
        ..CloudEnvironment::public()
    };
    let config = HttpClientConfig {
        retry: RetryPolicy::no_retry(),
        ..HttpClientConfig::default()
    };
    let client =
        HttpArmClient::new(Arc::new(StaticTokenCredential::new("token")), cloud, SUB, config).unwrap();
    ExecContext::new(Arc::new(client)).with_poller(PollerConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_secs(10),
    })
}

async fn not_found_once(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(rg_path()))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "ResourceGroupNotFound",
                "message": "Resource group 'rg1' could not be found."
            }
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_present_creates_then_is_idempotent() {
    let server = MockServer::start().await;
    not_found_once(&server).await;
    Mock::given(method("GET"))
        .and(path(rg_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": rg_path(),
            "name": "rg1",
            "location": "eastus",
            "tags": {"env": "dev"},
            "properties": {"provisioningState": "Succeeded"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(rg_path()))
        .and(body_partial_json(json!({"location": "eastus", "tags": {"env": "dev"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": rg_path(),
            "name": "rg1",
            "location": "eastus",
            "tags": {"env": "dev"},
            "properties": {"provisioningState": "Succeeded"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let file = StateFile::from_yaml(STATES, None).unwrap();
    let registry = StateRegistry::with_builtins();
    let ctx = context(&server);
    let runner = StateRunner::new(&registry).with_acct(Some(acct()));

    let first = runner
        .run(&file, |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await;
    assert_eq!(first[0].status, StateStatus::Changed, "{}", first[0].ret.comment);
    assert_eq!(first[0].ret.comment, "Resource group rg1 has been created.");

    let second = runner
        .run(&file, |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await;
    assert_eq!(second[0].status, StateStatus::Ok);
    assert_eq!(second[0].ret.comment, "Resource group rg1 is already present.");
}

#[tokio::test]
async fn test_test_mode_makes_no_changes() {
    let server = MockServer::start().await;
    not_found_once(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let file = StateFile::from_yaml(STATES, None).unwrap();
    let registry = StateRegistry::with_builtins();
    let ctx = context(&server);
    let runs = StateRunner::new(&registry)
        .with_acct(Some(acct()))
        .with_test(true)
        .run(&file, |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await;

    assert_eq!(runs[0].status, StateStatus::Pending);
    assert_eq!(runs[0].ret.result, None);
    assert_eq!(runs[0].ret.changes["new"]["location"], "eastus");
    assert_eq!(RunSummary::from_runs(&runs).pending, 1);
}

#[tokio::test]
async fn test_lookup_failure_fails_the_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": "AuthorizationFailed",
                "message": "The client does not have authorization."
            }
        })))
        .mount(&server)
        .await;

    let file = StateFile::from_yaml(STATES, None).unwrap();
    let registry = StateRegistry::with_builtins();
    let ctx = context(&server);
    let runs = StateRunner::new(&registry)
        .with_acct(Some(acct()))
        .run(&file, |_| {
            let ctx = ctx.clone();
            async move { Ok(ctx) }
        })
        .await;

    assert_eq!(runs[0].status, StateStatus::Failed);
    assert!(runs[0].ret.comment.contains("does not have authorization"));
    assert_eq!(RunSummary::from_runs(&runs).unsuccessful(), 1);
}
