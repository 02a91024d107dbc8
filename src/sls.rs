//! State files.
//!
//! A state file is a YAML mapping from a state id to exactly one
//! `<module>.<function>` call:
//!
//! ```yaml
//! Ensure resource group exists:
//!   azurerm.resource.group.present:
//!     - name: rg1
//!     - location: eastus
//!     - tags:
//!         owner: ops
//!
//! vnet1:
//!   azurerm.network.virtual_network.present:
//!     resource_group: rg1
//!     address_prefixes: [10.0.0.0/16]
//!     require:
//!       - Ensure resource group exists
//! ```
//!
//! Arguments are either a list of single-key maps or a plain map. `name`
//! defaults to the state id. States run in file order; a state whose
//! `require` entries did not succeed is skipped.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::acct::{self, Profile};
use crate::client::AzureResult;
use crate::error::{Error, Result};
use crate::exec::{ExecContext, ModuleParams};
use crate::states::{StateRegistry, StateReturn, StateStatus};

/// One declared state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDecl {
    /// State id (the top-level key)
    pub id: String,
    /// `<module>.<function>`, e.g. `azurerm.resource.group.present`
    pub function: String,
    pub params: ModuleParams,
    /// Ids of states that must succeed first
    pub require: Vec<String>,
    /// Per-state credentials
    pub connection_auth: Option<Value>,
}

/// A parsed state file.
#[derive(Debug, Clone, Default)]
pub struct StateFile {
    pub states: Vec<StateDecl>,
    pub source_path: Option<PathBuf>,
}

impl StateFile {
    /// Loads a state file from disk.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::state_file_parse(path, format!("Failed to read file: {}", e)))?;
        Self::from_yaml(&content, Some(path.to_path_buf()))
    }

    /// Parses a state file from a YAML string.
    pub fn from_yaml(yaml: &str, source_path: Option<PathBuf>) -> Result<Self> {
        let origin = source_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("<string>"));
        let doc: Option<IndexMap<String, IndexMap<String, Value>>> =
            serde_yaml::from_str(yaml).map_err(|e| Error::state_file_parse(&origin, e.to_string()))?;

        let mut states = Vec::new();
        for (id, body) in doc.unwrap_or_default() {
            let mut calls = body.into_iter();
            let (function, args) = match (calls.next(), calls.next()) {
                (Some(call), None) => call,
                (None, _) => return Err(Error::state_invalid(id, "no function given")),
                (Some(_), Some(_)) => {
                    return Err(Error::state_invalid(id, "exactly one function per state"))
                }
            };
            if function.matches('.').count() < 2 {
                return Err(Error::state_invalid(
                    id,
                    format!("'{}' is not a <module>.<function> path", function),
                ));
            }
            states.push(Self::declare(id, function, args)?);
        }

        let ids: Vec<&str> = states.iter().map(|s| s.id.as_str()).collect();
        for state in &states {
            if let Some(missing) = state.require.iter().find(|r| !ids.contains(&r.as_str())) {
                return Err(Error::state_invalid(
                    &state.id,
                    format!("requires unknown state '{}'", missing),
                ));
            }
        }

        Ok(Self {
            states,
            source_path,
        })
    }

    fn declare(id: String, function: String, args: Value) -> Result<StateDecl> {
        let mut params = ModuleParams::new();
        match args {
            Value::Null => {}
            Value::Object(map) => params.extend(map),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(map) => params.extend(map),
                        other => {
                            return Err(Error::state_invalid(
                                id,
                                format!("argument {} is not a key: value pair", other),
                            ))
                        }
                    }
                }
            }
            other => {
                return Err(Error::state_invalid(
                    id,
                    format!("arguments must be a list or a map, got {}", other),
                ))
            }
        }

        let require = match params.remove("require") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(one)) => vec![one],
            Some(Value::Array(many)) => many
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(Error::state_invalid(
                        &id,
                        format!("require entry {} is not a state id", other),
                    )),
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(Error::state_invalid(
                    id,
                    format!("require must be a list of state ids, got {}", other),
                ))
            }
        };
        let connection_auth = params.remove("connection_auth");
        params
            .entry("name".to_string())
            .or_insert_with(|| Value::String(id.clone()));

        Ok(StateDecl {
            id,
            function,
            params,
            require,
            connection_auth,
        })
    }
}

/// Result of one state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRun {
    pub id: String,
    pub function: String,
    pub status: StateStatus,
    #[serde(flatten)]
    pub ret: StateReturn,
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ok: usize,
    pub changed: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_runs(runs: &[StateRun]) -> Self {
        let mut summary = Self::default();
        for run in runs {
            match run.status {
                StateStatus::Ok => summary.ok += 1,
                StateStatus::Changed => summary.changed += 1,
                StateStatus::Pending => summary.pending += 1,
                StateStatus::Failed => summary.failed += 1,
                StateStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.ok + self.changed + self.pending + self.failed + self.skipped
    }

    /// Failed and skipped states both count against the run.
    pub fn unsuccessful(&self) -> usize {
        self.failed + self.skipped
    }
}

/// Runs the states of a file against one registry.
pub struct StateRunner<'a> {
    registry: &'a StateRegistry,
    acct: Option<Profile>,
    test: bool,
}

impl<'a> StateRunner<'a> {
    pub fn new(registry: &'a StateRegistry) -> Self {
        Self {
            registry,
            acct: None,
            test: false,
        }
    }

    /// Profile used by states without `connection_auth`.
    pub fn with_acct(mut self, profile: Option<Profile>) -> Self {
        self.acct = profile;
        self
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Run every state in order. `connect` builds a context for a profile;
    /// contexts are reused for states that resolve to the same profile.
    pub async fn run<F, Fut>(&self, file: &StateFile, connect: F) -> Vec<StateRun>
    where
        F: Fn(Profile) -> Fut,
        Fut: Future<Output = AzureResult<ExecContext>>,
    {
        let mut contexts: Vec<(Profile, ExecContext)> = Vec::new();
        let mut outcomes: HashMap<&str, StateStatus> = HashMap::new();
        let mut runs = Vec::with_capacity(file.states.len());

        for state in &file.states {
            let name = state
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&state.id)
                .to_string();

            let blocked: Vec<&str> = state
                .require
                .iter()
                .map(String::as_str)
                .filter(|r| !matches!(outcomes.get(r), Some(s) if succeeded(*s)))
                .collect();

            if !blocked.is_empty() {
                warn!("Skipping {}: requisites not met ({})", state.id, blocked.join(", "));
                let mut ret = StateReturn::new(name);
                ret.result = None;
                ret.comment = format!("One or more requisite failed: {}", blocked.join(", "));
                outcomes.insert(&state.id, StateStatus::Skipped);
                runs.push(StateRun {
                    id: state.id.clone(),
                    function: state.function.clone(),
                    status: StateStatus::Skipped,
                    ret,
                });
                continue;
            }

            let ret = match self.context_for(state, &mut contexts, &connect).await {
                Ok(ctx) => {
                    debug!("Running {} ({})", state.id, state.function);
                    self.registry.run(&state.function, &state.params, &ctx).await
                }
                Err(err) => StateReturn::new(name).fail(err.to_string()),
            };

            let status = ret.status();
            info!("{} [{}]: {}", state.id, status, ret.comment);
            outcomes.insert(&state.id, status);
            runs.push(StateRun {
                id: state.id.clone(),
                function: state.function.clone(),
                status,
                ret,
            });
        }
        runs
    }

    async fn context_for<F, Fut>(
        &self,
        state: &StateDecl,
        contexts: &mut Vec<(Profile, ExecContext)>,
        connect: &F,
    ) -> AzureResult<ExecContext>
    where
        F: Fn(Profile) -> Fut,
        Fut: Future<Output = AzureResult<ExecContext>>,
    {
        let profile = acct::resolve(state.connection_auth.as_ref(), self.acct.as_ref())?;
        if let Some((_, ctx)) = contexts.iter().find(|(p, _)| *p == profile) {
            return Ok(ctx.clone());
        }
        let ctx = connect(profile.clone()).await?.with_test(self.test);
        contexts.push((profile, ctx.clone()));
        Ok(ctx)
    }
}

/// Requisites are met by states that ran without failing. Pending counts,
/// so a test run walks the whole file.
fn succeeded(status: StateStatus) -> bool {
    matches!(
        status,
        StateStatus::Ok | StateStatus::Changed | StateStatus::Pending
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeArm;
    use crate::exec::testing::{context, SUB};
    use serde_json::json;
    use std::sync::Arc;

    const FILE: &str = r#"
Ensure resource group exists:
  azurerm.resource.group.present:
    - name: rg1
    - location: eastus

vnet1:
  azurerm.network.virtual_network.present:
    resource_group: rg1
    address_prefixes:
      - 10.0.0.0/16
    require:
      - Ensure resource group exists
"#;

    fn acct() -> Profile {
        Profile {
            subscription_id: Some(SUB.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_keeps_file_order() {
        let file = StateFile::from_yaml(FILE, None).unwrap();
        let ids: Vec<_> = file.states.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["Ensure resource group exists", "vnet1"]);

        let rg = &file.states[0];
        assert_eq!(rg.function, "azurerm.resource.group.present");
        assert_eq!(rg.params["location"], json!("eastus"));

        let vnet = &file.states[1];
        assert_eq!(vnet.params["name"], json!("vnet1"));
        assert_eq!(vnet.require, ["Ensure resource group exists"]);
        assert!(!vnet.params.contains_key("require"));
    }

    #[test]
    fn test_parse_errors() {
        let err = StateFile::from_yaml("rg1:\n  azurerm.resource.group.present: 3\n", None)
            .unwrap_err();
        assert!(matches!(err, Error::StateInvalid { ref id, .. } if id == "rg1"));

        let err = StateFile::from_yaml("rg1:\n  present: {}\n", None).unwrap_err();
        assert!(err.to_string().contains("<module>.<function>"));

        let err = StateFile::from_yaml(
            "rg1:\n  azurerm.resource.group.present:\n    require: [nope]\n",
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown state 'nope'"));

        let err = StateFile::from_yaml("- not a map\n", None).unwrap_err();
        assert!(matches!(err, Error::StateFileParse { .. }));
    }

    #[test]
    fn test_empty_file() {
        assert!(StateFile::from_yaml("", None).unwrap().states.is_empty());
    }

    #[tokio::test]
    async fn test_run_in_test_mode_reports_pending() {
        let (fake, ctx) = context();
        let file = StateFile::from_yaml(FILE, None).unwrap();
        let registry = StateRegistry::with_builtins();
        let runs = StateRunner::new(&registry)
            .with_acct(Some(acct()))
            .with_test(true)
            .run(&file, |_| {
                let ctx = ctx.clone();
                async move { Ok(ctx) }
            })
            .await;

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == StateStatus::Pending));
        assert!(fake.sent(crate::client::Method::Put).is_empty());
        assert_eq!(RunSummary::from_runs(&runs).pending, 2);
    }

    #[tokio::test]
    async fn test_failed_requisite_skips_dependents() {
        let file = StateFile::from_yaml(FILE, None).unwrap();
        let registry = StateRegistry::with_builtins();
        // No acct and no connection_auth: the first state cannot connect.
        let runs = StateRunner::new(&registry)
            .run(&file, |_| async {
                Ok(ExecContext::new(Arc::new(FakeArm::new(SUB))))
            })
            .await;

        assert_eq!(runs[0].status, StateStatus::Failed);
        assert_eq!(runs[0].ret.comment, acct::MISSING_CONNECTION_INFO);
        assert_eq!(runs[1].status, StateStatus::Skipped);
        assert!(runs[1].ret.comment.contains("Ensure resource group exists"));

        let summary = RunSummary::from_runs(&runs);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.unsuccessful(), 2);
    }

    #[tokio::test]
    async fn test_contexts_are_reused_per_profile() {
        let (_fake, ctx) = context();
        let file = StateFile::from_yaml(FILE, None).unwrap();
        let registry = StateRegistry::with_builtins();
        let connects = std::sync::atomic::AtomicUsize::new(0);
        StateRunner::new(&registry)
            .with_acct(Some(acct()))
            .with_test(true)
            .run(&file, |_| {
                connects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let ctx = ctx.clone();
                async move { Ok(ctx) }
            })
            .await;
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
