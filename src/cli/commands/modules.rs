//! `azrm modules`: list what can be called.

use super::{CommandContext, Runnable};
use anyhow::Result;
use azrm::exec::ExecRegistry;
use azrm::states::StateRegistry;
use clap::Parser;
use std::collections::BTreeMap;

/// Arguments for the modules command
#[derive(Parser, Debug, Clone)]
pub struct ModulesArgs {
    /// Only list modules whose name contains this text
    pub filter: Option<String>,
}

impl ModulesArgs {
    fn matches(&self, name: &str) -> bool {
        self.filter.as_deref().map_or(true, |f| name.contains(f))
    }
}

#[async_trait::async_trait]
impl Runnable for ModulesArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let exec = ExecRegistry::with_builtins();
        let states = StateRegistry::with_builtins();

        let exec_modules: BTreeMap<&str, &[&str]> = exec
            .names()
            .into_iter()
            .filter(|name| self.matches(name))
            .filter_map(|name| exec.get(name).map(|m| (name, m.functions())))
            .collect();
        let state_modules: BTreeMap<&str, &[&str]> = states
            .names()
            .into_iter()
            .filter(|name| self.matches(name))
            .filter_map(|name| states.get(name).map(|m| (name, m.functions())))
            .collect();

        if ctx.output.is_json() {
            ctx.output
                .value(&serde_json::json!({ "exec": exec_modules, "states": state_modules }));
            return Ok(0);
        }

        ctx.output.section("EXECUTION MODULES");
        for (name, functions) in &exec_modules {
            ctx.output
                .item(&format!("{}: {}", name, functions.join(", ")));
        }
        ctx.output.section("STATE MODULES");
        for (name, functions) in &state_modules {
            ctx.output
                .item(&format!("{}: {}", name, functions.join(", ")));
        }
        Ok(0)
    }
}
