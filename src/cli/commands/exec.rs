//! `azrm exec`: call one execution function.

use super::{parse_key_values, CommandContext, Runnable};
use anyhow::Result;
use azrm::error::Error;
use azrm::exec::ExecRegistry;
use clap::Parser;
use tracing::debug;

/// Arguments for the exec command
#[derive(Parser, Debug, Clone)]
pub struct ExecArgs {
    /// Function path, e.g. `azurerm.resource.group.get`
    pub function: String,

    /// Parameters as key=value; values are parsed as YAML
    pub args: Vec<String>,

    /// Only report what a state would change (passed to modules as test mode)
    #[arg(long)]
    pub test: bool,
}

#[async_trait::async_trait]
impl Runnable for ExecArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let registry = ExecRegistry::with_builtins();
        let module = self
            .function
            .rsplit_once('.')
            .map(|(module, _)| module)
            .unwrap_or(&self.function);
        if registry.get(module).is_none() {
            return Err(Error::ModuleNotFound(module.to_string()).into());
        }
        let params = parse_key_values(&self.args)?;

        let exec_ctx = ctx.connect().await?.with_test(self.test);
        debug!("Calling {} with {} parameter(s)", self.function, params.len());
        let value = registry
            .call(&self.function, &params, &exec_ctx)
            .await
            .map_err(Error::from)?;
        ctx.output.value(&value);
        Ok(0)
    }
}
