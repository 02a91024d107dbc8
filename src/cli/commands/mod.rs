//! Subcommands module for azrm CLI

pub mod acct;
pub mod exec;
pub mod modules;
pub mod state;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use azrm::acct::Profile;
use azrm::config::Config;
use azrm::error::Error;
use azrm::exec::{ExecContext, ModuleParams};
use azrm::session;
use serde_json::Value;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Profile named with `--profile`
    pub profile: Option<String>,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config,
            output: OutputFormatter::new(!cli.no_color, cli.is_json()),
            profile: cli.profile.clone(),
            verbosity: cli.verbosity(),
        }
    }

    /// Load backend profiles, then pick the selected one.
    pub async fn selected_profile(&mut self) -> Result<Profile> {
        if let Err(err) = session::resolve_profiles(&mut self.config).await {
            self.output
                .warning(&format!("Unable to read profiles from Key Vault: {}", err));
        }
        Ok(self.config.profile(self.profile.as_deref())?)
    }

    /// Connect with the selected profile.
    pub async fn connect(&mut self) -> Result<ExecContext> {
        let profile = self.selected_profile().await?;
        Ok(session::connect(&profile, &self.config).await?)
    }
}

/// Parse `key=value` arguments. Values are YAML, so `count=3`,
/// `enabled=true` and `tags={env: prod}` arrive typed; anything that does not
/// parse stays a string.
pub fn parse_key_values(args: &[String]) -> std::result::Result<ModuleParams, Error> {
    let mut params = ModuleParams::new();
    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| Error::InvalidArgument(arg.clone()))?;
        let value = serde_yaml::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
