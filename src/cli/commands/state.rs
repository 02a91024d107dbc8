//! `azrm state`: apply a state file.

use super::{CommandContext, Runnable};
use anyhow::Result;
use azrm::error::Error;
use azrm::session;
use azrm::sls::{RunSummary, StateFile, StateRunner};
use azrm::states::StateRegistry;
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the state command
#[derive(Parser, Debug, Clone)]
pub struct StateArgs {
    /// State file (YAML)
    pub file: PathBuf,

    /// Report what would change without changing anything
    #[arg(long)]
    pub test: bool,
}

#[async_trait::async_trait]
impl Runnable for StateArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let file = StateFile::from_file(&self.file).await?;
        ctx.output
            .section(&format!("STATES [{}]", self.file.display()));

        // States may bring their own connection_auth, so a missing default
        // profile is only an error when one was named.
        let acct = match ctx.selected_profile().await {
            Ok(profile) => Some(profile),
            Err(err) if ctx.profile.is_some() => return Err(err),
            Err(_) => None,
        };

        let registry = StateRegistry::with_builtins();
        let config = &ctx.config;
        let runs = StateRunner::new(&registry)
            .with_acct(acct)
            .with_test(self.test)
            .run(&file, |profile| async move { session::connect(&profile, config).await })
            .await;

        let summary = RunSummary::from_runs(&runs);
        ctx.output.state_runs(&runs, &summary);

        if summary.unsuccessful() > 0 {
            return Err(Error::StatesFailed {
                failed: summary.unsuccessful(),
                total: summary.total(),
            }
            .into());
        }
        Ok(0)
    }
}
