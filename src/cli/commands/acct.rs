//! `azrm acct`: list the available profiles.

use super::{CommandContext, Runnable};
use anyhow::Result;
use azrm::session;
use clap::Parser;

/// Arguments for the acct command
#[derive(Parser, Debug, Clone)]
pub struct AcctArgs {
    /// Also read profiles from the Key Vault backend
    #[arg(long)]
    pub unlock: bool,
}

#[async_trait::async_trait]
impl Runnable for AcctArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.unlock {
            if let Err(err) = session::resolve_profiles(&mut ctx.config).await {
                ctx.output
                    .warning(&format!("Unable to read profiles from Key Vault: {}", err));
            }
        }

        let default = ctx
            .profile
            .clone()
            .unwrap_or_else(|| ctx.config.defaults.profile.clone());
        let names = ctx.config.profile_names();

        if ctx.output.is_json() {
            ctx.output
                .value(&serde_json::json!({ "default": default, "profiles": names }));
            return Ok(0);
        }

        ctx.output.section("PROFILES");
        for name in names {
            let marker = if name == default { " (default)" } else { "" };
            ctx.output.item(&format!("{}{}", name, marker));
        }
        Ok(0)
    }
}
