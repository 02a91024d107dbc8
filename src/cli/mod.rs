//! CLI module for azrm
//!
//! Argument parsing and subcommand dispatch for the `azrm` binary.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// azrm - Azure Resource Manager execution and state modules
///
/// Calls single ARM operations or applies state files idempotently.
#[derive(Parser, Debug, Clone)]
#[command(name = "azrm")]
#[command(author = "azrm Contributors")]
#[command(version)]
#[command(about = "Azure Resource Manager execution and state modules", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "AZRM_CONFIG")]
    pub config: Option<PathBuf>,

    /// acct profile to use
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Call an execution function, e.g. `azrm exec azurerm.resource.group.get name=rg1`
    Exec(commands::exec::ExecArgs),

    /// Apply a state file
    State(commands::state::StateArgs),

    /// List execution and state modules
    Modules(commands::modules::ModulesArgs),

    /// List acct profiles
    Acct(commands::acct::AcctArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["azrm", "state", "site.yml", "--test"]).unwrap();
        match cli.command {
            Commands::State(args) => {
                assert!(args.test);
                assert_eq!(args.file, PathBuf::from("site.yml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["azrm", "-vvvv", "modules"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_exec_arguments() {
        let cli = Cli::try_parse_from([
            "azrm",
            "--output",
            "json",
            "exec",
            "azurerm.resource.group.get",
            "name=rg1",
        ])
        .unwrap();
        assert!(cli.is_json());
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.function, "azurerm.resource.group.get");
                assert_eq!(args.args, ["name=rg1"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
