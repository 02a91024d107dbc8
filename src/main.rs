//! azrm - Azure Resource Manager execution and state modules
//!
//! This is the main entry point for the azrm CLI.

mod cli;

use anyhow::Result;
use azrm::client::AzureError;
use azrm::config::{Config, LogFormat, LoggingConfig};
use azrm::error::Error;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            init_logging(cli.verbosity(), &LoggingConfig::default());
            let output = cli::output::OutputFormatter::new(!cli.no_color, cli.is_json());
            output.error(&err.to_string());
            std::process::exit(err.exit_code());
        }
    };

    // Initialize logging based on verbosity
    init_logging(cli.verbosity(), &config.logging);

    // Display version if verbose
    if cli.verbosity() >= 2 {
        eprintln!("azrm v{} by {}", VERSION, AUTHORS);
    }

    let mut ctx = CommandContext::new(&cli, config);
    let exit_code = match run(&cli, &mut ctx).await {
        Ok(code) => code,
        Err(err) => {
            ctx.output.error(&format!("{:#}", err));
            exit_code(&err)
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli, ctx: &mut CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Exec(args) => args.run(ctx).await,
        Commands::State(args) => args.run(ctx).await,
        Commands::Modules(args) => args.run(ctx).await,
        Commands::Acct(args) => args.run(ctx).await,
    }
}

/// Exit status for a failed command
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<Error>() {
        return err.exit_code();
    }
    match err.downcast_ref::<AzureError>() {
        Some(AzureError::Authentication(_)) | Some(AzureError::Credentials(_)) => 3,
        _ => 1,
    }
}

/// Initialize logging based on verbosity level
///
/// `RUST_LOG` wins over everything; `-v` wins over the configured level.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.clone().unwrap_or_else(|| "warn".to_string()),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
