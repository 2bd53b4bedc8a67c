mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use recon_core::config::load_dotenv;
use recon_core::Config;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let mut config = Config::from_env();
    config::apply_overrides(&mut config, &args);
    config.log_summary();

    match args.command {
        Command::Policy { format } => commands::policy(&config, format),
        Command::Validate { target, tools } => commands::validate(&config, &target, &tools),
        Command::Run { target, tools } => commands::run(&config, &target, tools).await,
        Command::Daemon => commands::daemon(&config).await,
    }
}
