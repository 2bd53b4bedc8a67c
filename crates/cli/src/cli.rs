use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Policy-gated reconnaissance orchestrator.
///
/// Runs scan tools against targets only when the Rules of Engagement allow
/// it, and fires recurring scans from a schedules file.
#[derive(Parser, Debug)]
#[command(name = "recon", about = "Policy-gated reconnaissance orchestrator")]
pub struct CliArgs {
    /// Rules of Engagement file (.yml, .yaml or .json)
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// Tools file describing the adapters
    #[arg(long, global = true)]
    pub tools_file: Option<PathBuf>,

    /// Schedules file used by `daemon`
    #[arg(long, global = true)]
    pub schedules: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the loaded Rules of Engagement and engine status
    Policy {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Check a target and tool list against policy without running anything
    Validate {
        #[arg(long)]
        target: String,

        /// Comma-separated tool names
        #[arg(long, value_delimiter = ',', required = true)]
        tools: Vec<String>,
    },

    /// Run one scan job to completion and print the results as JSON
    Run {
        #[arg(long)]
        target: String,

        /// Comma-separated tool names
        #[arg(long, value_delimiter = ',', required = true)]
        tools: Vec<String>,
    },

    /// Run the scheduler until interrupted
    Daemon,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}
