//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shortly - priority admission control over a token bucket
#[derive(Parser)]
#[command(
    name = "shortly",
    about = "Grant prioritized requests as a token bucket refills",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/shortly/logs/shortly.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Submit the configured workload and report each outcome (default)
    Run,

    /// Print the effective configuration as YAML
    Config,

    /// Validate the configuration
    Check,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shortly")
        .join("logs")
        .join("shortly.log")
}
