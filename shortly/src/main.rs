//! Shortly - priority admission control over a token bucket
//!
//! CLI entry point for running scripted workloads against a scheduler.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use shortly::cli::{Cli, Command, get_log_path};
use shortly::config::Config;
use shortly::scheduler::Scheduler;
use shortly::workload::run_workload;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&config).await,
        Command::Config => cmd_config(&config),
        Command::Check => cmd_check(&config),
    }
}

async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    config.validate().context("Invalid configuration")?;

    if config.workload.is_empty() {
        println!("{}", "Workload is empty, nothing to run".yellow());
        return Ok(());
    }

    let scheduler = Scheduler::new(config.bucket.clone(), config.scheduler.clone())?;
    info!(requests = config.workload.len(), limit = ?config.scheduler.limit, "Running workload");

    let outcomes = run_workload(&scheduler, &config.workload).await;

    for outcome in &outcomes {
        let status = match &outcome.result {
            Ok(()) => "granted".green(),
            Err(e) => e.to_string().red(),
        };
        println!(
            "{:>8}ms  {:<20} priority={:<6} tokens={:<4} {}",
            outcome.elapsed.as_millis(),
            outcome.name.bold(),
            outcome.priority,
            outcome.cost,
            status
        );
    }

    let stats = scheduler.stats();
    println!(
        "{} granted, {} evicted, {} retries",
        stats.total_granted.to_string().green(),
        stats.total_evicted.to_string().red(),
        stats.retries_armed
    );
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    debug!("cmd_check: called");
    config.validate()?;
    println!("{} configuration is valid", "✓".green());
    Ok(())
}
