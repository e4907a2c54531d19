//! Shortly configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bucket::BucketConfig;
use crate::scheduler::SchedulerConfig;
use crate::workload::WorkloadRequest;

/// Main shortly configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Token bucket the scheduler draws from
    pub bucket: BucketConfig,

    /// Queue settings
    pub scheduler: SchedulerConfig,

    /// Requests submitted by `shortly run`, in order
    pub workload: Vec<WorkloadRequest>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        self.bucket.validate().context("Invalid bucket section")?;

        if let Some(index) = self.workload.iter().position(|r| r.name.trim().is_empty()) {
            return Err(eyre::eyre!("Workload request #{} has an empty name", index + 1));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        debug!(?config_path, "Config::load: called");
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Never fails; a missing or unreadable file yields `None`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        Self::load_from_file(&path).ok()?.log_level
    }

    /// Project-local `.shortly.yml`, then `~/.config/shortly/shortly.yml`
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(".shortly.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("shortly").join("shortly.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
