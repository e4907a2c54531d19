//! Scheduler configuration

use serde::{Deserialize, Serialize};

/// Scheduler configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max requests left pending after a drain; unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SchedulerConfig {
    /// Create a config with a queue limit
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}
