//! Queue types for the scheduler

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::time::Instant;

use super::admission::Completer;

/// Priority given to requests without a usable one
pub const DEFAULT_PRIORITY: f64 = 1.0;

/// Token cost given to requests without a usable one
pub const DEFAULT_TOKENS: u64 = 1;

/// Raw options for one admission request
///
/// Both fields are lenient: anything unusable falls back to the defaults
/// rather than failing the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    /// Higher is served earlier
    #[serde(deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    /// Tokens required; must be a positive whole number
    #[serde(deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: impl Into<f64>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_tokens(mut self, tokens: impl Into<f64>) -> Self {
        self.tokens = Some(tokens.into());
        self
    }

    /// Normalized `(priority, cost)`
    pub fn resolve(&self) -> (f64, u64) {
        (validate_priority(self.priority), validate_tokens(self.tokens))
    }
}

/// Finite priorities pass through; NaN, infinities, and absence become [`DEFAULT_PRIORITY`]
pub fn validate_priority(raw: Option<f64>) -> f64 {
    match raw {
        // Adding 0.0 folds -0.0 into 0.0 so both rank together
        Some(p) if p.is_finite() => p + 0.0,
        _ => DEFAULT_PRIORITY,
    }
}

/// Positive whole numbers that fit a u64 pass through; everything else becomes [`DEFAULT_TOKENS`]
pub fn validate_tokens(raw: Option<f64>) -> u64 {
    match raw {
        Some(t) if t.is_finite() && t > 0.0 && t.fract() == 0.0 && t < u64::MAX as f64 => t as u64,
        _ => DEFAULT_TOKENS,
    }
}

/// Read a number, or a string holding one; anything else is treated as absent
pub(crate) fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::Number(n) => n.as_f64(),
        serde_yaml::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Service rank of a pending request
///
/// Ascending order is service order: higher priority first, then lower
/// cost, then earlier arrival.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestRank {
    pub(crate) priority: f64,
    pub(crate) cost: u64,
    pub(crate) seq: u64,
}

impl Eq for RequestRank {}

impl PartialEq for RequestRank {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Ord for RequestRank {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for RequestRank {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A request waiting for capacity
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) completer: Completer,
    pub(crate) submitted_at: Instant,
}

/// Pending requests in service order
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: BTreeMap<RequestRank, PendingRequest>,
}

impl PendingQueue {
    pub(crate) fn insert(&mut self, rank: RequestRank, request: PendingRequest) {
        self.entries.insert(rank, request);
    }

    /// Next request to serve, left in place
    pub(crate) fn peek(&self) -> Option<RequestRank> {
        self.entries.first_key_value().map(|(rank, _)| *rank)
    }

    pub(crate) fn pop_first(&mut self) -> Option<(RequestRank, PendingRequest)> {
        self.entries.pop_first()
    }

    /// Request that would be served last
    pub(crate) fn pop_last(&mut self) -> Option<(RequestRank, PendingRequest)> {
        self.entries.pop_last()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&RequestRank, &PendingRequest)> {
        self.entries.iter()
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_enqueued: u64,
    pub total_granted: u64,
    pub total_evicted: u64,
    pub tokens_granted: u64,
    pub retries_armed: u64,
    pub total_wait_time_ms: u64,
    pub peak_queue_depth: usize,
}

/// Queue state snapshot
#[derive(Debug, Clone)]
pub struct QueueState {
    pub pending: usize,
    pub retry_armed: bool,
    pub available_tokens: f64,
    pub stats: SchedulerStats,
}

/// One pending request, for display
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// 1-based place in service order
    pub position: usize,
    pub priority: f64,
    pub cost: u64,
    pub wait_time: Duration,
}
