//! Token bucket consumed by the scheduler
//!
//! The scheduler only needs [`TokenBucket::take`]: deduct `cost` tokens and
//! report a zero wait, or leave the bucket alone and report how long until
//! `cost` tokens should be available. [`Bucket`] is the bundled refilling
//! implementation; anything else honoring the same contract can be plugged in
//! through [`crate::Scheduler::with_bucket`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, ShortlyError};

/// Capacity source for the scheduler
pub trait TokenBucket: Send + 'static {
    /// Take `cost` tokens.
    ///
    /// Returns `Duration::ZERO` when the tokens were deducted, otherwise the
    /// expected wait before retrying. Retrying after the wait is not
    /// guaranteed to succeed if other takes intervene.
    fn take(&mut self, cost: u64) -> Duration;

    /// Tokens currently available
    fn available(&self) -> f64;
}

/// Token bucket configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Maximum tokens held
    pub capacity: u64,

    /// Tokens added every `fill-time-ms`
    #[serde(rename = "fill-quantity")]
    pub fill_quantity: u64,

    /// Refill period in milliseconds
    #[serde(rename = "fill-time-ms")]
    pub fill_time_ms: u64,

    /// Tokens at construction (defaults to `capacity`)
    #[serde(rename = "initial-capacity", skip_serializing_if = "Option::is_none")]
    pub initial_capacity: Option<u64>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            fill_quantity: 1,
            fill_time_ms: 1000,
            initial_capacity: None,
        }
    }
}

impl BucketConfig {
    /// Create a bucket config
    ///
    /// `fill_time` is rounded up to whole milliseconds, so a refill period
    /// is never shortened.
    pub fn new(capacity: u64, fill_quantity: u64, fill_time: Duration) -> Self {
        Self {
            capacity,
            fill_quantity,
            fill_time_ms: fill_time.as_nanos().div_ceil(1_000_000).min(u128::from(u64::MAX)) as u64,
            initial_capacity: None,
        }
    }

    /// Set the starting token count
    pub fn with_initial_capacity(mut self, initial_capacity: u64) -> Self {
        self.initial_capacity = Some(initial_capacity);
        self
    }

    /// Get the refill period as a Duration
    pub fn fill_time(&self) -> Duration {
        Duration::from_millis(self.fill_time_ms)
    }

    /// Starting token count after defaulting
    pub fn initial(&self) -> u64 {
        self.initial_capacity.unwrap_or(self.capacity)
    }

    /// Check every field is in range
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ShortlyError::InvalidBucket("capacity must be positive".to_string()));
        }
        if self.fill_quantity == 0 {
            return Err(ShortlyError::InvalidBucket("fill-quantity must be positive".to_string()));
        }
        if self.fill_time_ms == 0 {
            return Err(ShortlyError::InvalidBucket("fill-time-ms must be positive".to_string()));
        }
        if self.initial() > self.capacity {
            return Err(ShortlyError::InvalidBucket(format!(
                "initial-capacity {} exceeds capacity {}",
                self.initial(),
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Slack for float drift when comparing token counts
const EPSILON: f64 = 1e-9;

/// Continuously refilling token bucket
#[derive(Debug, Clone)]
pub struct Bucket {
    capacity: f64,
    tokens: f64,
    fill_quantity: f64,
    fill_nanos: f64,
    last: Instant,
}

impl Bucket {
    /// Create a bucket from a validated config
    pub fn new(config: &BucketConfig) -> Result<Self> {
        debug!(?config, "Bucket::new: called");
        config.validate()?;

        Ok(Self {
            capacity: config.capacity as f64,
            tokens: config.initial() as f64,
            fill_quantity: config.fill_quantity as f64,
            fill_nanos: config.fill_time().as_nanos() as f64,
            last: Instant::now(),
        })
    }

    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last).as_nanos() as f64;
        (self.tokens + elapsed * self.fill_quantity / self.fill_nanos).min(self.capacity)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        self.tokens = self.refilled(now);
        self.last = now;
    }

    fn wait_for(&self, cost: f64) -> Duration {
        let deficit = cost - self.tokens;
        let nanos = deficit * self.fill_nanos / self.fill_quantity;
        // Whole milliseconds, rounded up; a sub-millisecond wait would fire
        // before the deficit has refilled
        let millis = (nanos / 1_000_000.0 - EPSILON).ceil().max(1.0);
        if millis >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_millis(millis as u64)
    }
}

impl TokenBucket for Bucket {
    fn take(&mut self, cost: u64) -> Duration {
        let cost = cost as f64;
        if cost > self.capacity {
            debug!(cost, capacity = self.capacity, "Bucket::take: cost exceeds capacity, never satisfiable");
            return Duration::MAX;
        }

        self.refill();

        if self.tokens + EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            return Duration::ZERO;
        }

        self.wait_for(cost)
    }

    fn available(&self) -> f64 {
        self.refilled(Instant::now())
    }
}
