//! Shortly - priority admission control over a token bucket
//!
//! Callers ask permission to proceed, each request carrying a priority and a
//! cost in tokens. Requests are granted highest priority first (cheapest
//! first among equals) as the bucket refills, and each caller is notified
//! through the [`Admission`] future it got back from
//! [`Scheduler::enqueue`].
//!
//! ```ignore
//! use shortly::{BucketConfig, EnqueueOptions, Scheduler, SchedulerConfig};
//!
//! let bucket = BucketConfig::new(10, 1, Duration::from_secs(1));
//! let scheduler = Scheduler::new(bucket, SchedulerConfig::with_limit(100))?;
//!
//! scheduler.enqueue(EnqueueOptions::new().with_priority(100).with_tokens(3)).await?;
//! ```
//!
//! # Modules
//!
//! - [`scheduler`] - The admission scheduler and its queue types
//! - [`bucket`] - Token bucket trait and the bundled refilling bucket
//! - [`error`] - Construction and admission errors
//! - [`config`] - Configuration types and loading
//! - [`workload`] - Scripted workloads for the CLI
//! - [`cli`] - Command-line interface

pub mod bucket;
pub mod cli;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod workload;

// Re-export commonly used types
pub use bucket::{Bucket, BucketConfig, TokenBucket};
pub use config::Config;
pub use error::{AdmissionError, BucketOverflowError, Result, ShortlyError};
pub use scheduler::{
    Admission, EnqueueOptions, QueueEntry, QueueState, Scheduler, SchedulerConfig, SchedulerStats,
};
pub use workload::{Outcome, WorkloadRequest, run_workload};
