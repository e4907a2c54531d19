//! Admission scheduler
//!
//! Holds pending requests in priority order and grants them as the token
//! bucket allows, with a single retry timer while blocked.

mod admission;
mod config;
mod core;
mod queue;

pub use admission::Admission;
pub use config::SchedulerConfig;
pub use self::core::Scheduler;
pub(crate) use queue::lenient_number;
pub use queue::{
    DEFAULT_PRIORITY, DEFAULT_TOKENS, EnqueueOptions, QueueEntry, QueueState, SchedulerStats, validate_priority,
    validate_tokens,
};
