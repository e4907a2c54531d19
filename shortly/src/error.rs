//! Error types for shortly

use thiserror::Error;

/// Errors raised while constructing a scheduler
#[derive(Debug, Error)]
pub enum ShortlyError {
    #[error("Invalid bucket configuration: {0}")]
    InvalidBucket(String),

    #[error("No tokio runtime available to drive the retry timer")]
    NoRuntime,
}

/// Result type alias for shortly construction
pub type Result<T> = std::result::Result<T, ShortlyError>;

/// Delivered to a pending request evicted because the queue exceeded its limit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Queue is full")]
pub struct BucketOverflowError;

/// Why an admission did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Overflow(#[from] BucketOverflowError),

    #[error("Scheduler dropped before the request was granted")]
    Closed,
}

impl AdmissionError {
    /// Check if this is an overflow eviction
    pub fn is_overflow(&self) -> bool {
        matches!(self, AdmissionError::Overflow(_))
    }

    /// Neither failure clears by re-enqueueing the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            AdmissionError::Overflow(_) => false,
            AdmissionError::Closed => false,
        }
    }
}
