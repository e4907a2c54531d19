//! Scripted workloads for the `shortly run` command

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bucket::TokenBucket;
use crate::error::AdmissionError;
use crate::scheduler::{EnqueueOptions, Scheduler, lenient_number};

/// One named request in a workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRequest {
    pub name: String,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,
}

impl WorkloadRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: None,
            tokens: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<f64>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_tokens(mut self, tokens: impl Into<f64>) -> Self {
        self.tokens = Some(tokens.into());
        self
    }

    pub fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            tokens: self.tokens,
        }
    }
}

/// How one request in a workload ended
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub name: String,
    pub priority: f64,
    pub cost: u64,
    pub result: Result<(), AdmissionError>,
    /// Time from submission of the whole workload to resolution
    pub elapsed: Duration,
}

impl Outcome {
    pub fn is_granted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Submit every request back to back, then collect outcomes in resolution order
pub async fn run_workload<B: TokenBucket>(scheduler: &Scheduler<B>, requests: &[WorkloadRequest]) -> Vec<Outcome> {
    debug!(count = requests.len(), "run_workload: called");
    let start = Instant::now();

    // Every enqueue happens before the first await
    let mut pending: FuturesUnordered<_> = requests
        .iter()
        .map(|request| {
            let (priority, cost) = request.options().resolve();
            let admission = scheduler.enqueue(request.options());
            let name = request.name.clone();
            async move {
                let result = admission.await;
                Outcome {
                    name,
                    priority,
                    cost,
                    result,
                    elapsed: start.elapsed(),
                }
            }
        })
        .collect();

    let mut outcomes = Vec::with_capacity(requests.len());
    while let Some(outcome) = pending.next().await {
        debug!(name = %outcome.name, ok = outcome.is_granted(), elapsed = ?outcome.elapsed, "run_workload: resolved");
        outcomes.push(outcome);
    }

    info!(
        granted = outcomes.iter().filter(|o| o.is_granted()).count(),
        total = outcomes.len(),
        "Workload finished"
    );
    outcomes
}
