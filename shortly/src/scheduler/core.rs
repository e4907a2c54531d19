//! Scheduler implementation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bucket::{Bucket, BucketConfig, TokenBucket};
use crate::error::{AdmissionError, BucketOverflowError, Result, ShortlyError};

use super::admission::{self, Admission};
use super::config::SchedulerConfig;
use super::queue::{EnqueueOptions, PendingQueue, PendingRequest, QueueEntry, QueueState, RequestRank, SchedulerStats};

/// Internal state protected by mutex
struct SchedulerInner<B> {
    bucket: B,

    /// Requests waiting for capacity, in service order
    pending: PendingQueue,

    /// The one outstanding retry timer, if blocked
    retry: Option<JoinHandle<()>>,

    /// Arrival counter; keeps equal-ranked requests distinct
    next_seq: u64,

    stats: SchedulerStats,
}

struct Shared<B> {
    config: SchedulerConfig,
    runtime: Handle,
    inner: Mutex<SchedulerInner<B>>,
}

/// Grants admission requests in priority order as the bucket refills.
///
/// `enqueue` never suspends: it inserts the request and drains the queue
/// against the bucket before returning, so callers arriving while capacity
/// is available are served in call order. Once requests are pending they are
/// served by rank. When the head of the queue cannot be served a single
/// retry timer is armed for the wait the bucket reports.
///
/// Cloning yields another handle to the same scheduler. Dropping the last
/// handle cancels the retry timer and closes every pending admission.
pub struct Scheduler<B: TokenBucket = Bucket> {
    shared: Arc<Shared<B>>,
}

impl<B: TokenBucket> Clone for Scheduler<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Scheduler<Bucket> {
    /// Create a scheduler over the bundled refilling bucket
    pub fn new(bucket: BucketConfig, config: SchedulerConfig) -> Result<Self> {
        debug!(?bucket, ?config, "Scheduler::new: called");
        Self::with_bucket(Bucket::new(&bucket)?, config)
    }
}

impl<B: TokenBucket> Scheduler<B> {
    /// Create a scheduler over any token bucket
    ///
    /// Must be called from within a tokio runtime; retry timers are spawned
    /// on it.
    pub fn with_bucket(bucket: B, config: SchedulerConfig) -> Result<Self> {
        debug!(?config, "Scheduler::with_bucket: called");
        let runtime = Handle::try_current().map_err(|_| ShortlyError::NoRuntime)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                runtime,
                inner: Mutex::new(SchedulerInner {
                    bucket,
                    pending: PendingQueue::default(),
                    retry: None,
                    next_seq: 0,
                    stats: SchedulerStats::default(),
                }),
            }),
        })
    }

    /// Queue a request and try to grant it straight away
    pub fn enqueue(&self, options: EnqueueOptions) -> Admission {
        let (priority, cost) = options.resolve();
        debug!(priority, cost, "Scheduler::enqueue: called");

        let (completer, admission) = admission::channel();
        let mut inner = self.shared.lock();

        let rank = RequestRank {
            priority,
            cost,
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        inner.pending.insert(
            rank,
            PendingRequest {
                completer,
                submitted_at: Instant::now(),
            },
        );
        inner.stats.total_enqueued += 1;
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.pending.len());

        self.shared.drain(&mut inner);
        admission
    }

    /// Queue a request and wait for its outcome
    pub async fn wait(&self, options: EnqueueOptions) -> std::result::Result<(), AdmissionError> {
        self.enqueue(options).await
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().pending.is_empty()
    }

    /// Check if a retry timer is armed
    pub fn has_pending_retry(&self) -> bool {
        self.shared.lock().retry.is_some()
    }

    /// The configured queue limit
    pub fn limit(&self) -> Option<usize> {
        self.shared.config.limit
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.shared.lock().stats.clone()
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let inner = self.shared.lock();

        QueueState {
            pending: inner.pending.len(),
            retry_armed: inner.retry.is_some(),
            available_tokens: inner.bucket.available(),
            stats: inner.stats.clone(),
        }
    }

    /// Pending requests in service order
    pub fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.shared.lock();
        let now = Instant::now();

        inner
            .pending
            .iter()
            .enumerate()
            .map(|(i, (rank, request))| QueueEntry {
                position: i + 1,
                priority: rank.priority,
                cost: rank.cost,
                wait_time: now.saturating_duration_since(request.submitted_at),
            })
            .collect()
    }
}

impl<B: TokenBucket> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner<B>> {
        // Every mutation completes before the guard drops, so a poisoned
        // guard still holds consistent state
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point for the retry timer
    fn drain_attempt(self: &Arc<Self>) {
        debug!("Scheduler::drain_attempt: called");
        let mut inner = self.lock();
        self.drain(&mut inner);
    }

    /// Grant from the head while the bucket allows, then enforce the limit
    fn drain(self: &Arc<Self>, inner: &mut SchedulerInner<B>) {
        if let Some(timer) = inner.retry.take() {
            debug!("Scheduler::drain: cancelling armed retry");
            timer.abort();
        }

        let mut blocked = None;
        while let Some(head) = inner.pending.peek() {
            let wait = inner.bucket.take(head.cost);
            if !wait.is_zero() {
                debug!(priority = head.priority, cost = head.cost, ?wait, "Scheduler::drain: blocked");
                blocked = Some(wait);
                break;
            }

            let Some((rank, request)) = inner.pending.pop_first() else {
                break;
            };
            debug_assert_eq!(rank, head);

            let waited = request.submitted_at.elapsed();
            inner.stats.total_granted += 1;
            inner.stats.tokens_granted = inner.stats.tokens_granted.saturating_add(rank.cost);
            inner.stats.total_wait_time_ms = inner
                .stats
                .total_wait_time_ms
                .saturating_add(waited.as_millis().min(u128::from(u64::MAX)) as u64);

            if request.completer.send(Ok(())).is_err() {
                debug!(seq = rank.seq, "Scheduler::drain: granted request was abandoned by its caller");
            }
            debug!(priority = rank.priority, cost = rank.cost, ?waited, "Granted");
        }

        if let Some(limit) = self.config.limit {
            while inner.pending.len() > limit {
                let Some((rank, request)) = inner.pending.pop_last() else {
                    break;
                };
                inner.stats.total_evicted += 1;
                warn!(
                    priority = rank.priority,
                    cost = rank.cost,
                    limit,
                    "Queue is full, evicting lowest-ranked request"
                );
                if request.completer.send(Err(BucketOverflowError)).is_err() {
                    debug!(seq = rank.seq, "Scheduler::drain: evicted request was abandoned by its caller");
                }
            }
        }

        // Eviction only takes from the tail, so a non-empty queue still has the blocked head
        if let Some(wait) = blocked {
            if !inner.pending.is_empty() {
                debug!(?wait, "Scheduler::drain: arming retry");
                inner.retry = Some(self.arm_retry(wait));
                inner.stats.retries_armed += 1;
            }
        }
    }

    fn arm_retry(self: &Arc<Self>, wait: Duration) -> JoinHandle<()> {
        let shared: Weak<Self> = Arc::downgrade(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = shared.upgrade() {
                shared.drain_attempt();
            }
        })
    }
}

impl<B> Drop for Shared<B> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = inner.retry.take() {
            timer.abort();
        }
        if !inner.pending.is_empty() {
            info!(pending = inner.pending.len(), "Scheduler dropped with pending requests");
        }
    }
}
