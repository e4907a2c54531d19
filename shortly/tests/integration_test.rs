//! Integration tests for shortly
//!
//! These tests drive the scheduler end to end on a paused tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shortly::{
    AdmissionError, BucketConfig, BucketOverflowError, EnqueueOptions, Scheduler, SchedulerConfig, TokenBucket,
    WorkloadRequest, run_workload,
};

const FILL_TIME: Duration = Duration::from_millis(1000);

/// capacity 10, 1 token per 1000ms
fn scheduler(initial: u64, limit: Option<usize>) -> Scheduler {
    let bucket = BucketConfig::new(10, 1, FILL_TIME).with_initial_capacity(initial);
    Scheduler::new(bucket, SchedulerConfig { limit }).expect("Failed to create scheduler")
}

fn request(name: &str, priority: f64, tokens: Option<f64>) -> WorkloadRequest {
    let request = WorkloadRequest::new(name).with_priority(priority);
    match tokens {
        Some(tokens) => request.with_tokens(tokens),
        None => request,
    }
}

/// Let spawned timer tasks run after a clock advance
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn first_granted(initial: u64, requests: &[WorkloadRequest]) -> String {
    let scheduler = scheduler(initial, None);
    let outcomes = run_workload(&scheduler, requests).await;
    outcomes
        .into_iter()
        .find(|o| o.is_granted())
        .map(|o| o.name)
        .expect("No request was granted")
}

async fn evicted(requests: &[WorkloadRequest]) -> Vec<String> {
    let scheduler = scheduler(0, Some(1));
    let outcomes = run_workload(&scheduler, requests).await;
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            assert_eq!(e, &AdmissionError::Overflow(BucketOverflowError));
            assert_eq!(e.to_string(), "Queue is full");
        }
    }
    outcomes.into_iter().filter(|o| !o.is_granted()).map(|o| o.name).collect()
}

fn reversed(requests: &[WorkloadRequest]) -> Vec<WorkloadRequest> {
    requests.iter().rev().cloned().collect()
}

// =============================================================================
// Immediate grants
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_resolves_immediately_with_capacity() {
    let scheduler = scheduler(1, None);
    let start = tokio::time::Instant::now();

    scheduler.wait(EnqueueOptions::default()).await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_resolves_after_capacity_is_available() {
    let scheduler = scheduler(0, None);
    let mut admission = scheduler.enqueue(EnqueueOptions::default());

    settle().await;
    assert!(admission.try_outcome().is_none());

    tokio::time::advance(FILL_TIME).await;
    settle().await;
    assert_eq!(admission.try_outcome(), Some(Ok(())));
}

#[tokio::test(start_paused = true)]
async fn test_first_come_first_served_with_capacity() {
    let requests = vec![request("low priority", 0.0, None), request("high priority", 100.0, None)];

    assert_eq!(first_granted(1, &requests).await, "low priority");
    assert_eq!(first_granted(1, &reversed(&requests)).await, "high priority");
}

#[tokio::test(start_paused = true)]
async fn test_call_order_while_capacity_lasts() {
    let scheduler = scheduler(3, None);

    let mut admissions: Vec<_> = [0.0, 100.0, 50.0]
        .into_iter()
        .map(|p| scheduler.enqueue(EnqueueOptions::new().with_priority(p)))
        .collect();

    for admission in &mut admissions {
        assert_eq!(admission.try_outcome(), Some(Ok(())));
    }
    assert!(scheduler.is_empty());
}

// =============================================================================
// Ordering once pending
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_highest_priority_first() {
    let requests = vec![request("low priority", 0.0, None), request("high priority", 100.0, None)];

    assert_eq!(first_granted(0, &requests).await, "high priority");
    assert_eq!(first_granted(0, &reversed(&requests)).await, "high priority");
}

#[tokio::test(start_paused = true)]
async fn test_priority_wins_over_token_count() {
    let requests = vec![
        request("low priority", 0.0, Some(1.0)),
        request("high priority", 100.0, Some(10.0)),
    ];

    assert_eq!(first_granted(0, &requests).await, "high priority");
    assert_eq!(first_granted(0, &reversed(&requests)).await, "high priority");
}

#[tokio::test(start_paused = true)]
async fn test_lowest_token_count_wins_when_priority_is_equal() {
    let requests = vec![
        request("low token count", 0.0, Some(1.0)),
        request("high token count", 0.0, Some(10.0)),
    ];

    assert_eq!(first_granted(0, &requests).await, "low token count");
    assert_eq!(first_granted(0, &reversed(&requests)).await, "low token count");
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_resolves_first_after_one_fill() {
    let scheduler = scheduler(0, None);

    let mut low = scheduler.enqueue(EnqueueOptions::new().with_priority(0));
    let mut high = scheduler.enqueue(EnqueueOptions::new().with_priority(100));

    tokio::time::advance(FILL_TIME).await;
    settle().await;

    assert_eq!(high.try_outcome(), Some(Ok(())));
    assert!(low.try_outcome().is_none());

    tokio::time::advance(FILL_TIME).await;
    settle().await;
    assert_eq!(low.try_outcome(), Some(Ok(())));
}

#[tokio::test(start_paused = true)]
async fn test_cheap_request_resolves_first_after_one_fill() {
    let scheduler = scheduler(0, None);

    let mut cheap = scheduler.enqueue(EnqueueOptions::new().with_priority(0).with_tokens(1));
    let mut expensive = scheduler.enqueue(EnqueueOptions::new().with_priority(0).with_tokens(10));

    tokio::time::advance(FILL_TIME).await;
    settle().await;

    assert_eq!(cheap.try_outcome(), Some(Ok(())));
    assert!(expensive.try_outcome().is_none());
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_options_use_defaults() {
    let requests = vec![
        WorkloadRequest::new("zero").with_priority(0),
        WorkloadRequest::new("nan").with_priority(f64::NAN).with_tokens(2.5),
        WorkloadRequest::new("two").with_priority(2),
    ];

    let scheduler = scheduler(0, None);
    let outcomes = run_workload(&scheduler, &requests).await;
    let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();

    // NaN priority ranks as 1, fractional tokens cost 1
    assert_eq!(names, vec!["two", "nan", "zero"]);
    assert_eq!(outcomes[1].priority, 1.0);
    assert_eq!(outcomes[1].cost, 1);
}

// =============================================================================
// Queue limit
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_limit_evicts_low_priority() {
    let requests = vec![request("low priority", 0.0, None), request("high priority", 100.0, None)];

    assert_eq!(evicted(&requests).await, vec!["low priority"]);
    assert_eq!(evicted(&reversed(&requests)).await, vec!["low priority"]);
}

#[tokio::test(start_paused = true)]
async fn test_limit_priority_wins_over_token_count() {
    let requests = vec![
        request("low priority", 0.0, Some(1.0)),
        request("high priority", 100.0, Some(10.0)),
    ];

    assert_eq!(evicted(&requests).await, vec!["low priority"]);
    assert_eq!(evicted(&reversed(&requests)).await, vec!["low priority"]);
}

#[tokio::test(start_paused = true)]
async fn test_limit_evicts_high_token_count_when_priority_is_equal() {
    let requests = vec![
        request("low token count", 0.0, Some(1.0)),
        request("high token count", 0.0, Some(10.0)),
    ];

    assert_eq!(evicted(&requests).await, vec!["high token count"]);
    assert_eq!(evicted(&reversed(&requests)).await, vec!["high token count"]);
}

#[tokio::test(start_paused = true)]
async fn test_limit_counts_only_requests_left_pending() {
    let scheduler = scheduler(1, Some(1));

    let mut first = scheduler.enqueue(EnqueueOptions::default());
    let mut second = scheduler.enqueue(EnqueueOptions::default());

    // The first drain granted `first`, so only one request is pending
    assert_eq!(first.try_outcome(), Some(Ok(())));
    assert!(second.try_outcome().is_none());

    let mut third = scheduler.enqueue(EnqueueOptions::new().with_priority(0));
    assert_eq!(
        third.try_outcome(),
        Some(Err(AdmissionError::Overflow(BucketOverflowError)))
    );
    assert_eq!(scheduler.stats().total_evicted, 1);

    tokio::time::advance(FILL_TIME).await;
    settle().await;
    assert_eq!(second.try_outcome(), Some(Ok(())));
}

#[tokio::test(start_paused = true)]
async fn test_limit_rejects_exactly_one_per_overflow() {
    let scheduler = scheduler(0, Some(3));

    let mut admissions: Vec<_> = [5.0, 1.0, 9.0, 3.0]
        .into_iter()
        .map(|p| scheduler.enqueue(EnqueueOptions::new().with_priority(p)))
        .collect();

    let outcomes: Vec<_> = admissions.iter_mut().map(|a| a.try_outcome()).collect();
    assert_eq!(
        outcomes,
        vec![
            None,
            Some(Err(AdmissionError::Overflow(BucketOverflowError))),
            None,
            None
        ]
    );
    assert_eq!(scheduler.len(), 3);
}

// =============================================================================
// Timer and bookkeeping
// =============================================================================

/// Bucket that never refills on its own; tests top it up directly
struct ManualBucket {
    tokens: Arc<AtomicU64>,
    takes: Arc<AtomicU64>,
    wait: Duration,
}

impl TokenBucket for ManualBucket {
    fn take(&mut self, cost: u64) -> Duration {
        self.takes.fetch_add(1, Ordering::SeqCst);
        let available = self.tokens.load(Ordering::SeqCst);
        if available >= cost {
            self.tokens.store(available - cost, Ordering::SeqCst);
            Duration::ZERO
        } else {
            self.wait
        }
    }

    fn available(&self) -> f64 {
        self.tokens.load(Ordering::SeqCst) as f64
    }
}

fn manual_scheduler() -> (Scheduler<ManualBucket>, Arc<AtomicU64>, Arc<AtomicU64>) {
    let tokens = Arc::new(AtomicU64::new(0));
    let takes = Arc::new(AtomicU64::new(0));
    let bucket = ManualBucket {
        tokens: Arc::clone(&tokens),
        takes: Arc::clone(&takes),
        wait: Duration::from_millis(100),
    };
    let scheduler = Scheduler::with_bucket(bucket, SchedulerConfig::default()).expect("Failed to create scheduler");
    (scheduler, tokens, takes)
}

#[tokio::test(start_paused = true)]
async fn test_one_retry_timer_while_blocked() {
    let (scheduler, _tokens, takes) = manual_scheduler();

    let _admissions: Vec<_> = (0..5).map(|_| scheduler.enqueue(EnqueueOptions::default())).collect();
    assert_eq!(takes.load(Ordering::SeqCst), 5);

    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // A single timer fired, so a single drain asked the bucket once more
    assert_eq!(takes.load(Ordering::SeqCst), 6);
    assert!(scheduler.has_pending_retry());
}

#[tokio::test(start_paused = true)]
async fn test_retry_uses_reported_wait() {
    let (scheduler, tokens, _takes) = manual_scheduler();
    let mut admission = scheduler.enqueue(EnqueueOptions::new().with_tokens(2));

    tokens.store(2, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(99)).await;
    settle().await;
    assert!(admission.try_outcome().is_none());

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(admission.try_outcome(), Some(Ok(())));
    assert!(!scheduler.has_pending_retry());
}

#[tokio::test(start_paused = true)]
async fn test_every_request_completes_exactly_once() {
    let scheduler = scheduler(2, Some(4));

    let requests: Vec<_> = (0..10)
        .map(|i| WorkloadRequest::new(format!("req-{}", i)).with_priority(i % 3).with_tokens(1 + i % 2))
        .collect();
    let outcomes = run_workload(&scheduler, &requests).await;

    assert_eq!(outcomes.len(), requests.len());
    let mut names: Vec<_> = outcomes.iter().map(|o| o.name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), requests.len());

    let stats = scheduler.stats();
    assert_eq!(stats.total_enqueued, 10);
    assert_eq!(stats.total_granted + stats.total_evicted, 10);
    assert_eq!(
        stats.total_granted as usize,
        outcomes.iter().filter(|o| o.is_granted()).count()
    );
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cost_over_capacity_stays_pending() {
    let scheduler = scheduler(10, None);
    let mut oversized = scheduler.enqueue(EnqueueOptions::new().with_priority(100).with_tokens(11));

    tokio::time::advance(Duration::from_secs(3600)).await;
    settle().await;

    assert!(oversized.try_outcome().is_none());
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_scheduler_closes_admissions() {
    let scheduler = scheduler(0, None);
    let admission = scheduler.enqueue(EnqueueOptions::default());
    drop(scheduler);

    assert_eq!(admission.await, Err(AdmissionError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_shared_across_tasks() {
    let scheduler = scheduler(0, None);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait(EnqueueOptions::new().with_priority(i)).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(()));
    }
    assert_eq!(scheduler.stats().total_granted, 3);
}
