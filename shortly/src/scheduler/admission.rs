//! Completion handle returned to callers

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{AdmissionError, BucketOverflowError};

/// Scheduler side of an admission
pub(crate) type Completer = oneshot::Sender<Result<(), BucketOverflowError>>;

pub(crate) fn channel() -> (Completer, Admission) {
    let (tx, rx) = oneshot::channel();
    (tx, Admission { rx })
}

/// Resolves once the request is granted or evicted
///
/// Dropping an `Admission` does not withdraw the request; its tokens are
/// still taken when it reaches the head of the queue.
#[derive(Debug)]
#[must_use = "an Admission does nothing unless awaited or polled"]
pub struct Admission {
    rx: oneshot::Receiver<Result<(), BucketOverflowError>>,
}

impl Admission {
    /// Outcome without waiting; `None` while still pending
    pub fn try_outcome(&mut self) -> Option<Result<(), AdmissionError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result.map_err(AdmissionError::from)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(AdmissionError::Closed)),
        }
    }
}

impl Future for Admission {
    type Output = Result<(), AdmissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result.map_err(AdmissionError::from),
            Err(_) => Err(AdmissionError::Closed),
        })
    }
}
