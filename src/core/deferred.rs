//! Fire-and-forget dispatch for writes the current response does not need.
//!
//! No ordering holds between dispatched tasks. Anything a later pipeline step
//! needs must travel in the turn state, never be read back from the store.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
}

struct InFlightGuard {
    state: Arc<QueueState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.state.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

#[derive(Clone, Default)]
pub struct DeferredQueue {
    state: Arc<QueueState>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` and returns at once. Failures are logged, never surfaced.
    pub fn dispatch<F, E>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(task = label, "no async runtime, deferred task dropped");
            return;
        };

        self.state.dispatched.fetch_add(1, Ordering::Relaxed);
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            state: Arc::clone(&self.state),
        };

        runtime.spawn(async move {
            let guard = guard;
            if let Err(err) = task.await {
                guard.state.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = label, error = %err, "deferred task failed");
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn dispatched_count(&self) -> u64 {
        self.state.dispatched.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.state.failed.load(Ordering::Relaxed)
    }

    /// Resolves once nothing is in flight. Meant for shutdown and tests.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
