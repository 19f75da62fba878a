//! Time-bounded calls to external collaborators.
//!
//! The guarded future runs as its own task. When the budget elapses the
//! caller stops waiting and receives the fallback, but the task is detached
//! rather than aborted: it may still finish later and produce side effects.
//! Only idempotent, keyed writes may sit behind a guard.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
}

impl<T> GuardOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, GuardOutcome::Completed(_))
    }

    pub fn unwrap_or(self, fallback: T) -> T {
        match self {
            GuardOutcome::Completed(value) => value,
            _ => fallback,
        }
    }
}

impl<T: Default> GuardOutcome<T> {
    pub fn unwrap_or_default(self) -> T {
        self.unwrap_or(T::default())
    }
}

/// Runs `call` with a deadline. A zero budget runs it inline with no deadline.
pub async fn guarded_outcome<F, T, E>(label: &'static str, budget: Duration, call: F) -> GuardOutcome<T>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    if budget.is_zero() {
        return match call.await {
            Ok(value) => GuardOutcome::Completed(value),
            Err(err) => {
                tracing::warn!(call = label, error = %err, "unguarded call failed");
                GuardOutcome::Failed(err.to_string())
            }
        };
    }

    let handle = tokio::spawn(call);
    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(Ok(value))) => GuardOutcome::Completed(value),
        Ok(Ok(Err(err))) => {
            tracing::warn!(call = label, error = %err, "guarded call failed");
            GuardOutcome::Failed(err.to_string())
        }
        Ok(Err(join_err)) => {
            tracing::warn!(call = label, error = %join_err, "guarded call panicked");
            GuardOutcome::Failed(join_err.to_string())
        }
        Err(_) => {
            tracing::warn!(
                call = label,
                budget_ms = budget.as_millis() as u64,
                "guarded call timed out, detaching"
            );
            GuardOutcome::TimedOut
        }
    }
}

/// Like [`guarded_outcome`], collapsing every non-success into `fallback`.
pub async fn guarded<F, T, E>(label: &'static str, budget: Duration, fallback: T, call: F) -> T
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    guarded_outcome(label, budget, call).await.unwrap_or(fallback)
}
