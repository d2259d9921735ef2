//! Timeout policy.
//!
//! Bounds each invocation of the wrapped work. When the deadline passes the inner future is
//! dropped and the caller gets `ResilienceError::Timeout`.

use crate::error::AttemptError;
use crate::policy::{CapturedOutcome, PolicyExecutor, WorkUnit};
use crate::ResilienceError;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout must be greater than zero")]
    Zero,
    #[error("timeout must be finite")]
    Unbounded,
}

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::Zero);
        }
        if duration == Duration::MAX {
            return Err(TimeoutError::Unbounded);
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn call<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::debug!(?elapsed, timeout = ?self.duration, "invocation timed out");
                Err(ResilienceError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}

impl PolicyExecutor for TimeoutPolicy {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move {
            let result: Result<_, ResilienceError<AttemptError>> = self.call(|| work()).await;
            CapturedOutcome::from(result)
        })
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}
