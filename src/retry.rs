//! Retry policy.
//!
//! Semantics:
//! - `max_attempts` counts total invocations (initial try + retries).
//! - Only `ResilienceError::Inner(E)` values are eligible for retry; other variants (timeouts,
//!   open circuits from inner layers) return immediately.
//! - `should_retry` narrows which inner errors are retried. When used as a [`PolicyExecutor`]
//!   the policy additionally refuses to retry collaborator faults.
//! - The pause before retry `n` is `jitter(backoff.delay(n))`, applied through the `Sleeper`.
//!
//! ```rust
//! use resilience_driver::{Backoff, InstantSleeper, Jitter, ResilienceError, RetryPolicy};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Flaky;
//! impl std::fmt::Display for Flaky { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "flaky") } }
//! impl std::error::Error for Flaky {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<Flaky>::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(100)))
//!     .with_jitter(Jitter::full())
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), ResilienceError<Flaky>> =
//!     policy.call(|| async { Err(ResilienceError::Inner(Flaky)) }).await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # });
//! ```

use crate::error::{AttemptError, ResilienceError};
use crate::policy::{CapturedOutcome, PolicyExecutor, WorkUnit};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation`, retrying inner errors accepted by `should_retry`.
    pub async fn call<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let should_retry = Arc::clone(&self.should_retry);
        self.run(operation, move |e: &E| should_retry(e)).await
    }

    async fn run<T, Fut, Op, P>(&self, mut operation: Op, retryable: P) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
        P: Fn(&E) -> bool + Send,
    {
        let mut failures: Vec<E> = Vec::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(e)) => e,
                Err(other) => return Err(other),
            };
            if !retryable(&err) {
                return Err(ResilienceError::Inner(err));
            }
            failures.push(err);
            if attempt >= self.max_attempts {
                tracing::debug!(attempts = attempt, "retry exhausted");
                return Err(ResilienceError::retry_exhausted(attempt, failures));
            }
            let delay = self.next_delay(attempt);
            tracing::debug!(attempt, ?delay, "retrying after failure");
            self.sleeper.sleep(delay).await;
        }
    }

    fn next_delay(&self, retry: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(retry))
    }
}

impl PolicyExecutor for RetryPolicy<AttemptError> {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move {
            let should_retry = Arc::clone(&self.should_retry);
            let result = self
                .run(|| work(), move |e: &AttemptError| e.is_retryable() && should_retry(e))
                .await;
            CapturedOutcome::from(result)
        })
    }

    fn name(&self) -> &'static str {
        "retry"
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Three attempts, exponential backoff from 1s, full jitter, retry everything.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::full(),
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
