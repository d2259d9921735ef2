//! The attempt loop.
//!
//! [`RequestDriver`] issues policy-wrapped calls against one [`Transport`] until the run has
//! `target` successes or has made `max` attempts, whichever comes first:
//!
//! ```text
//! while successful < target && total < max:
//!     outcome = policy.execute(work)      // work may run 0..n times
//!     drain invocation outcomes into metrics
//!     total += 1; successful += outcome.is_successful()
//! register_totals(total, successful, elapsed)
//! ```
//!
//! Every invocation of the work unit is timed by an [`AttemptTimer`] and reported over a
//! run-private channel; the loop drains it after each policy execution and is the only writer
//! of the run's [`ResilienceModuleMetrics`]. Transport failures are metrics, never errors.
//! A collaborator fault aborts the run, and a resolved cancellation signal finalizes the totals
//! of completed attempts and returns them inside [`DriverError::Cancelled`].
//!
//! ```rust
//! use resilience_driver::prelude::*;
//! use resilience_driver::transport::{ServiceTransport, StatusRequest, TransportError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let transport = ServiceTransport::new(tower::service_fn(|_: StatusRequest| async {
//!     Ok::<_, TransportError>(CallResponse::ok())
//! }));
//! let driver = RequestDriver::new(transport);
//! let metrics = driver.run_attempts(&NoOpPolicy, 1, 3, 10).await.unwrap();
//! assert_eq!(metrics.total_requests(), 3);
//! assert_eq!(metrics.success_count(), 3);
//! # });
//! ```

use crate::error::{AttemptError, DriverError, ResilienceError, TransportFailure};
use crate::metrics::{AttemptOutcome, ResilienceModuleMetrics};
use crate::policy::{work_unit, PolicyExecutor, WorkUnit};
use crate::transport::{classify, Transport, TransportError};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Times one invocation of the work unit and reports it exactly once.
///
/// Dropping the timer without consuming it counts as a failed invocation; this is how an
/// invocation abandoned by its policy (a timeout, for instance) still shows up in the metrics.
#[derive(Debug)]
pub(crate) struct AttemptTimer {
    started: Instant,
    outcomes: Option<UnboundedSender<AttemptOutcome>>,
}

impl AttemptTimer {
    pub(crate) fn start(outcomes: UnboundedSender<AttemptOutcome>) -> Self {
        Self { started: Instant::now(), outcomes: Some(outcomes) }
    }

    pub(crate) fn succeed(mut self) {
        self.report(true);
    }

    pub(crate) fn fail(mut self) {
        self.report(false);
    }

    /// Stop timing without recording anything.
    pub(crate) fn discard(mut self) {
        self.outcomes = None;
    }

    fn report(&mut self, succeeded: bool) {
        if let Some(outcomes) = self.outcomes.take() {
            let latency = self.started.elapsed();
            // A closed channel means the run is over.
            let _ = outcomes.send(AttemptOutcome { latency, succeeded });
        }
    }
}

impl Drop for AttemptTimer {
    fn drop(&mut self) {
        self.report(false);
    }
}

/// Drives bounded, policy-wrapped attempts against a transport.
pub struct RequestDriver<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: ?Sized> Clone for RequestDriver<T> {
    fn clone(&self) -> Self {
        Self { transport: Arc::clone(&self.transport) }
    }
}

impl<T: ?Sized> std::fmt::Debug for RequestDriver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDriver").finish_non_exhaustive()
    }
}

impl<T> RequestDriver<T>
where
    T: Transport + 'static,
{
    pub fn new(transport: T) -> Self {
        Self { transport: Arc::new(transport) }
    }
}

impl<T> RequestDriver<T>
where
    T: Transport + ?Sized + 'static,
{
    /// Share an existing transport, e.g. an `Arc<dyn Transport>`.
    pub fn from_arc(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Run attempts for `subject_id` until `target` successes or `max` attempts.
    pub async fn run_attempts<P>(
        &self,
        policy: &P,
        subject_id: u64,
        target: usize,
        max: usize,
    ) -> Result<ResilienceModuleMetrics, DriverError>
    where
        P: PolicyExecutor + ?Sized,
    {
        self.run_attempts_until(policy, subject_id, target, max, std::future::pending()).await
    }

    /// Like [`run_attempts`](Self::run_attempts), but stops when `cancel` resolves.
    ///
    /// On cancellation the in-flight attempt is abandoned and not counted; the returned
    /// [`DriverError::Cancelled`] carries metrics finalized over the completed attempts.
    /// Invocations the abandoned attempt already finished (earlier retries, say) stay in the
    /// latency sequences, so `invocations()` can exceed `total_requests()`.
    pub async fn run_attempts_until<P, C>(
        &self,
        policy: &P,
        subject_id: u64,
        target: usize,
        max: usize,
        cancel: C,
    ) -> Result<ResilienceModuleMetrics, DriverError>
    where
        P: PolicyExecutor + ?Sized,
        C: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let work = self.work_unit(tx);
        let mut metrics = ResilienceModuleMetrics::new(subject_id);
        let started = Instant::now();
        let mut total = 0usize;
        let mut successful = 0usize;
        tokio::pin!(cancel);

        while successful < target && total < max {
            let mut attempt = policy.execute(Arc::clone(&work));
            let outcome = tokio::select! {
                biased;
                _ = &mut cancel => None,
                outcome = &mut attempt => Some(outcome),
            };

            let Some(outcome) = outcome else {
                rx.close();
                drop(attempt);
                drain(&mut rx, &mut metrics)?;
                metrics.register_totals(total, successful, started.elapsed())?;
                tracing::warn!(
                    subject_id,
                    total,
                    successful,
                    policy = policy.name(),
                    "run cancelled; returning partial metrics"
                );
                return Err(DriverError::Cancelled { metrics: Box::new(metrics) });
            };

            drain(&mut rx, &mut metrics)?;
            if let Some(reason) = outcome.fault() {
                tracing::error!(subject_id, attempt = total + 1, reason, "collaborator fault");
                return Err(DriverError::CollaboratorFault {
                    subject_id,
                    reason: reason.to_string(),
                });
            }

            total += 1;
            if outcome.is_successful() {
                successful += 1;
            }
            tracing::debug!(
                subject_id,
                attempt = total,
                successful,
                ok = outcome.is_successful(),
                "attempt finished"
            );
        }

        let elapsed = started.elapsed();
        metrics.register_totals(total, successful, elapsed)?;
        tracing::info!(
            subject_id,
            total,
            successful,
            target,
            max,
            ?elapsed,
            policy = policy.name(),
            "run completed"
        );
        Ok(metrics)
    }

    /// One independent run per subject, executed concurrently. Results keep subject order.
    pub async fn run_subjects<P, I>(
        &self,
        policy: &P,
        subjects: I,
        target: usize,
        max: usize,
    ) -> Vec<Result<ResilienceModuleMetrics, DriverError>>
    where
        P: PolicyExecutor + ?Sized,
        I: IntoIterator<Item = u64>,
    {
        self.run_subjects_until(policy, subjects, target, max, |_| std::future::pending()).await
    }

    /// Like [`run_subjects`](Self::run_subjects); `cancel` builds each subject's signal.
    pub async fn run_subjects_until<P, I, F, C>(
        &self,
        policy: &P,
        subjects: I,
        target: usize,
        max: usize,
        mut cancel: F,
    ) -> Vec<Result<ResilienceModuleMetrics, DriverError>>
    where
        P: PolicyExecutor + ?Sized,
        I: IntoIterator<Item = u64>,
        F: FnMut(u64) -> C,
        C: Future<Output = ()>,
    {
        let runs = subjects.into_iter().map(|subject_id| {
            let signal = cancel(subject_id);
            self.run_attempts_until(policy, subject_id, target, max, signal)
        });
        join_all(runs).await
    }

    /// The unit of work: one transport call, timed, classified, and reported.
    fn work_unit(&self, outcomes: UnboundedSender<AttemptOutcome>) -> WorkUnit {
        let transport = Arc::clone(&self.transport);
        work_unit(move || {
            let transport = Arc::clone(&transport);
            let outcomes = outcomes.clone();
            async move {
                let timer = AttemptTimer::start(outcomes);
                match transport.send().await {
                    Ok(response) => match classify(response) {
                        Ok(response) => {
                            timer.succeed();
                            Ok(response)
                        }
                        Err(failure) => {
                            timer.fail();
                            Err(ResilienceError::Inner(AttemptError::Transport(failure)))
                        }
                    },
                    Err(TransportError::Unreachable(reason)) => {
                        timer.fail();
                        Err(ResilienceError::Inner(AttemptError::Transport(
                            TransportFailure::unreachable(reason),
                        )))
                    }
                    Err(TransportError::Fault(reason)) => {
                        timer.discard();
                        Err(ResilienceError::Inner(AttemptError::Fault(reason)))
                    }
                }
            }
        })
    }
}

fn drain(
    outcomes: &mut UnboundedReceiver<AttemptOutcome>,
    metrics: &mut ResilienceModuleMetrics,
) -> Result<(), DriverError> {
    while let Ok(outcome) = outcomes.try_recv() {
        metrics.record(outcome)?;
    }
    Ok(())
}
