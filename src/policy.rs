//! The policy capability consumed by the attempt loop.
//!
//! A [`PolicyExecutor`] wraps one attempt with resilience behavior. It receives the unit of work
//! as a cloneable [`WorkUnit`] and may invoke it any number of times (zero when a breaker is
//! open, several when retrying). Whatever it does internally, it reports a single
//! [`CapturedOutcome`] back to the loop.
//!
//! Composition works on trait objects: [`PolicyWrap`] nests executors outermost-first and
//! [`FallbackPolicy`] turns failures of an inner executor into a substitute response.
//!
//! ```rust
//! use resilience_driver::policy::{work_unit, NoOpPolicy, PolicyExecutor};
//! use resilience_driver::CallResponse;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let work = work_unit(|| async { Ok(CallResponse::ok()) });
//! let outcome = NoOpPolicy.execute(work).await;
//! assert!(outcome.is_successful());
//! # });
//! ```

use crate::error::{AttemptError, ResilienceError};
use crate::transport::CallResponse;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Result of one invocation of the unit of work.
pub type AttemptResult = Result<CallResponse, ResilienceError<AttemptError>>;

/// Zero-argument async unit of work; each call performs one outbound call.
pub type WorkUnit = Arc<dyn Fn() -> BoxFuture<'static, AttemptResult> + Send + Sync>;

/// Build a [`WorkUnit`] from a closure returning a future.
pub fn work_unit<F, Fut>(f: F) -> WorkUnit
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AttemptResult> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, AttemptResult> { Box::pin(f()) })
}

/// Final verdict of a policy on one execution.
#[derive(Debug, Clone)]
pub enum CapturedOutcome {
    /// The work eventually produced a success response, possibly after internal retries.
    Successful(CallResponse),
    /// The work never succeeded within the policy's bounds, or was short-circuited.
    Failed(ResilienceError<AttemptError>),
}

impl CapturedOutcome {
    pub fn is_successful(&self) -> bool {
        matches!(self, CapturedOutcome::Successful(_))
    }

    /// Reason of a collaborator fault carried by a failed outcome.
    pub fn fault(&self) -> Option<&str> {
        match self {
            CapturedOutcome::Failed(ResilienceError::Inner(AttemptError::Fault(reason))) => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn into_result(self) -> AttemptResult {
        self.into()
    }
}

impl From<AttemptResult> for CapturedOutcome {
    fn from(result: AttemptResult) -> Self {
        match result {
            Ok(response) => CapturedOutcome::Successful(response),
            Err(err) => CapturedOutcome::Failed(err),
        }
    }
}

impl From<CapturedOutcome> for AttemptResult {
    fn from(outcome: CapturedOutcome) -> Self {
        match outcome {
            CapturedOutcome::Successful(response) => Ok(response),
            CapturedOutcome::Failed(err) => Err(err),
        }
    }
}

/// Resilience behavior applied around a unit of work.
///
/// Implementations must only retry (or count toward breaker thresholds) errors for which
/// [`AttemptError::is_retryable`] holds; collaborator faults are handed straight back.
pub trait PolicyExecutor: Send + Sync + fmt::Debug {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

impl<P: PolicyExecutor + ?Sized> PolicyExecutor for Arc<P> {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        (**self).execute(work)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<P: PolicyExecutor + ?Sized> PolicyExecutor for Box<P> {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        (**self).execute(work)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Pass-through: invokes the work exactly once.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPolicy;

impl PolicyExecutor for NoOpPolicy {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move { CapturedOutcome::from(work().await) })
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Nests policies: the first is outermost, the last wraps the work directly.
///
/// `PolicyWrap::new(vec![retry, breaker, timeout])` retries calls that go through the breaker,
/// each bounded by the timeout. An empty wrap behaves like [`NoOpPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyWrap {
    layers: Arc<[Arc<dyn PolicyExecutor>]>,
}

impl PolicyWrap {
    pub fn new(layers: Vec<Arc<dyn PolicyExecutor>>) -> Self {
        Self { layers: layers.into() }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap `work` so that calling it runs every layer from `depth` inward.
    fn nest(layers: Arc<[Arc<dyn PolicyExecutor>]>, depth: usize, work: WorkUnit) -> WorkUnit {
        if depth + 1 >= layers.len() {
            return work;
        }
        let inner_work = Self::nest(Arc::clone(&layers), depth + 1, work);
        work_unit(move || {
            let layers = Arc::clone(&layers);
            let inner_work = Arc::clone(&inner_work);
            async move { layers[depth + 1].execute(inner_work).await.into_result() }
        })
    }
}

impl PolicyExecutor for PolicyWrap {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move {
            match self.layers.first() {
                None => CapturedOutcome::from(work().await),
                Some(outer) => {
                    let nested = Self::nest(Arc::clone(&self.layers), 0, work);
                    outer.execute(nested).await
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Substitutes a fixed response when the inner policy fails.
///
/// Collaborator faults are never masked.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    inner: Arc<dyn PolicyExecutor>,
    substitute: CallResponse,
}

impl FallbackPolicy {
    pub fn new(inner: Arc<dyn PolicyExecutor>, substitute: CallResponse) -> Self {
        Self { inner, substitute }
    }

    /// Fallback directly around the work, without another policy in between.
    pub fn around_work(substitute: CallResponse) -> Self {
        Self::new(Arc::new(NoOpPolicy), substitute)
    }

    pub fn substitute(&self) -> CallResponse {
        self.substitute
    }
}

impl PolicyExecutor for FallbackPolicy {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move {
            let outcome = self.inner.execute(work).await;
            match outcome {
                CapturedOutcome::Failed(ref err) if outcome.fault().is_none() => {
                    tracing::debug!(error = %err, status = self.substitute.status(), "fallback substituted");
                    CapturedOutcome::Successful(self.substitute)
                }
                other => other,
            }
        })
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_work(calls: Arc<AtomicUsize>, fail_first: usize) -> WorkUnit {
        work_unit(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    Err(ResilienceError::Inner(TransportFailure::status(503).into()))
                } else {
                    Ok(CallResponse::ok())
                }
            }
        })
    }

    #[derive(Debug)]
    struct Twice;

    impl PolicyExecutor for Twice {
        fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
            Box::pin(async move {
                let _ = work().await;
                CapturedOutcome::from(work().await)
            })
        }

        fn name(&self) -> &'static str {
            "twice"
        }
    }

    #[tokio::test]
    async fn noop_invokes_work_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = NoOpPolicy.execute(counting_work(calls.clone(), 1)).await;
        assert!(!outcome.is_successful());
        assert!(outcome.fault().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrap_nests_layers_outermost_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let twice: Arc<dyn PolicyExecutor> = Arc::new(Twice);
        let wrap = PolicyWrap::new(vec![Arc::clone(&twice), twice]);
        let outcome = wrap.execute(counting_work(calls.clone(), 0)).await;
        assert!(outcome.is_successful());
        assert_eq!(calls.load(Ordering::SeqCst), 4, "2 outer x 2 inner invocations");
    }

    #[tokio::test]
    async fn empty_wrap_is_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrap = PolicyWrap::new(Vec::new());
        assert!(wrap.is_empty());
        assert!(wrap.execute(counting_work(calls.clone(), 0)).await.is_successful());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_substitutes_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fallback = FallbackPolicy::around_work(CallResponse::new(203));
        match fallback.execute(counting_work(calls, 10)).await {
            CapturedOutcome::Successful(response) => assert_eq!(response.status(), 203),
            other => panic!("expected substitute, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fallback_does_not_mask_faults() {
        let fallback = FallbackPolicy::around_work(CallResponse::ok());
        let work = work_unit(|| async {
            Err(ResilienceError::Inner(AttemptError::Fault("no client".into())))
        });
        let outcome = fallback.execute(work).await;
        assert_eq!(outcome.fault(), Some("no client"));
    }

    #[test]
    fn outcome_round_trips_through_result() {
        let outcome = CapturedOutcome::from(Ok::<_, ResilienceError<AttemptError>>(
            CallResponse::new(201),
        ));
        assert_eq!(outcome.into_result().unwrap().status(), 201);
    }
}
