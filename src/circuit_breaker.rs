//! Circuit breaker with lock-free state transitions.
//!
//! - **Closed**: invocations pass through; consecutive failures are counted and reaching
//!   `failure_threshold` opens the circuit. Any success resets the count.
//! - **Open**: the work is not invoked; callers get `ResilienceError::CircuitOpen` until
//!   `recovery_timeout` has elapsed.
//! - **HalfOpen**: up to `half_open_max_calls` probes pass. A successful probe closes the circuit,
//!   a failed one reopens it.
//!
//! Clones share state, so one breaker can guard several concurrent subjects.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{AttemptError, ResilienceError};
use crate::policy::{CapturedOutcome, PolicyExecutor, WorkUnit};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Validated breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("recovery_timeout must be > 0 (got {0:?})")]
    InvalidRecoveryTimeout(Duration),
    #[error("half_open_max_calls must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
        half_open_max_calls: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if recovery_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidRecoveryTimeout(recovery_timeout));
        }
        if half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        Ok(Self { failure_threshold, recovery_timeout, half_open_max_calls })
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Releases a half-open probe slot when the probe finishes or is dropped.
struct ProbeSlot<'a>(&'a AtomicUsize);

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        // Slots held across a reset must not wrap the counter.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<BreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    /// Breaker with a single half-open probe.
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        Ok(Self::with_config(CircuitBreakerConfig::new(failure_threshold, recovery_timeout, 1)?))
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(BreakerState::default()),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under breaker protection; every error counts toward opening.
    pub async fn call<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        self.guarded(operation, |_| true).await
    }

    /// `counts_as_failure` decides which errors move the breaker toward open; other errors are
    /// returned without touching its state.
    async fn guarded<T, E, Fut, Op, P>(
        &self,
        operation: Op,
        counts_as_failure: P,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
        P: Fn(&ResilienceError<E>) -> bool + Send,
    {
        let probe = self.admit::<E>()?;
        let result = operation().await;
        drop(probe);

        match &result {
            Ok(_) => self.on_success(),
            Err(err) if counts_as_failure(err) => self.on_failure(),
            Err(_) => {}
        }
        result
    }

    /// Decide whether a call may proceed; returns the half-open slot it occupies, if any.
    fn admit<E>(&self) -> Result<Option<ProbeSlot<'_>>, ResilienceError<E>> {
        loop {
            match self.state() {
                CircuitState::Closed => return Ok(None),
                CircuitState::Open => {
                    let elapsed = self.open_for();
                    if elapsed < self.config.recovery_timeout {
                        return Err(self.rejection(elapsed));
                    }
                    if self
                        .state
                        .state
                        .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        // The transitioning caller is the first probe.
                        self.state.half_open_calls.store(1, Ordering::Release);
                        tracing::info!("circuit breaker -> half-open");
                        return Ok(Some(ProbeSlot(&self.state.half_open_calls)));
                    }
                }
                CircuitState::HalfOpen => {
                    let in_flight = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    let slot = ProbeSlot(&self.state.half_open_calls);
                    if in_flight >= self.config.half_open_max_calls {
                        return Err(self.rejection(self.open_for()));
                    }
                    tracing::debug!(in_flight = in_flight + 1, "circuit breaker half-open probe");
                    return Ok(Some(slot));
                }
            }
        }
    }

    fn open_for(&self) -> Duration {
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        Duration::from_millis(self.clock.now_millis().saturating_sub(opened_at))
    }

    fn rejection<E>(&self, open_duration: Duration) -> ResilienceError<E> {
        ResilienceError::CircuitOpen {
            failure_count: self.state.failure_count.load(Ordering::Acquire),
            open_duration,
        }
    }

    fn on_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                if self.transition(STATE_HALF_OPEN, STATE_CLOSED) {
                    self.state.failure_count.store(0, Ordering::Release);
                    tracing::info!("circuit breaker -> closed");
                }
            }
            CircuitState::Closed => self.state.failure_count.store(0, Ordering::Release),
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state() {
            CircuitState::HalfOpen => {
                if self.transition(STATE_HALF_OPEN, STATE_OPEN) {
                    self.mark_opened();
                    tracing::warn!(failures, "circuit breaker probe failed -> open");
                }
            }
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                if self.transition(STATE_CLOSED, STATE_OPEN) {
                    self.mark_opened();
                    tracing::warn!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn mark_opened(&self) {
        self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
    }
}

impl PolicyExecutor for CircuitBreakerPolicy {
    fn execute(&self, work: WorkUnit) -> BoxFuture<'_, CapturedOutcome> {
        Box::pin(async move {
            let result = self
                .guarded(
                    || work(),
                    |err: &ResilienceError<AttemptError>| match err {
                        ResilienceError::Inner(e) => e.is_retryable(),
                        ResilienceError::Timeout { .. } | ResilienceError::RetryExhausted { .. } => {
                            true
                        }
                        ResilienceError::CircuitOpen { .. } => false,
                    },
                )
                .await;
            CapturedOutcome::from(result)
        })
    }

    fn name(&self) -> &'static str {
        "circuit-breaker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportFailure;
    use crate::policy::work_unit;
    use crate::transport::CallResponse;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Clone, Default)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Work that fails while `failing` is set and counts its invocations.
    fn switchable(failing: Arc<AtomicBool>, calls: Arc<AtomicUsize>) -> WorkUnit {
        work_unit(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let fail = failing.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(ResilienceError::Inner(TransportFailure::status(503).into()))
                } else {
                    Ok(CallResponse::ok())
                }
            }
        })
    }

    #[test]
    fn rejects_invalid_config() {
        assert_eq!(
            CircuitBreakerPolicy::new(0, Duration::from_secs(1)).unwrap_err(),
            CircuitBreakerError::InvalidFailureThreshold { provided: 0 }
        );
        assert_eq!(
            CircuitBreakerPolicy::new(1, Duration::ZERO).unwrap_err(),
            CircuitBreakerError::InvalidRecoveryTimeout(Duration::ZERO)
        );
        assert_eq!(
            CircuitBreakerConfig::new(1, Duration::from_secs(1), 0).unwrap_err(),
            CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 }
        );
    }

    #[tokio::test]
    async fn opens_after_threshold_and_short_circuits() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10))
            .unwrap()
            .with_clock(ManualClock::default());
        let failing = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let work = switchable(failing, calls.clone());

        for _ in 0..3 {
            assert!(!breaker.execute(Arc::clone(&work)).await.is_successful());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        match breaker.execute(Arc::clone(&work)).await {
            CapturedOutcome::Failed(err) => assert!(err.is_circuit_open()),
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke the work");
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let clock = ManualClock::default();
        let breaker =
            CircuitBreakerPolicy::new(1, Duration::from_millis(500)).unwrap().with_clock(clock.clone());
        let failing = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let work = switchable(failing.clone(), calls.clone());

        let _ = breaker.execute(Arc::clone(&work)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(500);
        failing.store(false, Ordering::SeqCst);
        assert!(breaker.execute(Arc::clone(&work)).await.is_successful());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_at_most_the_configured_probes() {
        let clock = ManualClock::default();
        let config = CircuitBreakerConfig::new(1, Duration::from_millis(100), 2).unwrap();
        let breaker = CircuitBreakerPolicy::with_config(config).with_clock(clock.clone());
        let tripping = switchable(Arc::new(AtomicBool::new(true)), Arc::new(AtomicUsize::new(0)));
        let _ = breaker.execute(tripping).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(100);

        let (release, gate) = tokio::sync::watch::channel(false);
        let started = Arc::new(AtomicUsize::new(0));
        let held = {
            let started = started.clone();
            work_unit(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let mut gate = gate.clone();
                async move {
                    let _ = gate.wait_for(|open| *open).await;
                    Ok(CallResponse::ok())
                }
            })
        };

        let in_flight: Vec<_> = (0..2)
            .map(|_| {
                let breaker = breaker.clone();
                let work = Arc::clone(&held);
                tokio::spawn(async move { breaker.execute(work).await })
            })
            .collect();
        while started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        match breaker.execute(Arc::clone(&held)).await {
            CapturedOutcome::Failed(err) => assert!(err.is_circuit_open()),
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(started.load(Ordering::SeqCst), 2, "rejected call must not invoke the work");

        release.send(true).unwrap();
        for handle in in_flight {
            assert!(handle.await.unwrap().is_successful());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let clock = ManualClock::default();
        let breaker =
            CircuitBreakerPolicy::new(1, Duration::from_millis(100)).unwrap().with_clock(clock.clone());
        let work = switchable(Arc::new(AtomicBool::new(true)), Arc::new(AtomicUsize::new(0)));

        let _ = breaker.execute(Arc::clone(&work)).await;
        clock.advance(100);
        let _ = breaker.execute(Arc::clone(&work)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = CircuitBreakerPolicy::new(2, Duration::from_secs(1)).unwrap();
        let failing = Arc::new(AtomicBool::new(true));
        let work = switchable(failing.clone(), Arc::new(AtomicUsize::new(0)));

        let _ = breaker.execute(Arc::clone(&work)).await;
        failing.store(false, Ordering::SeqCst);
        let _ = breaker.execute(Arc::clone(&work)).await;
        failing.store(true, Ordering::SeqCst);
        let _ = breaker.execute(Arc::clone(&work)).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn faults_do_not_trip_the_breaker() {
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(1)).unwrap();
        let work = work_unit(|| async {
            Err(ResilienceError::Inner(AttemptError::Fault("bad url".into())))
        });
        let outcome = breaker.execute(work).await;
        assert_eq!(outcome.fault(), Some("bad url"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn generic_call_counts_every_error() {
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(60)).unwrap();
        let result = breaker
            .call(|| async {
                Err::<(), _>(ResilienceError::Inner(std::io::Error::new(std::io::ErrorKind::Other, "x")))
            })
            .await;
        assert!(result.unwrap_err().is_inner());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
