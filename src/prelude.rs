//! Convenient re-exports for driving runs.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerPolicy, CircuitState},
    driver::RequestDriver,
    error::{AttemptError, DriverError, ResilienceError, TransportFailure},
    jitter::Jitter,
    metrics::{AttemptOutcome, ResilienceModuleMetrics},
    policy::{
        work_unit, CapturedOutcome, FallbackPolicy, NoOpPolicy, PolicyExecutor, PolicyWrap,
        WorkUnit,
    },
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    timeout::{TimeoutError, TimeoutPolicy},
    transport::{CallResponse, Transport},
};

#[cfg(feature = "serde")]
pub use crate::config::{PolicyConfig, RunRequest};
