#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # resilience-driver
//!
//! Drives repeated outbound calls through a resilience policy until a target number of
//! successes is reached or an attempt ceiling is hit, recording per-invocation latencies and
//! run totals.
//!
//! ## Pieces
//!
//! - **Attempt loop** ([`RequestDriver`]): bounded, sequential attempts per subject, with
//!   cancellation and concurrent multi-subject runs
//! - **Metrics** ([`ResilienceModuleMetrics`]): success/error latency sequences plus totals
//!   finalized exactly once
//! - **Policies** ([`PolicyExecutor`]): retry with backoff and jitter, circuit breaker,
//!   timeout, fallback, and composition via [`PolicyWrap`]
//! - **Transports** ([`Transport`]): anything that can issue one status call; tower services
//!   plug in through [`transport::ServiceTransport`]
//!
//! ## Quick Start
//!
//! ```rust
//! use resilience_driver::prelude::*;
//! use resilience_driver::transport::{ServiceTransport, StatusRequest, TransportError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = ServiceTransport::new(tower::service_fn(|_: StatusRequest| async {
//!         Ok::<_, TransportError>(CallResponse::ok())
//!     }));
//!     let retry = RetryPolicy::<AttemptError>::builder()
//!         .max_attempts(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(50)))
//!         .build()
//!         .unwrap();
//!
//!     let metrics = RequestDriver::new(transport).run_attempts(&retry, 1, 5, 20).await.unwrap();
//!     assert!(metrics.goal_met(5));
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
#[cfg(feature = "serde")]
pub mod config;
pub mod driver;
pub mod error;
pub mod jitter;
pub mod metrics;
pub mod policy;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod summary;
pub mod timeout;
pub mod transport;

// Re-exports
pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, MonotonicClock};
#[cfg(feature = "serde")]
pub use config::{ConfigError, PolicyConfig, RunRequest};
pub use driver::RequestDriver;
pub use error::{AttemptError, DriverError, ResilienceError, TransportFailure};
pub use jitter::Jitter;
pub use metrics::{AttemptOutcome, MetricsError, ResilienceModuleMetrics, RunTotals};
pub use policy::{
    work_unit, AttemptResult, CapturedOutcome, FallbackPolicy, NoOpPolicy, PolicyExecutor,
    PolicyWrap, WorkUnit,
};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use summary::LatencySummary;
pub use timeout::TimeoutPolicy;
pub use transport::{CallResponse, Transport, TransportError};
