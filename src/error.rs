//! Error types for the attempt loop and the policies it drives.
//!
//! Three layers of failure meet here:
//! - [`TransportFailure`]: an outbound call came back with a non-success result. Expected; it is
//!   recorded as an error metric and handed to the policy so it can retry or trip a breaker.
//! - [`ResilienceError`]: what a policy reports when the wrapped work did not succeed
//!   (timeout, open circuit, exhausted retries, or the inner error itself).
//! - [`DriverError`]: what escapes a run. Transport failures never do.
use crate::metrics::{MetricsError, ResilienceModuleMetrics};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Unified error type reported by resilience policies.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The invocation exceeded the timeout duration
    Timeout { elapsed: Duration, timeout: Duration },
    /// The circuit breaker is open; the work was not invoked
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The wrapped work failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { failure_count, open_duration } => write!(
                f,
                "circuit breaker open ({} failures, open for {:?})",
                failure_count, open_duration
            ),
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "retry exhausted after {} attempts; last error: {}", attempts, last)
                }
                None => write!(f, "retry exhausted after {} attempts; no recorded failures", attempts),
            },
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Build `RetryExhausted`, keeping only the most recent `MAX_RETRY_FAILURES` failures.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let skip = failures.len().saturating_sub(MAX_RETRY_FAILURES);
        let trimmed: Vec<E> = failures.into_iter().skip(skip).collect();
        ResilienceError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access all recorded failures for RetryExhausted, if present.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }
}

/// A call that came back, but not with a success status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct TransportFailure {
    /// Status code of the response, `None` when the backend was unreachable.
    pub status: Option<u16>,
    pub reason: String,
}

impl TransportFailure {
    /// Non-success status response.
    pub fn status(status: u16) -> Self {
        Self { status: Some(status), reason: format!("non-success status {}", status) }
    }

    /// Backend could not be reached (connect error, reset, transport-level timeout).
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self { status: None, reason: reason.into() }
    }
}

/// Error raised by one invocation of the unit of work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// Expected failure; policies may retry it.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportFailure),
    /// The work itself could not be executed. Never retried; aborts the run.
    #[error("collaborator fault: {0}")]
    Fault(String),
}

impl AttemptError {
    /// Whether a policy is allowed to retry (or count toward a breaker) on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Transport(_))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, AttemptError::Fault(_))
    }
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The transport or policy failed outside the success/failure classification.
    #[error("collaborator fault during run for subject {subject_id}: {reason}")]
    CollaboratorFault { subject_id: u64, reason: String },
    /// The run was cancelled; `metrics` holds finalized totals for completed attempts.
    #[error("run cancelled; partial metrics attached")]
    Cancelled { metrics: Box<ResilienceModuleMetrics> },
    /// Programming-usage error: bad inputs or an aggregator misused.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<MetricsError> for DriverError {
    fn from(err: MetricsError) -> Self {
        DriverError::InvalidState(err.to_string())
    }
}

impl DriverError {
    /// Partial metrics attached to a cancelled run.
    pub fn partial_metrics(&self) -> Option<&ResilienceModuleMetrics> {
        match self {
            DriverError::Cancelled { metrics } => Some(metrics.as_ref()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, DriverError::CollaboratorFault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn timeout_error_display() {
        let err: ResilienceError<AttemptError> = ResilienceError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5.1"));
    }

    #[test]
    fn retry_exhausted_keeps_most_recent_failures() {
        let failures: Vec<AttemptError> =
            (0..15u16).map(|i| TransportFailure::status(500 + i).into()).collect();
        let err = ResilienceError::retry_exhausted(15, failures);
        let kept = err.failures().unwrap();
        assert_eq!(kept.len(), MAX_RETRY_FAILURES);
        assert_eq!(kept[0], AttemptError::Transport(TransportFailure::status(505)));
        assert!(err.to_string().contains("last error: transport failure: non-success status 514"));
    }

    #[test]
    fn retry_exhausted_display_handles_empty_failures() {
        let err: ResilienceError<AttemptError> = ResilienceError::retry_exhausted(3, vec![]);
        assert!(err.to_string().contains("no recorded failures"));
    }

    #[test]
    fn source_points_at_inner_error() {
        let err = ResilienceError::Inner(AttemptError::Fault("bad request".into()));
        assert!(err.source().is_some());
        let open: ResilienceError<AttemptError> =
            ResilienceError::CircuitOpen { failure_count: 2, open_duration: Duration::ZERO };
        assert!(open.source().is_none());
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(AttemptError::from(TransportFailure::status(503)).is_retryable());
        assert!(AttemptError::from(TransportFailure::unreachable("refused")).is_retryable());
        assert!(!AttemptError::Fault("no client".into()).is_retryable());
    }

    #[test]
    fn metrics_errors_become_invalid_state() {
        let err: DriverError = MetricsError::AlreadyFinalized.into();
        assert!(matches!(err, DriverError::InvalidState(_)));
    }
}
