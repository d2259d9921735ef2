//! Serde-backed configuration: policy descriptions and run requests.
//!
//! A [`PolicyConfig`] is a tagged JSON document naming a pattern and its parameters:
//!
//! ```rust
//! use resilience_driver::config::PolicyConfig;
//!
//! let config = PolicyConfig::from_json(r#"{
//!     "pattern": "composite",
//!     "policies": [
//!         { "pattern": "retry", "count": 3, "backoff": "constant", "baseDelayMs": 0 },
//!         { "pattern": "circuitBreaker", "failureThreshold": 5, "durationOfBreakMs": 1000 }
//!     ]
//! }"#).unwrap();
//! let policy = config.build().unwrap();
//! assert_eq!(policy.name(), "composite");
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerPolicy};
use crate::error::{AttemptError, DriverError};
use crate::jitter::{Jitter, JitterError};
use crate::policy::{FallbackPolicy, NoOpPolicy, PolicyExecutor, PolicyWrap};
use crate::retry::{BuildError, RetryPolicy};
use crate::timeout::{TimeoutError, TimeoutPolicy};
use crate::transport::CallResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("retry: {0}")]
    Retry(#[from] BuildError),
    #[error("backoff: {0}")]
    Backoff(#[from] BackoffError),
    #[error("jitter: {0}")]
    Jitter(#[from] JitterError),
    #[error("circuit breaker: {0}")]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),
    #[error("fallback status {0} is not a success status")]
    FallbackStatus(u16),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    Constant,
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JitterKind {
    #[default]
    None,
    Full,
    Equal,
    Decorrelated,
}

fn default_retry_count() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_half_open_max_calls() -> usize {
    1
}

fn default_fallback_status() -> u16 {
    200
}

/// Declarative description of a policy executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "camelCase")]
pub enum PolicyConfig {
    /// Pass-through.
    None,
    #[serde(rename_all = "camelCase")]
    Retry {
        /// Retries after the initial call; `count: 3` allows 4 invocations.
        #[serde(default = "default_retry_count")]
        count: usize,
        #[serde(default)]
        backoff: BackoffKind,
        #[serde(default = "default_base_delay_ms")]
        base_delay_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_delay_ms: Option<u64>,
        #[serde(default)]
        jitter: JitterKind,
    },
    #[serde(rename_all = "camelCase")]
    CircuitBreaker {
        failure_threshold: usize,
        duration_of_break_ms: u64,
        #[serde(default = "default_half_open_max_calls")]
        half_open_max_calls: usize,
    },
    #[serde(rename_all = "camelCase")]
    Timeout { timeout_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Fallback {
        #[serde(default = "default_fallback_status")]
        status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inner: Option<Box<PolicyConfig>>,
    },
    /// Outermost first.
    Composite { policies: Vec<PolicyConfig> },
}

impl PolicyConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Validate the parameters and build the executor.
    pub fn build(&self) -> Result<Arc<dyn PolicyExecutor>, ConfigError> {
        let policy: Arc<dyn PolicyExecutor> = match self {
            PolicyConfig::None => Arc::new(NoOpPolicy),
            PolicyConfig::Retry { count, backoff, base_delay_ms, max_delay_ms, jitter } => {
                let base = Duration::from_millis(*base_delay_ms);
                let mut schedule = match backoff {
                    BackoffKind::Constant => Backoff::constant(base),
                    BackoffKind::Linear => Backoff::linear(base),
                    BackoffKind::Exponential => Backoff::exponential(base),
                };
                if let Some(max) = max_delay_ms {
                    schedule = schedule.with_max(Duration::from_millis(*max))?;
                }
                let jitter = match jitter {
                    JitterKind::None => Jitter::None,
                    JitterKind::Full => Jitter::full(),
                    JitterKind::Equal => Jitter::equal(),
                    JitterKind::Decorrelated => {
                        let max = max_delay_ms.map_or(base * 10, Duration::from_millis);
                        Jitter::decorrelated(base, max)?
                    }
                };
                let retry = RetryPolicy::<AttemptError>::builder()
                    .max_attempts(count.saturating_add(1))
                    .backoff(schedule)
                    .with_jitter(jitter)
                    .build()?;
                Arc::new(retry)
            }
            PolicyConfig::CircuitBreaker {
                failure_threshold,
                duration_of_break_ms,
                half_open_max_calls,
            } => {
                let config = CircuitBreakerConfig::new(
                    *failure_threshold,
                    Duration::from_millis(*duration_of_break_ms),
                    *half_open_max_calls,
                )?;
                Arc::new(CircuitBreakerPolicy::with_config(config))
            }
            PolicyConfig::Timeout { timeout_ms } => {
                Arc::new(TimeoutPolicy::new(Duration::from_millis(*timeout_ms))?)
            }
            PolicyConfig::Fallback { status, inner } => {
                let substitute = CallResponse::new(*status);
                if !substitute.is_success() {
                    return Err(ConfigError::FallbackStatus(*status));
                }
                match inner {
                    Some(inner) => Arc::new(FallbackPolicy::new(inner.build()?, substitute)),
                    None => Arc::new(FallbackPolicy::around_work(substitute)),
                }
            }
            PolicyConfig::Composite { policies } => {
                let layers = policies.iter().map(PolicyConfig::build).collect::<Result<_, _>>()?;
                Arc::new(PolicyWrap::new(layers))
            }
        };
        Ok(policy)
    }
}

/// Body of a run request as posted by a scenario orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub max_requests_allowed: i64,
    pub target_successful_requests: i64,
    /// Scenario parameters; a `pattern` key makes them a [`PolicyConfig`].
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RunRequest {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// `(target, max)` as loop bounds. Negative values are rejected.
    pub fn validate(&self) -> Result<(usize, usize), DriverError> {
        let target = usize::try_from(self.target_successful_requests).map_err(|_| {
            DriverError::InvalidState(format!(
                "targetSuccessfulRequests must be >= 0 (got {})",
                self.target_successful_requests
            ))
        })?;
        let max = usize::try_from(self.max_requests_allowed).map_err(|_| {
            DriverError::InvalidState(format!(
                "maxRequestsAllowed must be >= 0 (got {})",
                self.max_requests_allowed
            ))
        })?;
        Ok((target, max))
    }

    /// Policy described by `params`; pass-through when none is given.
    pub fn policy(&self) -> Result<PolicyConfig, ConfigError> {
        match &self.params {
            serde_json::Value::Object(map) if map.contains_key("pattern") => {
                PolicyConfig::from_value(self.params.clone())
            }
            _ => Ok(PolicyConfig::None),
        }
    }
}
