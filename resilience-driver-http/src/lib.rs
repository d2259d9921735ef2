//! HTTP transport for `resilience-driver`.
//!
//! [`HttpTransport`] issues `GET {base_url}{status_path}` per invocation and reports only the
//! status code. Connection-level failures are expected outcomes (the backend under test is
//! being fault-injected); a request that cannot even be built is a collaborator fault.

use async_trait::async_trait;
use resilience_driver::config::{ConfigError, RunRequest};
use resilience_driver::transport::{CallResponse, Transport, TransportError};
use resilience_driver::{DriverError, PolicyExecutor, ResilienceModuleMetrics};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STATUS_PATH: &str = "/status/200";
pub const BACKEND_URL_ENV: &str = "RESILIENCE_BACKEND_URL";
pub const STATUS_PATH_ENV: &str = "RESILIENCE_STATUS_PATH";

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid backend url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where and how to reach the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: String,
    pub status_path: String,
    /// Per-request timeout enforced by the client; expiry counts as an unreachable backend.
    pub request_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
            request_timeout: None,
            pool_max_idle_per_host: 500,
        }
    }

    /// Read `RESILIENCE_BACKEND_URL` (required) and `RESILIENCE_STATUS_PATH` (optional).
    pub fn from_env() -> Result<Self, HttpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, HttpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(BACKEND_URL_ENV).ok_or(HttpError::MissingEnv(BACKEND_URL_ENV))?;
        let mut config = Self::new(base_url);
        if let Some(path) = lookup(STATUS_PATH_ENV) {
            config.status_path = path;
        }
        Ok(config)
    }

    pub fn with_status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// `base_url` and `status_path` joined with exactly one slash.
    pub fn status_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.status_path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let mut builder =
            reqwest::Client::builder().pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Self::with_client(builder.build()?, config)
    }

    pub fn with_client(client: reqwest::Client, config: &HttpConfig) -> Result<Self, HttpError> {
        let raw = config.status_url();
        let url = reqwest::Url::parse(&raw)
            .map_err(|e| HttpError::InvalidUrl { url: raw.clone(), reason: e.to_string() })?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self) -> Result<CallResponse, TransportError> {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => Ok(CallResponse::new(response.status().as_u16())),
            Err(err) if err.is_builder() => Err(TransportError::Fault(err.to_string())),
            Err(err) => {
                tracing::debug!(error = %err, url = %self.url, "backend unreachable");
                Err(TransportError::Unreachable(err.to_string()))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid run request: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bounds(#[from] DriverError),
}

/// Bounds and policy for one run, taken from an orchestrator request body.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub target: usize,
    pub max: usize,
    pub policy: Arc<dyn PolicyExecutor>,
}

impl RunPlan {
    /// Negative bounds are rejected with [`DriverError::InvalidState`].
    pub fn from_request(request: &RunRequest) -> Result<Self, PlanError> {
        let (target, max) = request.validate()?;
        let policy = request.policy()?.build()?;
        Ok(Self { target, max, policy })
    }

    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        Self::from_request(&RunRequest::from_json(raw)?)
    }
}

/// One JSON record per subject, in subject order.
///
/// Finished runs serialize their metrics; cancelled runs add `"cancelled": true` to their
/// partial metrics; anything else becomes an error record.
pub fn report(
    subjects: &[u64],
    results: &[Result<ResilienceModuleMetrics, DriverError>],
) -> serde_json::Value {
    let records = subjects
        .iter()
        .zip(results)
        .map(|(subject_id, result)| match result {
            Ok(metrics) => metrics.to_json(),
            Err(DriverError::Cancelled { metrics }) => {
                let mut record = metrics.to_json();
                record["cancelled"] = serde_json::Value::Bool(true);
                record
            }
            Err(err) => serde_json::json!({
                "subjectId": subject_id,
                "error": true,
                "errorMessage": err.to_string(),
            }),
        })
        .collect();
    serde_json::Value::Array(records)
}
