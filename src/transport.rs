//! Outbound call capability used by the unit of work.
//!
//! The attempt loop only cares whether a call came back with a success status. A [`Transport`]
//! issues one "GET status" call per invocation; [`classify`] turns the response into a typed
//! result the policies can reason about.

use crate::error::TransportFailure;
use async_trait::async_trait;
use std::sync::Arc;
use tower::ServiceExt;
use tower_service::Service;

/// Status-only view of a backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallResponse {
    status: u16,
}

impl CallResponse {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    /// A plain `200 OK`.
    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// 2xx counts as success; everything else is a failure.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a transport could not produce a response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connect/reset/timeout at the transport level. Treated like a failure response.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// The transport is misconfigured or broken (bad URL, request build failure). Fatal.
    #[error("transport fault: {0}")]
    Fault(String),
}

/// Issues one outbound call against the preconfigured backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self) -> Result<CallResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self) -> Result<CallResponse, TransportError> {
        (**self).send().await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self) -> Result<CallResponse, TransportError> {
        (**self).send().await
    }
}

/// Classify a response: success statuses pass through, anything else becomes a failure.
pub fn classify(response: CallResponse) -> Result<CallResponse, TransportFailure> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(TransportFailure::status(response.status()))
    }
}

/// Request marker handed to tower services wrapped by [`ServiceTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRequest;

/// Adapts any tower service answering [`StatusRequest`] into a [`Transport`].
///
/// ```rust
/// use resilience_driver::transport::{CallResponse, ServiceTransport, StatusRequest, Transport, TransportError};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = ServiceTransport::new(tower::service_fn(|_: StatusRequest| async {
///     Ok::<_, TransportError>(CallResponse::new(204))
/// }));
/// assert_eq!(transport.send().await.unwrap().status(), 204);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ServiceTransport<S> {
    service: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> Transport for ServiceTransport<S>
where
    S: Service<StatusRequest, Response = CallResponse, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn send(&self) -> Result<CallResponse, TransportError> {
        self.service.clone().oneshot(StatusRequest).await
    }
}
