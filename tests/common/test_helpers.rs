#![allow(dead_code)]

use async_trait::async_trait;
use resilience_driver::transport::{CallResponse, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Transport that replays a script of results and then repeats a default.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<CallResponse, TransportError>>>,
    fallback: Result<CallResponse, TransportError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    /// Every call answers 200.
    pub fn healthy() -> Self {
        Self::statuses(&[])
    }

    /// Every call answers with `status`.
    pub fn always(status: u16) -> Self {
        Self::statuses(&[]).then(Ok(CallResponse::new(status)))
    }

    /// Answer with `statuses` in order, then 200 forever.
    pub fn statuses(statuses: &[u16]) -> Self {
        Self {
            script: Mutex::new(statuses.iter().map(|s| Ok(CallResponse::new(*s))).collect()),
            fallback: Ok(CallResponse::ok()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer with `result` once the script runs out.
    pub fn then(mut self, result: Result<CallResponse, TransportError>) -> Self {
        self.fallback = result;
        self
    }

    /// Append one scripted result.
    pub fn push(self, result: Result<CallResponse, TransportError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self) -> Result<CallResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Route `tracing` output through the test harness; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
