//! Per-run outcome and latency aggregation.
//!
//! A [`ResilienceModuleMetrics`] belongs to exactly one run. The attempt loop is its only writer:
//! every invocation of the unit of work produces one [`AttemptOutcome`], and the totals are
//! written once when the loop exits. After that the record is frozen and every `register_*`
//! call fails with [`MetricsError::AlreadyFinalized`].
//!
//! ```rust
//! use resilience_driver::ResilienceModuleMetrics;
//! use std::time::Duration;
//!
//! let mut metrics = ResilienceModuleMetrics::new(7);
//! metrics.register_error(Duration::from_millis(12)).unwrap();
//! metrics.register_success(Duration::from_millis(8)).unwrap();
//! metrics.register_totals(1, 1, Duration::from_millis(25)).unwrap();
//!
//! assert_eq!(metrics.error_count(), 1);
//! assert!(metrics.goal_met(1));
//! assert!(metrics.register_success(Duration::ZERO).is_err());
//! ```

use crate::summary::LatencySummary;
use std::time::Duration;

/// Timed outcome of a single invocation of the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub latency: Duration,
    pub succeeded: bool,
}

impl AttemptOutcome {
    pub fn success(latency: Duration) -> Self {
        Self { latency, succeeded: true }
    }

    pub fn error(latency: Duration) -> Self {
        Self { latency, succeeded: false }
    }
}

/// Final counters of a run, written exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    /// Attempts made by the loop (not work-unit invocations).
    pub total_requests: usize,
    /// Attempts whose captured outcome was `Successful`.
    pub total_successful_requests: usize,
    /// Wall-clock duration of the whole run.
    pub total_elapsed: Duration,
}

/// Misuse of a metrics record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics already finalized")]
    AlreadyFinalized,
    #[error("total_successful_requests ({successful}) exceeds total_requests ({total})")]
    InconsistentTotals { total: usize, successful: usize },
}

/// Outcome and latency record for one run of the attempt loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceModuleMetrics {
    subject_id: u64,
    success_latencies: Vec<Duration>,
    error_latencies: Vec<Duration>,
    totals: Option<RunTotals>,
}

impl ResilienceModuleMetrics {
    pub fn new(subject_id: u64) -> Self {
        Self { subject_id, success_latencies: Vec::new(), error_latencies: Vec::new(), totals: None }
    }

    fn ensure_open(&self) -> Result<(), MetricsError> {
        if self.totals.is_some() {
            return Err(MetricsError::AlreadyFinalized);
        }
        Ok(())
    }

    /// Append a successful invocation's latency.
    pub fn register_success(&mut self, latency: Duration) -> Result<(), MetricsError> {
        self.ensure_open()?;
        self.success_latencies.push(latency);
        Ok(())
    }

    /// Append a failed invocation's latency.
    pub fn register_error(&mut self, latency: Duration) -> Result<(), MetricsError> {
        self.ensure_open()?;
        self.error_latencies.push(latency);
        Ok(())
    }

    pub fn record(&mut self, outcome: AttemptOutcome) -> Result<(), MetricsError> {
        if outcome.succeeded {
            self.register_success(outcome.latency)
        } else {
            self.register_error(outcome.latency)
        }
    }

    /// Write the final counters. Fails if called twice or if the counters contradict each other.
    pub fn register_totals(
        &mut self,
        total_requests: usize,
        total_successful_requests: usize,
        total_elapsed: Duration,
    ) -> Result<(), MetricsError> {
        self.ensure_open()?;
        if total_successful_requests > total_requests {
            return Err(MetricsError::InconsistentTotals {
                total: total_requests,
                successful: total_successful_requests,
            });
        }
        self.totals = Some(RunTotals { total_requests, total_successful_requests, total_elapsed });
        Ok(())
    }

    pub fn subject_id(&self) -> u64 {
        self.subject_id
    }

    pub fn success_count(&self) -> usize {
        self.success_latencies.len()
    }

    pub fn success_latencies(&self) -> &[Duration] {
        &self.success_latencies
    }

    pub fn error_count(&self) -> usize {
        self.error_latencies.len()
    }

    pub fn error_latencies(&self) -> &[Duration] {
        &self.error_latencies
    }

    /// Number of recorded work-unit invocations (successes plus errors).
    pub fn invocations(&self) -> usize {
        self.success_count() + self.error_count()
    }

    pub fn totals(&self) -> Option<&RunTotals> {
        self.totals.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.totals.is_some()
    }

    /// Attempts made by the loop; zero until finalized.
    pub fn total_requests(&self) -> usize {
        self.totals.map_or(0, |t| t.total_requests)
    }

    /// Successful attempts; zero until finalized.
    pub fn total_successful_requests(&self) -> usize {
        self.totals.map_or(0, |t| t.total_successful_requests)
    }

    /// Run duration; zero until finalized.
    pub fn total_elapsed(&self) -> Duration {
        self.totals.map_or(Duration::ZERO, |t| t.total_elapsed)
    }

    /// Whether the run reached `target` successful attempts.
    pub fn goal_met(&self, target: usize) -> bool {
        self.total_successful_requests() >= target
    }

    pub fn success_summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_latencies(&self.success_latencies)
    }

    pub fn error_summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_latencies(&self.error_latencies)
    }

    /// Render as the JSON record exchanged with the scenario orchestrator.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

#[cfg(feature = "serde")]
fn millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResilienceModuleMetrics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Record {
            subject_id: u64,
            success_count: usize,
            success_latencies: Vec<u64>,
            error_count: usize,
            error_latencies: Vec<u64>,
            total_requests: usize,
            total_successful_requests: usize,
            total_elapsed: u64,
        }

        let record = Record {
            subject_id: self.subject_id,
            success_count: self.success_count(),
            success_latencies: self.success_latencies.iter().map(millis).collect(),
            error_count: self.error_count(),
            error_latencies: self.error_latencies.iter().map(millis).collect(),
            total_requests: self.total_requests(),
            total_successful_requests: self.total_successful_requests(),
            total_elapsed: millis(&self.total_elapsed()),
        };
        serde::Serialize::serialize(&record, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn new_record_is_empty_and_open() {
        let metrics = ResilienceModuleMetrics::new(3);
        assert_eq!(metrics.subject_id(), 3);
        assert_eq!(metrics.success_count(), 0);
        assert_eq!(metrics.error_count(), 0);
        assert!(!metrics.is_finalized());
        assert_eq!(metrics.total_requests(), 0);
        assert_eq!(metrics.total_elapsed(), Duration::ZERO);
    }

    #[test]
    fn latencies_keep_registration_order() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        metrics.register_success(ms(30)).unwrap();
        metrics.register_error(ms(5)).unwrap();
        metrics.register_success(ms(10)).unwrap();
        metrics.record(AttemptOutcome::error(ms(7))).unwrap();

        assert_eq!(metrics.success_latencies(), &[ms(30), ms(10)]);
        assert_eq!(metrics.error_latencies(), &[ms(5), ms(7)]);
        assert_eq!(metrics.success_count(), metrics.success_latencies().len());
        assert_eq!(metrics.error_count(), metrics.error_latencies().len());
        assert_eq!(metrics.invocations(), 4);
    }

    #[test]
    fn totals_are_written_once() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        metrics.register_totals(4, 2, ms(100)).unwrap();
        assert_eq!(
            metrics.totals(),
            Some(&RunTotals {
                total_requests: 4,
                total_successful_requests: 2,
                total_elapsed: ms(100)
            })
        );

        let err = metrics.register_totals(5, 5, ms(1)).unwrap_err();
        assert_eq!(err, MetricsError::AlreadyFinalized);
        assert_eq!(metrics.total_requests(), 4, "first totals survive");
    }

    #[test]
    fn finalized_record_rejects_new_outcomes() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        metrics.register_totals(0, 0, Duration::ZERO).unwrap();
        assert_eq!(metrics.register_success(ms(1)), Err(MetricsError::AlreadyFinalized));
        assert_eq!(metrics.register_error(ms(1)), Err(MetricsError::AlreadyFinalized));
        assert_eq!(metrics.invocations(), 0);
    }

    #[test]
    fn inconsistent_totals_are_rejected() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        let err = metrics.register_totals(1, 2, ms(1)).unwrap_err();
        assert_eq!(err, MetricsError::InconsistentTotals { total: 1, successful: 2 });
        assert!(!metrics.is_finalized());
    }

    #[test]
    fn goal_met_compares_against_successful_attempts() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        metrics.register_totals(3, 1, ms(9)).unwrap();
        assert!(metrics.goal_met(1));
        assert!(!metrics.goal_met(2));
        assert!(metrics.goal_met(0));
    }

    #[test]
    fn summaries_cover_each_sequence() {
        let mut metrics = ResilienceModuleMetrics::new(1);
        assert!(metrics.success_summary().is_none());
        for n in [10, 20, 30] {
            metrics.register_success(ms(n)).unwrap();
        }
        metrics.register_error(ms(500)).unwrap();

        let success = metrics.success_summary().unwrap();
        assert_eq!(success.count, 3);
        assert_eq!(success.mean, ms(20));
        assert_eq!(metrics.error_summary().unwrap().max, ms(500));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_camel_case_with_millisecond_latencies() {
        let mut metrics = ResilienceModuleMetrics::new(42);
        metrics.register_error(Duration::from_micros(1500)).unwrap();
        metrics.register_success(ms(20)).unwrap();
        metrics.register_totals(1, 1, ms(35)).unwrap();

        let json = metrics.to_json();
        assert_eq!(json["subjectId"], 42);
        assert_eq!(json["successCount"], 1);
        assert_eq!(json["successLatencies"], serde_json::json!([20]));
        assert_eq!(json["errorLatencies"], serde_json::json!([1]));
        assert_eq!(json["totalRequests"], 1);
        assert_eq!(json["totalSuccessfulRequests"], 1);
        assert_eq!(json["totalElapsed"], 35);
    }
}
