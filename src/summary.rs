//! Latency distribution summaries built on `hdrhistogram`.

use hdrhistogram::Histogram;
use std::time::Duration;

/// Significant figures kept by the histogram (0.1% relative precision).
const SIGFIG: u8 = 3;

/// Distribution of a latency sequence. Percentiles are histogram estimates; `min`, `max`, and
/// `mean` are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LatencySummary {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarize `latencies`; `None` when the sequence is empty.
    pub fn from_latencies(latencies: &[Duration]) -> Option<Self> {
        let min = *latencies.iter().min()?;
        let max = *latencies.iter().max()?;
        let total: Duration = latencies.iter().sum();
        let mean = total / u32::try_from(latencies.len()).unwrap_or(u32::MAX);

        let mut histogram = Histogram::<u64>::new(SIGFIG).ok()?;
        for latency in latencies {
            histogram.saturating_record(micros(latency));
        }
        let at = |q: f64| Duration::from_micros(histogram.value_at_quantile(q)).clamp(min, max);

        Some(Self {
            count: latencies.len(),
            min,
            max,
            mean,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        })
    }
}

fn micros(duration: &Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
