//! Delay schedules between retry sub-attempts.
//!
//! `delay(n)` is the pause before retry `n` (1-based). `delay(0)` is the initial call and is
//! always zero. Schedules saturate at [`MAX_BACKOFF`] instead of overflowing.
//!
//! ```rust
//! use resilience_driver::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_millis(500))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(4), Duration::from_millis(500));
//! ```

use std::time::Duration;

/// Ceiling for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("a cap is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause before every retry.
    Constant { delay: Duration },
    /// `base * n`, optionally capped.
    Linear { base: Duration, max: Option<Duration> },
    /// `base * 2^(n-1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap a linear or exponential schedule.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self {
            Backoff::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
            Backoff::Linear { base, .. } | Backoff::Exponential { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(max) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(max) }),
        }
    }

    /// Pause before retry `retry` (0 = initial call).
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let (raw, max) = match *self {
            Backoff::Constant { delay } => (delay, None),
            Backoff::Linear { base, max } => {
                let factor = u32::try_from(retry).unwrap_or(u32::MAX);
                (base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Backoff::Exponential { base, max } => {
                let exponent = u32::try_from(retry - 1).unwrap_or(u32::MAX);
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let nanos = u64::try_from(nanos.min(MAX_BACKOFF.as_nanos())).unwrap_or(u64::MAX);
                (Duration::from_nanos(nanos), max)
            }
        };
        max.map_or(raw, |cap| raw.min(cap)).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn initial_call_never_waits() {
        assert_eq!(Backoff::constant(ms(50)).delay(0), Duration::ZERO);
        assert_eq!(Backoff::linear(ms(50)).delay(0), Duration::ZERO);
        assert_eq!(Backoff::exponential(ms(50)).delay(0), Duration::ZERO);
    }

    #[test]
    fn constant_repeats() {
        let backoff = Backoff::constant(ms(200));
        assert_eq!(backoff.delay(1), ms(200));
        assert_eq!(backoff.delay(9), ms(200));
    }

    #[test]
    fn linear_grows_and_caps() {
        let backoff = Backoff::linear(ms(100)).with_max(ms(250)).unwrap();
        assert_eq!(backoff.delay(1), ms(100));
        assert_eq!(backoff.delay(2), ms(200));
        assert_eq!(backoff.delay(3), ms(250));
    }

    #[test]
    fn exponential_doubles() {
        let backoff = Backoff::exponential(ms(100));
        let delays: Vec<_> = (1..=4).map(|n| backoff.delay(n)).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(800)]);
    }

    #[test]
    fn huge_retry_counts_saturate() {
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay(1_000_000), MAX_BACKOFF);
        assert_eq!(Backoff::linear(Duration::from_secs(u64::MAX / 4)).delay(1_000), MAX_BACKOFF);
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert_eq!(
            Backoff::constant(ms(5)).with_max(ms(10)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        );
        assert_eq!(Backoff::linear(ms(5)).with_max(Duration::ZERO), Err(BackoffError::MaxMustBePositive));
        assert_eq!(
            Backoff::exponential(ms(50)).with_max(ms(10)),
            Err(BackoffError::MaxLessThanBase { base: ms(50), max: ms(10) })
        );
    }
}
