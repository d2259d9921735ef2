//! Randomization applied to backoff delays so concurrent subjects do not retry in lockstep.
//!
//! - `None`: exact delays, for tests and tightly controlled runs.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.
//! - `Decorrelated`: `min(max, uniform(base, previous * 3))`; ignores the backoff delay and grows
//!   from the previous sleep, so it keeps per-policy state.

use rand::{rng, Rng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decorrelated jitter: base ({base:?}) must not exceed max ({max:?})")]
pub struct JitterError {
    pub base: Duration,
    pub max: Duration,
}

#[derive(Debug, Clone)]
pub enum Jitter {
    None,
    Full,
    Equal,
    /// Clones share the previous-sleep state.
    Decorrelated { base: Duration, max: Duration, previous: Arc<Mutex<Duration>> },
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn decorrelated(base: Duration, max: Duration) -> Result<Self, JitterError> {
        if base > max {
            return Err(JitterError { base, max });
        }
        Ok(Jitter::Decorrelated { base, max, previous: Arc::new(Mutex::new(base)) })
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-supplied RNG (deterministic in tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis(delay))),
            Jitter::Equal => {
                let upper = millis(delay);
                Duration::from_millis(rng.random_range(upper / 2..=upper))
            }
            Jitter::Decorrelated { base, max, previous } => {
                let mut previous = previous.lock().unwrap_or_else(PoisonError::into_inner);
                let upper = millis(*previous).saturating_mul(3).min(millis(*max));
                let lower = millis(*base).min(upper);
                *previous = Duration::from_millis(rng.random_range(lower..=upper));
                *previous
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
