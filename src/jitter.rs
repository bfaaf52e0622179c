//! Jitter strategies to spread out retries.
//!
//! - `None`: the exact delay, for deterministic tests.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal` (half jitter): uniform in `[delay/2, delay]`, keeping a floor under the delay.
//!
//! Randomisation works at nanosecond precision so sub-millisecond delays (the windowed rate
//! limiter retries on a 500µs base) are spread rather than truncated to zero. Durations longer
//! than `u64::MAX` nanoseconds saturate.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter
    #[default]
    None,
    /// Random between 0 and delay
    Full,
    /// Random between delay/2 and delay
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Alias for [`Jitter::Equal`].
    pub fn half() -> Self {
        Jitter::Equal
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full if nanos == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_nanos(rng.random_range(0..=nanos)),
            Jitter::Equal if nanos == 0 => Duration::ZERO,
            Jitter::Equal => Duration::from_nanos(rng.random_range(nanos / 2..=nanos)),
        }
    }
}
