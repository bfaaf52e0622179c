//! Backoff functions: failure count in, delay out.
//!
//! Every limiter that slows down on failure takes a [`BackoffFunction`]. The input is a 1-based
//! failure (or retry) count; `0` means "no failures" and maps to no delay. The output is always a
//! [`Duration`], so there is a single unit convention across all limiters.
//!
//! Any `Fn(u32) -> Duration + Send + Sync` closure is a backoff function. For the common curves
//! use [`Backoff`] (constant, linear, exponential with an optional cap), optionally wrapped in a
//! [`JitteredBackoff`]:
//!
//! ```rust
//! use std::time::Duration;
//! use gatekeep::backoff::{self, Backoff, BackoffFunction};
//!
//! let curve = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(curve.delay(0), Duration::ZERO);
//! assert_eq!(curve.delay(1), Duration::from_millis(100));
//! assert_eq!(curve.delay(6), Duration::from_secs(2)); // capped
//!
//! let jittered = backoff::half_jitter(Duration::from_millis(1), Duration::from_millis(50));
//! assert!(jittered.delay(3) <= Duration::from_millis(4));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`] (1 day).

use crate::Jitter;
use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Maps a failure count to a delay.
///
/// Implementations may randomise (jitter) but must be callable concurrently.
pub trait BackoffFunction: Send + Sync {
    fn delay(&self, failures: u32) -> Duration;
}

impl<F> BackoffFunction for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, failures: u32) -> Duration {
        self(failures)
    }
}

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max is only valid for linear or exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    Constant(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Deterministic backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    curve: Curve,
}

impl Backoff {
    /// Same delay for every failure count above zero.
    pub fn constant(delay: Duration) -> Self {
        Self { curve: Curve::Constant(delay) }
    }

    /// `base * failures`.
    pub fn linear(base: Duration) -> Self {
        Self { curve: Curve::Linear { base, max: None } }
    }

    /// `base * 2^(failures - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { curve: Curve::Exponential { base, max: None } }
    }

    /// Cap a linear or exponential curve. Errors on constant curves, a zero max, or `max < base`.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self.curve {
            Curve::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
            Curve::Linear { base, .. } | Curve::Exponential { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            _ => Ok(self.capped(max)),
        }
    }

    // Unvalidated cap; a max below base simply wins.
    fn capped(self, cap: Duration) -> Self {
        let curve = match self.curve {
            Curve::Linear { base, .. } => Curve::Linear { base, max: Some(cap) },
            Curve::Exponential { base, .. } => Curve::Exponential { base, max: Some(cap) },
            constant => constant,
        };
        Self { curve }
    }

    /// Delay for the given failure count (0 = no failures, no delay).
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let (raw, max) = match self.curve {
            Curve::Constant(delay) => (delay, None),
            Curve::Linear { base, max } => {
                (base.checked_mul(failures).unwrap_or(MAX_BACKOFF), max)
            }
            Curve::Exponential { base, max } => {
                let multiplier = 2u128.saturating_pow(failures - 1);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                (Duration::from_nanos(nanos as u64), max)
            }
        };
        max.map_or(raw, |m| raw.min(m)).min(MAX_BACKOFF)
    }
}

impl BackoffFunction for Backoff {
    fn delay(&self, failures: u32) -> Duration {
        Backoff::delay(self, failures)
    }
}

/// A [`Backoff`] curve randomised by a [`Jitter`] strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredBackoff {
    backoff: Backoff,
    jitter: Jitter,
}

impl JitteredBackoff {
    pub fn new(backoff: Backoff, jitter: Jitter) -> Self {
        Self { backoff, jitter }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }
}

impl BackoffFunction for JitteredBackoff {
    fn delay(&self, failures: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(failures))
    }
}

/// Never waits.
pub fn none() -> impl BackoffFunction + Clone + fmt::Debug {
    Backoff::constant(Duration::ZERO)
}

/// Exponential growth from `base`, capped at `max`, with full jitter (`[0, d]`).
pub fn full_jitter(base: Duration, max: Duration) -> JitteredBackoff {
    JitteredBackoff::new(Backoff::exponential(base.min(max)).capped(max), Jitter::Full)
}

/// Exponential growth from `base`, capped at `max`, with half jitter (`[d/2, d]`).
pub fn half_jitter(base: Duration, max: Duration) -> JitteredBackoff {
    JitteredBackoff::new(Backoff::exponential(base.min(max)).capped(max), Jitter::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let backoff = Backoff::linear(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
        assert_eq!(backoff.delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_micros(500));
        assert_eq!(backoff.delay(1), Duration::from_micros(500));
        assert_eq!(backoff.delay(2), Duration::from_millis(1));
        assert_eq!(backoff.delay(4), Duration::from_millis(4));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff =
            Backoff::exponential(Duration::from_millis(100)).with_max(Duration::from_secs(1)).unwrap();
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay(u32::MAX), MAX_BACKOFF);
        assert_eq!(Backoff::linear(Duration::from_secs(u64::MAX / 2)).delay(1_000), MAX_BACKOFF);
    }

    #[test]
    fn with_max_validation() {
        assert_eq!(
            Backoff::constant(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        );
        assert_eq!(
            Backoff::linear(Duration::from_secs(1)).with_max(Duration::ZERO),
            Err(BackoffError::MaxMustBePositive)
        );
        assert!(matches!(
            Backoff::linear(Duration::from_secs(100)).with_max(Duration::from_secs(50)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }

    #[test]
    fn closures_are_backoff_functions() {
        let f = |failures: u32| Duration::from_millis(u64::from(failures) * 3);
        assert_eq!(BackoffFunction::delay(&f, 2), Duration::from_millis(6));
        assert_eq!(none().delay(40), Duration::ZERO);
    }

    #[test]
    fn jitter_helpers_stay_under_cap() {
        let full = full_jitter(Duration::from_micros(500), Duration::from_millis(1));
        let half = half_jitter(Duration::from_millis(1), Duration::from_millis(8));
        for failures in 1..20 {
            assert!(full.delay(failures) <= Duration::from_millis(1));
            let d = half.delay(failures);
            assert!(d <= Duration::from_millis(8));
        }
        assert!(half.delay(4) >= Duration::from_millis(4));
    }

    #[test]
    fn jitter_helpers_tolerate_cap_below_base() {
        let tiny = half_jitter(Duration::from_millis(1), Duration::from_micros(10));
        assert!(tiny.delay(3) <= Duration::from_micros(10));
    }
}
