//! Minimum-gap limiters.
//!
//! Both limiters admit one caller at a time and guarantee that successive admissions are at
//! least `interval` apart. Admission is serialised under an async mutex, so the recorded
//! admission time always matches the caller that was let through.
//!
//! - [`FixedIntervalLimiter`] sleeps the whole remaining gap in one go.
//! - [`IntervalLimiter`] sleeps in slices of at most `recheck` and re-reads its configuration
//!   after each slice, so [`IntervalLimiter::set_interval`] affects callers that are already
//!   waiting.

use crate::dynamic::DynamicConfig;
use crate::limiter::RateLimiter;
use crate::LimiterError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a fixed minimum gap between admissions. Clones share state.
#[derive(Debug, Clone)]
pub struct FixedIntervalLimiter {
    interval: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl FixedIntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: Arc::new(Mutex::new(None)) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `interval` has passed since the previous admission.
    pub async fn check_wait(&self) {
        let mut last = self.last.lock().await;
        let now = Instant::now();
        let next = last.and_then(|prev| prev.checked_add(self.interval));
        match next {
            Some(next) if now < next => {
                tokio::time::sleep_until(next).await;
                *last = Some(Instant::now());
            }
            _ => *last = Some(now),
        }
    }

    /// `check_wait`, then run `operation`, returning its result unchanged.
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        self.check_wait().await;
        operation().await
    }
}

#[async_trait]
impl RateLimiter for FixedIntervalLimiter {
    async fn check_wait(&self) {
        FixedIntervalLimiter::check_wait(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timing {
    interval: Duration,
    recheck: Duration,
}

/// Minimum-gap limiter whose interval can change while callers wait. Clones share state.
#[derive(Debug, Clone)]
pub struct IntervalLimiter {
    timing: DynamicConfig<Timing>,
    last: Arc<Mutex<Option<Instant>>>,
}

impl IntervalLimiter {
    /// Create a limiter rechecking every `2 * interval` (or every millisecond for a zero
    /// interval).
    pub fn new(interval: Duration) -> Self {
        let recheck = interval.saturating_mul(2).max(Duration::from_millis(1));
        Self {
            timing: DynamicConfig::new(Timing { interval, recheck }),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Builder-style [`set_recheck`](Self::set_recheck).
    pub fn with_recheck(self, recheck: Duration) -> Result<Self, LimiterError> {
        self.set_recheck(recheck)?;
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        self.timing.get().interval
    }

    pub fn recheck(&self) -> Duration {
        self.timing.get().recheck
    }

    /// Change the minimum gap. Waiting callers observe it within one recheck period.
    pub fn set_interval(&self, interval: Duration) {
        self.timing.update(|t| Timing { interval, ..*t });
        tracing::debug!(?interval, "interval changed");
    }

    /// Change the longest single sleep slice. Must be non-zero.
    pub fn set_recheck(&self, recheck: Duration) -> Result<(), LimiterError> {
        if recheck.is_zero() {
            return Err(LimiterError::InvalidRecheck);
        }
        self.timing.update(|t| Timing { recheck, ..*t });
        Ok(())
    }

    /// Wait until `interval` has passed since the previous admission, re-reading the interval
    /// at least every `recheck`.
    pub async fn check_wait(&self) {
        let mut last = self.last.lock().await;
        let admitted = loop {
            let now = Instant::now();
            let Some(prev) = *last else {
                break now;
            };
            let timing = *self.timing.get();
            let remaining = match prev.checked_add(timing.interval) {
                Some(next) if now < next => next - now,
                Some(_) => break now,
                None => timing.recheck,
            };
            let slice = remaining.min(timing.recheck);
            tracing::trace!(?remaining, ?slice, "waiting for interval");
            tokio::time::sleep(slice).await;
        };
        *last = Some(admitted);
    }

    /// `check_wait`, then run `operation`, returning its result unchanged.
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        self.check_wait().await;
        operation().await
    }
}

#[async_trait]
impl RateLimiter for IntervalLimiter {
    async fn check_wait(&self) {
        IntervalLimiter::check_wait(self).await
    }
}
