//! Failure-driven backoff.
//!
//! [`FailureBackoffLimiter`] keeps a failure count that goes up by one per reported failure and
//! down by one per reported success (never below zero). Before each action the count is turned
//! into a delay by the configured [`BackoffFunction`]. Recovery is gradual: one success after a
//! long failure streak only takes one step back down the curve.
//!
//! ```rust
//! use std::time::Duration;
//! use gatekeep::{Backoff, FailureBackoffLimiter};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let limiter = FailureBackoffLimiter::new(Backoff::exponential(Duration::from_millis(1)));
//! let result = limiter.invoke(|| async { Err::<(), _>("unavailable") }).await;
//! assert!(result.is_err());
//! assert_eq!(limiter.fail_count(), 1);
//! # });
//! ```

use crate::backoff::BackoffFunction;
use crate::limiter::{FailLimiter, RateLimiter};
use crate::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Delays actions according to the number of outstanding failures. Clones share state.
#[derive(Clone)]
pub struct FailureBackoffLimiter {
    fail_count: Arc<Mutex<u32>>,
    backoff: Arc<dyn BackoffFunction>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for FailureBackoffLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureBackoffLimiter")
            .field("fail_count", &self.fail_count())
            .field("backoff", &"<backoff>")
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl FailureBackoffLimiter {
    pub fn new<B>(backoff: B) -> Self
    where
        B: BackoffFunction + 'static,
    {
        Self {
            fail_count: Arc::new(Mutex::new(0)),
            backoff: Arc::new(backoff),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper (tests use `InstantSleeper` / `TrackingSleeper`).
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Outstanding failures.
    pub fn fail_count(&self) -> u32 {
        *self.fail_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait out the backoff for the current failure count. Returns at once when there are none.
    pub async fn check_wait(&self) {
        let failures = self.fail_count();
        if failures == 0 {
            return;
        }
        let delay = self.backoff.delay(failures);
        if !delay.is_zero() {
            tracing::trace!(failures, ?delay, "failure backoff");
            self.sleeper.sleep(delay).await;
        }
    }

    /// Record an outcome: success steps the count down by one, failure steps it up by one.
    pub fn report(&self, success: bool) {
        let mut count = self.fail_count.lock().unwrap_or_else(PoisonError::into_inner);
        let before = *count;
        *count = if success { before.saturating_sub(1) } else { before.saturating_add(1) };
        if *count != before {
            tracing::debug!(fail_count = *count, success, "failure count changed");
        }
    }

    /// `check_wait`, run `operation`, report whether it returned `Ok`. The result is returned
    /// unchanged.
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        self.check_wait().await;
        let result = operation().await;
        self.report(result.is_ok());
        result
    }
}

#[async_trait]
impl RateLimiter for FailureBackoffLimiter {
    async fn check_wait(&self) {
        FailureBackoffLimiter::check_wait(self).await
    }
}

impl FailLimiter for FailureBackoffLimiter {
    fn report(&self, success: bool) {
        FailureBackoffLimiter::report(self, success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backoff, Backoff, InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_backoff() -> (Arc<AtomicUsize>, impl BackoffFunction + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let f = move |failures: u32| {
            if failures > 0 {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Duration::ZERO
        };
        (calls, f)
    }

    #[tokio::test]
    async fn alternating_outcomes_return_to_zero() {
        let (calls, f) = counting_backoff();
        let limiter = FailureBackoffLimiter::new(f);

        for _ in 0..1000 {
            limiter.check_wait().await;
            limiter.report(false);
            limiter.check_wait().await;
            limiter.report(true);
        }

        assert_eq!(limiter.fail_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn successes_step_down_one_at_a_time() {
        let limiter = FailureBackoffLimiter::new(backoff::none());
        for _ in 0..5 {
            limiter.report(false);
        }
        assert_eq!(limiter.fail_count(), 5);

        for expected in (0..5).rev() {
            limiter.report(true);
            assert_eq!(limiter.fail_count(), expected);
        }
        limiter.report(true);
        assert_eq!(limiter.fail_count(), 0, "count never underflows");
    }

    #[tokio::test]
    async fn no_failures_means_no_sleep() {
        let sleeper = TrackingSleeper::new();
        let limiter = FailureBackoffLimiter::new(Backoff::constant(Duration::from_secs(1)))
            .with_sleeper(sleeper.clone());

        for _ in 0..10 {
            limiter.check_wait().await;
        }
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn delay_follows_failure_count() {
        let sleeper = TrackingSleeper::new();
        let limiter = FailureBackoffLimiter::new(Backoff::linear(Duration::from_millis(10)))
            .with_sleeper(sleeper.clone());

        limiter.report(false);
        limiter.check_wait().await;
        limiter.report(false);
        limiter.check_wait().await;
        limiter.report(true);
        limiter.check_wait().await;

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(10), Duration::from_millis(20), Duration::from_millis(10)]
        );
    }

    #[tokio::test]
    async fn instant_sleeper_skips_long_backoff() {
        let limiter = FailureBackoffLimiter::new(Backoff::exponential(Duration::from_secs(1)))
            .with_sleeper(InstantSleeper);
        for _ in 0..20 {
            limiter.report(false);
        }

        let start = std::time::Instant::now();
        let err = limiter.invoke(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(err, Err("still down"));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.fail_count(), 21);
    }

    #[tokio::test]
    async fn invoke_reports_outcome() {
        let (calls, f) = counting_backoff();
        let limiter = FailureBackoffLimiter::new(f);

        let err = limiter.invoke(|| async { Err::<(), _>("error") }).await;
        assert_eq!(err, Err("error"));
        assert_eq!(limiter.fail_count(), 1);

        let ok = limiter.invoke(|| async { Ok::<_, &str>(5) }).await;
        assert_eq!(ok, Ok(5));
        assert_eq!(limiter.fail_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_are_not_lost() {
        let limiter = FailureBackoffLimiter::new(backoff::none());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    for _ in 0..250 {
                        limiter.report(false);
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;
        assert_eq!(limiter.fail_count(), 2000);
    }
}
