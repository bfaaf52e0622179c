//! Windowed rate limiting that waits instead of rejecting.
//!
//! [`WindowedRateLimiter`] asks an [`AdmissionOracle`] whether an action may run. On a rejection
//! it sleeps for `backoff(n)`, where `n` counts rejections within the current `check_wait` call,
//! and asks again. The sleep never runs past the oracle's [`retry_after`] hint, so a waiter is
//! back before the next window opens. Callers only ever see delay.
//!
//! [`retry_after`]: AdmissionOracle::retry_after
//!
//! If calls are uniform the admitted rate roughly matches the configured rate. Bursts at the end
//! of one window and the start of the next may together exceed it.
//!
//! ```rust
//! use std::time::Duration;
//! use gatekeep::{Rate, WindowedRateLimiter};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let limiter = WindowedRateLimiter::new(Rate::new(100, Duration::from_secs(1)).unwrap());
//! limiter.check_wait().await;
//! let out = limiter.invoke(|| async { Ok::<_, std::io::Error>("sent") }).await.unwrap();
//! assert_eq!(out, "sent");
//! # });
//! ```

use crate::backoff::{self, BackoffFunction};
use crate::dynamic::DynamicConfig;
use crate::limiter::RateLimiter;
use crate::oracle::{fixed_window_factory, AdmissionOracle, OracleFactory};
use crate::{Rate, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Smallest retry delay of the default backoff, sized for high-frequency use (hundreds of
/// actions per second and up).
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_micros(500);

#[derive(Debug, Clone)]
struct Window {
    rate: Rate,
    oracle: Arc<dyn AdmissionOracle>,
}

/// Rate limiter wrapping an admission oracle with a retry-with-backoff loop. Clones share state.
#[derive(Clone)]
pub struct WindowedRateLimiter {
    window: DynamicConfig<Window>,
    factory: OracleFactory,
    backoff: Arc<dyn BackoffFunction>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for WindowedRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedRateLimiter")
            .field("rate", &self.rate())
            .field("oracle", &self.window.get().oracle)
            .field("backoff", &"<backoff>")
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl WindowedRateLimiter {
    /// Limiter backed by a fixed-window oracle, retrying with full jitter between
    /// [`DEFAULT_RETRY_BASE`] and the rate's duration.
    pub fn new(rate: Rate) -> Self {
        Self::builder(rate).build()
    }

    pub fn builder(rate: Rate) -> WindowedRateLimiterBuilder {
        WindowedRateLimiterBuilder::new(rate)
    }

    /// The rate currently enforced.
    pub fn rate(&self) -> Rate {
        self.window.get().rate
    }

    /// Wait until the oracle admits the caller.
    pub async fn check_wait(&self) {
        let mut rejections: u32 = 0;
        loop {
            let window = self.window.get();
            if window.oracle.allow() {
                if rejections > 0 {
                    tracing::trace!(rejections, "admitted after retrying");
                }
                return;
            }
            rejections = rejections.saturating_add(1);
            let mut delay = self.backoff.delay(rejections);
            if let Some(reopens) = window.oracle.retry_after() {
                delay = delay.min(reopens);
            }
            self.sleeper.sleep(delay).await;
        }
    }

    /// `check_wait`, then run `operation`. Its result is returned unchanged and does not affect
    /// the limiter.
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        self.check_wait().await;
        operation().await
    }

    /// Swap in a fresh oracle for `rate`.
    ///
    /// Budget consumed under the old rate is not carried over, so throughput around the switch
    /// may briefly exceed either rate. Callers already waiting pick up the new oracle on their
    /// next retry.
    pub fn set_max_rate(&self, rate: Rate) {
        let oracle = (self.factory)(rate);
        let previous = self.window.swap(Window { rate, oracle });
        tracing::debug!(from = ?previous.rate, to = ?rate, "max rate changed");
    }
}

#[async_trait]
impl RateLimiter for WindowedRateLimiter {
    async fn check_wait(&self) {
        WindowedRateLimiter::check_wait(self).await
    }
}

/// Builder for [`WindowedRateLimiter`].
pub struct WindowedRateLimiterBuilder {
    rate: Rate,
    factory: Option<OracleFactory>,
    backoff: Option<Arc<dyn BackoffFunction>>,
    sleeper: Arc<dyn Sleeper>,
}

impl WindowedRateLimiterBuilder {
    pub fn new(rate: Rate) -> Self {
        Self { rate, factory: None, backoff: None, sleeper: Arc::new(TokioSleeper) }
    }

    /// Build oracles with `factory` instead of the default fixed window.
    pub fn oracle<F, O>(mut self, factory: F) -> Self
    where
        F: Fn(Rate) -> O + Send + Sync + 'static,
        O: AdmissionOracle + 'static,
    {
        self.factory = Some(Arc::new(move |rate| Arc::new(factory(rate)) as Arc<dyn AdmissionOracle>));
        self
    }

    /// Retry delay per rejection count within one `check_wait` call.
    pub fn backoff<B>(mut self, backoff: B) -> Self
    where
        B: BackoffFunction + 'static,
    {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> WindowedRateLimiter {
        let rate = self.rate;
        let factory = self.factory.unwrap_or_else(fixed_window_factory);
        let backoff = self.backoff.unwrap_or_else(|| {
            Arc::new(backoff::full_jitter(DEFAULT_RETRY_BASE, rate.duration()))
        });
        let oracle = factory(rate);
        WindowedRateLimiter {
            window: DynamicConfig::new(Window { rate, oracle }),
            factory,
            backoff,
            sleeper: self.sleeper,
        }
    }
}
