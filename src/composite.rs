//! Composite limiters.
//!
//! Composites own two injected limiters and call them in a fixed order. They add no locks of
//! their own, so each inner limiter keeps its own guarantees.
//!
//! - [`FailRateLimiter`]: failure backoff first, then the rate limit. Acts as a [`FailLimiter`].
//! - [`TokenFailLimiter`]: take a token, then wait out failure backoff while holding it, so a
//!   backoff delay also throttles concurrency. On release the outcome is reported *before* the
//!   token goes back, so the next holder already sees the updated failure count.

use crate::backoff::{self, BackoffFunction};
use crate::limiter::{FailLimiter, RateLimiter, TokenAndFailLimiter, TokenLimiter};
use crate::token::Lease;
use crate::{FailureBackoffLimiter, LimiterError, Rate, Token, WindowedRateLimiter};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// A failure limiter and a rate limiter acting as a single [`FailLimiter`].
#[derive(Debug, Clone)]
pub struct FailRateLimiter<F = FailureBackoffLimiter, R = WindowedRateLimiter> {
    fail: F,
    rate: R,
}

impl<F, R> FailRateLimiter<F, R>
where
    F: FailLimiter,
    R: RateLimiter,
{
    pub fn new(fail: F, rate: R) -> Self {
        Self { fail, rate }
    }

    pub fn fail_limiter(&self) -> &F {
        &self.fail
    }

    pub fn rate_limiter(&self) -> &R {
        &self.rate
    }

    /// Wait out failure backoff, then the rate limit.
    pub async fn check_wait(&self) {
        self.fail.check_wait().await;
        self.rate.check_wait().await;
    }

    /// Outcomes only steer the failure limiter.
    pub fn report(&self, success: bool) {
        self.fail.report(success);
    }

    /// `check_wait`, run `operation`, report whether it returned `Ok`.
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

impl FailRateLimiter {
    /// Failure backoff driven by `backoff`, on top of a windowed limiter at `max_rate`.
    pub fn from_rate<B>(max_rate: Rate, backoff: B) -> Self
    where
        B: BackoffFunction + 'static,
    {
        Self::new(FailureBackoffLimiter::new(backoff), WindowedRateLimiter::new(max_rate))
    }

    /// Failure backoff with half jitter, growing from 1ms up to `max_backoff`.
    pub fn half_jitter(max_rate: Rate, max_backoff: Duration) -> Self {
        Self::from_rate(max_rate, backoff::half_jitter(Duration::from_millis(1), max_backoff))
    }

    /// Change the enforced rate. See [`WindowedRateLimiter::set_max_rate`].
    pub fn set_max_rate(&self, rate: Rate) {
        self.rate.set_max_rate(rate);
    }

    /// Replace the failure limiter with a fresh one using `backoff`. The failure count restarts
    /// at zero.
    pub fn set_backoff<B>(&mut self, backoff: B)
    where
        B: BackoffFunction + 'static,
    {
        self.fail = FailureBackoffLimiter::new(backoff);
    }
}

#[async_trait]
impl<F, R> RateLimiter for FailRateLimiter<F, R>
where
    F: FailLimiter,
    R: RateLimiter,
{
    async fn check_wait(&self) {
        FailRateLimiter::check_wait(self).await
    }
}

impl<F, R> FailLimiter for FailRateLimiter<F, R>
where
    F: FailLimiter,
    R: RateLimiter,
{
    fn report(&self, success: bool) {
        FailRateLimiter::report(self, success)
    }
}

/// A token limiter and a failure limiter acting as a single [`TokenAndFailLimiter`].
#[derive(Debug, Clone)]
pub struct TokenFailLimiter<T, F = FailureBackoffLimiter> {
    tokens: T,
    fail: F,
}

impl<T, F> TokenFailLimiter<T, F>
where
    T: TokenLimiter,
    F: FailLimiter,
{
    pub fn new(tokens: T, fail: F) -> Self {
        Self { tokens, fail }
    }

    pub fn token_limiter(&self) -> &T {
        &self.tokens
    }

    pub fn fail_limiter(&self) -> &F {
        &self.fail
    }

    /// Take a token, then wait out failure backoff while holding it.
    ///
    /// If the future is dropped during the backoff wait, the token is returned.
    pub async fn acquire_token(&self) -> Token {
        let token = self.tokens.acquire_token().await;
        let lease = Lease::new(&self.tokens, token);
        self.fail.check_wait().await;
        lease.into_token().unwrap_or(token)
    }

    /// Report the outcome, then release the token.
    pub fn release_token_and_report(&self, token: Token, success: bool) -> Result<(), LimiterError> {
        self.fail.report(success);
        self.tokens.release_token(token)
    }

    /// Report an outcome observed outside a token-holding action.
    pub fn report(&self, success: bool) {
        self.fail.report(success);
    }

    /// Hold a token around `operation` and report whether it returned `Ok`.
    ///
    /// If the returned future is dropped mid-operation the token is released without a report.
    pub async fn invoke<V, E, Fut, Op>(&self, operation: Op) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>>,
        Op: FnOnce() -> Fut,
    {
        let token = self.acquire_token().await;
        let lease = Lease::new(&self.tokens, token);
        let result = operation().await;
        if let Some(token) = lease.into_token() {
            // The token came from this limiter, so the release cannot be rejected.
            let _ = self.release_token_and_report(token, result.is_ok());
        }
        result
    }
}

#[async_trait]
impl<T, F> TokenAndFailLimiter for TokenFailLimiter<T, F>
where
    T: TokenLimiter,
    F: FailLimiter,
{
    async fn acquire_token(&self) -> Token {
        TokenFailLimiter::acquire_token(self).await
    }

    fn release_token_and_report(&self, token: Token, success: bool) -> Result<(), LimiterError> {
        TokenFailLimiter::release_token_and_report(self, token, success)
    }

    fn report(&self, success: bool) {
        TokenFailLimiter::report(self, success)
    }
}
