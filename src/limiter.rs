//! Capability traits shared by all limiters.
//!
//! Four verbs are modelled as small traits so composites can layer any two limiters that provide
//! the right capabilities:
//!
//! | trait                   | before the action       | after the action                    |
//! |-------------------------|-------------------------|-------------------------------------|
//! | [`RateLimiter`]         | `check_wait`            | –                                   |
//! | [`FailLimiter`]         | `check_wait`            | `report(success)`                   |
//! | [`TokenLimiter`]        | `acquire_token`         | `release_token(token)`              |
//! | [`TokenAndFailLimiter`] | `acquire_token`         | `release_token_and_report(token, _)`|
//!
//! Waiting suspends the calling task; no limiter exposes a timeout. Wrap calls in
//! `tokio::time::timeout` (or drop the future) to give up early.
//!
//! All traits are implemented for `Arc<L>`, so a limiter can be shared between a composite and
//! code that inspects or adjusts it.

use crate::{LimiterError, Token};
use async_trait::async_trait;
use std::sync::Arc;

/// Delays the caller until an action is allowed.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Call at the start of an action. Returns immediately when unrestricted.
    async fn check_wait(&self);
}

/// A [`RateLimiter`] steered by reported outcomes. Failures should be expected to slow down
/// subsequent `check_wait` calls.
pub trait FailLimiter: RateLimiter {
    /// Call at the end of an action with its outcome.
    fn report(&self, success: bool);
}

/// Enforces a concurrency ceiling with tokens held for the duration of an action.
#[async_trait]
pub trait TokenLimiter: Send + Sync {
    /// Waits until a token is available and takes it.
    async fn acquire_token(&self) -> Token;

    /// Hands a token back. Tokens this limiter does not consider in flight are rejected.
    fn release_token(&self, token: Token) -> Result<(), LimiterError>;
}

/// A token limiter whose release also reports the action's outcome.
#[async_trait]
pub trait TokenAndFailLimiter: Send + Sync {
    /// Waits for a token and for any failure-driven delay.
    async fn acquire_token(&self) -> Token;

    /// Reports the outcome, then hands the token back.
    fn release_token_and_report(&self, token: Token, success: bool) -> Result<(), LimiterError>;

    /// Reports an outcome observed outside a token-holding action.
    fn report(&self, success: bool);
}

#[async_trait]
impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    async fn check_wait(&self) {
        (**self).check_wait().await
    }
}

impl<L: FailLimiter + ?Sized> FailLimiter for Arc<L> {
    fn report(&self, success: bool) {
        (**self).report(success)
    }
}

#[async_trait]
impl<L: TokenLimiter + ?Sized> TokenLimiter for Arc<L> {
    async fn acquire_token(&self) -> Token {
        (**self).acquire_token().await
    }

    fn release_token(&self, token: Token) -> Result<(), LimiterError> {
        (**self).release_token(token)
    }
}

#[async_trait]
impl<L: TokenAndFailLimiter + ?Sized> TokenAndFailLimiter for Arc<L> {
    async fn acquire_token(&self) -> Token {
        (**self).acquire_token().await
    }

    fn release_token_and_report(&self, token: Token, success: bool) -> Result<(), LimiterError> {
        (**self).release_token_and_report(token, success)
    }

    fn report(&self, success: bool) {
        (**self).report(success)
    }
}
