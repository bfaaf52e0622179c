//! Tower middleware driving limiters around every request.
//!
//! - [`FailLimitLayer`] wraps a [`FailLimiter`]: `check_wait` before the request, `report` after.
//! - [`TokenLimitLayer`] wraps a [`TokenAndFailLimiter`]: a token is held for the whole request
//!   and released together with the outcome. A request future dropped before completion releases
//!   its token and counts as a failure.
//!
//! ```rust
//! use gatekeep::{backoff, FailureBackoffLimiter, FailLimitLayer};
//! use tower_layer::Layer;
//!
//! # #[derive(Clone)] struct Svc;
//! let layer = FailLimitLayer::new(FailureBackoffLimiter::new(backoff::none()));
//! let _service = layer.layer(Svc);
//! ```

use crate::limiter::{FailLimiter, TokenAndFailLimiter};
use crate::Token;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Layer that waits on `check_wait` before each request and reports `result.is_ok()` after it.
#[derive(Debug)]
pub struct FailLimitLayer<L> {
    limiter: Arc<L>,
}

impl<L> Clone for FailLimitLayer<L> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone() }
    }
}

impl<L> FailLimitLayer<L> {
    pub fn new(limiter: L) -> Self {
        Self::shared(Arc::new(limiter))
    }

    /// Share a limiter that is also used (or inspected) elsewhere.
    pub fn shared(limiter: Arc<L>) -> Self {
        Self { limiter }
    }
}

impl<S, L> Layer<S> for FailLimitLayer<L> {
    type Service = FailLimitService<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        FailLimitService { inner, limiter: self.limiter.clone() }
    }
}

/// Service produced by [`FailLimitLayer`]. Inner errors pass through unchanged.
#[derive(Debug)]
pub struct FailLimitService<S, L> {
    inner: S,
    limiter: Arc<L>,
}

impl<S: Clone, L> Clone for FailLimitService<S, L> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone() }
    }
}

impl<S, L, Req> Service<Req> for FailLimitService<S, L>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: FailLimiter + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the instance that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();

        Box::pin(async move {
            limiter.check_wait().await;
            let result = inner.call(req).await;
            limiter.report(result.is_ok());
            result
        })
    }
}

/// Layer that holds a token from a [`TokenAndFailLimiter`] for the duration of each request.
#[derive(Debug)]
pub struct TokenLimitLayer<L> {
    limiter: Arc<L>,
}

impl<L> Clone for TokenLimitLayer<L> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone() }
    }
}

impl<L> TokenLimitLayer<L> {
    pub fn new(limiter: L) -> Self {
        Self::shared(Arc::new(limiter))
    }

    pub fn shared(limiter: Arc<L>) -> Self {
        Self { limiter }
    }
}

impl<S, L> Layer<S> for TokenLimitLayer<L> {
    type Service = TokenLimitService<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenLimitService { inner, limiter: self.limiter.clone() }
    }
}

/// Service produced by [`TokenLimitLayer`].
#[derive(Debug)]
pub struct TokenLimitService<S, L> {
    inner: S,
    limiter: Arc<L>,
}

impl<S: Clone, L> Clone for TokenLimitService<S, L> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone() }
    }
}

impl<S, L, Req> Service<Req> for TokenLimitService<S, L>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: TokenAndFailLimiter + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let token = limiter.acquire_token().await;
            let mut held = HeldToken { limiter: &*limiter, token: Some(token) };
            let result = inner.call(req).await;
            held.finish(result.is_ok());
            result
        })
    }
}

/// Releases its token as a failure if dropped before [`HeldToken::finish`].
struct HeldToken<'a, L: TokenAndFailLimiter + ?Sized> {
    limiter: &'a L,
    token: Option<Token>,
}

impl<L: TokenAndFailLimiter + ?Sized> HeldToken<'_, L> {
    fn finish(&mut self, success: bool) {
        if let Some(token) = self.token.take() {
            if let Err(error) = self.limiter.release_token_and_report(token, success) {
                tracing::warn!(%error, "token release rejected");
            }
        }
    }
}

impl<L: TokenAndFailLimiter + ?Sized> Drop for HeldToken<'_, L> {
    fn drop(&mut self) {
        self.finish(false);
    }
}
