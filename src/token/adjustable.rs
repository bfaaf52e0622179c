//! Token pool whose size can change while tokens are in flight.

use super::{Lease, Token, TokenPool};
use crate::limiter::TokenLimiter;
use crate::LimiterError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// A [`TokenPool`] that can grow up to a ceiling and shrink at runtime.
///
/// Shrinking only discards tokens sitting in the pool; tokens held by callers are never revoked.
/// To shrink below the number in flight, call [`remove_tokens`](Self::remove_tokens) again once
/// those tokens have come back.
#[derive(Debug, Clone)]
pub struct AdjustableTokenPool {
    pool: TokenPool,
    max_tokens: usize,
    resize: Arc<Mutex<()>>,
}

impl AdjustableTokenPool {
    /// Create a pool with `initial` tokens and a ceiling of `max_tokens`.
    ///
    /// Fails with [`LimiterError::CapacityExceeded`] when `initial > max_tokens`.
    pub fn new(initial: usize, max_tokens: usize) -> Result<Self, LimiterError> {
        let pool = Self {
            pool: TokenPool::new(0),
            max_tokens,
            resize: Arc::new(Mutex::new(())),
        };
        pool.add_tokens(initial)?;
        Ok(pool)
    }

    /// Create a pool whose ceiling is the machine's available parallelism (or `initial`, if
    /// larger).
    pub fn with_cpu_ceiling(initial: usize) -> Self {
        let cpus = std::thread::available_parallelism().map(usize::from).unwrap_or(1);
        let pool = Self {
            pool: TokenPool::new(initial),
            max_tokens: cpus.max(initial),
            resize: Arc::new(Mutex::new(())),
        };
        tracing::debug!(initial, max = pool.max_tokens, "cpu-bounded token pool created");
        pool
    }

    /// Create up to `count` new tokens.
    ///
    /// When the ceiling would be exceeded, as many tokens as fit are added and
    /// [`LimiterError::CapacityExceeded`] reports the shortfall; the partial add is kept.
    pub fn add_tokens(&self, count: usize) -> Result<(), LimiterError> {
        if count == 0 {
            return Ok(());
        }
        let _resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.pool.token_count();
        let added = count.min(self.max_tokens.saturating_sub(current));
        self.pool.mint(added);

        if added < count {
            tracing::warn!(
                requested = count,
                added,
                max = self.max_tokens,
                "token ceiling reached"
            );
            return Err(LimiterError::CapacityExceeded {
                requested: count,
                added,
                max: self.max_tokens,
            });
        }
        tracing::debug!(added, total = current + added, "tokens added");
        Ok(())
    }

    /// Discard up to `count` tokens that are currently available, without waiting.
    ///
    /// Stops quietly when the pool runs dry. Returns the number of tokens discarded. Passing
    /// `usize::MAX` empties the pool.
    pub fn remove_tokens(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let _resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.pool.retire(count);
        tracing::debug!(requested = count, removed, total = self.pool.token_count(), "tokens removed");
        removed
    }

    /// Tokens owned by the pool, available or in flight.
    pub fn token_count(&self) -> usize {
        self.pool.token_count()
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub async fn acquire_token(&self) -> Token {
        self.pool.acquire_token().await
    }

    pub fn release_token(&self, token: Token) -> Result<(), LimiterError> {
        self.pool.release_token(token)
    }

    /// Run `operation` while holding a token. See [`TokenPool::invoke`].
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let token = self.acquire_token().await;
        let _lease = Lease::new(&self.pool, token);
        operation().await
    }
}

#[async_trait]
impl TokenLimiter for AdjustableTokenPool {
    async fn acquire_token(&self) -> Token {
        self.pool.acquire_token().await
    }

    fn release_token(&self, token: Token) -> Result<(), LimiterError> {
        self.pool.release_token(token)
    }
}
