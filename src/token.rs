//! Token pools enforcing a concurrency ceiling.
//!
//! A [`TokenPool`] starts with a fixed number of [`Token`]s. Acquiring takes one out of the
//! available set, waiting while it is empty; releasing puts it back and wakes one waiter. At no
//! point can more callers hold tokens than the pool has tokens.
//!
//! Pools track which tokens are in flight, so a double release or a token from another pool is
//! rejected with [`LimiterError::UnknownToken`] instead of inflating capacity.
//!
//! ```rust
//! use gatekeep::TokenPool;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pool = TokenPool::new(2);
//! let token = pool.acquire_token().await;
//! assert_eq!(pool.available(), 1);
//! pool.release_token(token).unwrap();
//! assert!(pool.release_token(token).is_err()); // already returned
//!
//! let answer = pool.invoke(|| async { Ok::<_, std::io::Error>(42) }).await.unwrap();
//! assert_eq!(answer, 42);
//! # });
//! ```

use crate::limiter::TokenLimiter;
use crate::LimiterError;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub mod adjustable;

/// One unit of permitted concurrency: an opaque 128-bit identifier.
///
/// Tokens are `Copy` so they can be handed around freely, but only the holder that acquired one
/// may release it; pools reject anything they have not handed out.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(Uuid);

impl Token {
    fn mint() -> Self {
        Token(Uuid::new_v4())
    }

    /// Raw 128-bit value.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0.simple())
    }
}

#[derive(Debug, Default)]
struct Ledger {
    available: VecDeque<Token>,
    in_flight: HashSet<Token>,
}

// Invariant: semaphore permits <= ledger.available.len(). Permits are taken before a token is
// popped and added after a token is pushed.
#[derive(Debug)]
struct PoolInner {
    permits: Semaphore,
    ledger: Mutex<Ledger>,
}

impl PoolInner {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size token pool. Clones share the same tokens.
#[derive(Debug, Clone)]
pub struct TokenPool {
    inner: Arc<PoolInner>,
}

impl TokenPool {
    /// Create a pool pre-filled with `initial` tokens.
    pub fn new(initial: usize) -> Self {
        let pool = Self {
            inner: Arc::new(PoolInner {
                permits: Semaphore::new(0),
                ledger: Mutex::new(Ledger::default()),
            }),
        };
        pool.mint(initial);
        pool
    }

    /// Wait until a token is available and take it.
    ///
    /// Cancel-safe: dropping the future before it resolves never consumes a token.
    pub async fn acquire_token(&self) -> Token {
        let permit = match self.inner.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("token pool semaphore is never closed"),
        };
        permit.forget();

        let mut ledger = self.inner.ledger();
        let Some(token) = ledger.available.pop_front() else {
            unreachable!("permit acquired without an available token");
        };
        ledger.in_flight.insert(token);
        token
    }

    /// Return a token to the available set, waking one waiting acquirer.
    pub fn release_token(&self, token: Token) -> Result<(), LimiterError> {
        {
            let mut ledger = self.inner.ledger();
            if !ledger.in_flight.remove(&token) {
                tracing::warn!(?token, "rejected release of a token not held from this pool");
                return Err(LimiterError::UnknownToken);
            }
            ledger.available.push_back(token);
        }
        self.inner.permits.add_permits(1);
        Ok(())
    }

    /// Run `operation` while holding a token. The operation's result is returned unchanged.
    ///
    /// The token is released when the operation completes or when the returned future is dropped.
    pub async fn invoke<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let token = self.acquire_token().await;
        let _lease = Lease::new(self, token);
        operation().await
    }

    /// Tokens waiting in the pool.
    pub fn available(&self) -> usize {
        self.inner.ledger().available.len()
    }

    /// Tokens currently held by callers.
    pub fn in_flight(&self) -> usize {
        self.inner.ledger().in_flight.len()
    }

    /// All tokens owned by the pool, available or in flight.
    pub fn token_count(&self) -> usize {
        let ledger = self.inner.ledger();
        ledger.available.len() + ledger.in_flight.len()
    }

    pub(crate) fn mint(&self, count: usize) {
        if count == 0 {
            return;
        }
        {
            let mut ledger = self.inner.ledger();
            ledger.available.extend((0..count).map(|_| Token::mint()));
        }
        self.inner.permits.add_permits(count);
    }

    /// Discard up to `count` available tokens without waiting. Returns how many were discarded.
    pub(crate) fn retire(&self, count: usize) -> usize {
        let mut ledger = self.inner.ledger();
        let mut retired = 0;
        while retired < count {
            let Ok(permit) = self.inner.permits.try_acquire() else {
                break;
            };
            permit.forget();
            if ledger.available.pop_front().is_none() {
                break;
            }
            retired += 1;
        }
        retired
    }
}

#[async_trait]
impl TokenLimiter for TokenPool {
    async fn acquire_token(&self) -> Token {
        TokenPool::acquire_token(self).await
    }

    fn release_token(&self, token: Token) -> Result<(), LimiterError> {
        TokenPool::release_token(self, token)
    }
}

/// Releases a token on drop unless it was taken back with [`Lease::into_token`].
pub(crate) struct Lease<'a, L: TokenLimiter + ?Sized> {
    limiter: &'a L,
    token: Option<Token>,
}

impl<'a, L: TokenLimiter + ?Sized> Lease<'a, L> {
    pub(crate) fn new(limiter: &'a L, token: Token) -> Self {
        Self { limiter, token: Some(token) }
    }

    pub(crate) fn into_token(mut self) -> Option<Token> {
        self.token.take()
    }
}

impl<L: TokenLimiter + ?Sized> Drop for Lease<'_, L> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // The token came from this limiter, so the release cannot be rejected.
            let _ = self.limiter.release_token(token);
        }
    }
}
