#![allow(missing_docs)]

use gatekeep::{AdjustableTokenPool, LimiterError, TokenLimiter, TokenPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn peak_concurrency<L>(limiter: L, callers: usize) -> usize
where
    L: TokenLimiter + Clone + 'static,
{
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let token = limiter.acquire_token().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                limiter.release_token(token).expect("token came from this pool");
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        task.expect("task panicked");
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_its_size() {
    let pool = TokenPool::new(3);
    let peak = peak_concurrency(pool.clone(), 32).await;
    assert!(peak <= 3, "peak concurrency {peak}");
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adjustable_pool_respects_current_size() {
    let pool = AdjustableTokenPool::new(2, 8).expect("initial fits ceiling");
    let peak = peak_concurrency(pool.clone(), 32).await;
    assert!(peak <= 2, "peak concurrency {peak}");

    pool.add_tokens(4).expect("within ceiling");
    let peak = peak_concurrency(pool.clone(), 64).await;
    assert!(peak <= 6, "peak concurrency {peak}");
    assert_eq!(pool.token_count(), 6);
}

#[tokio::test]
async fn waiter_is_woken_by_release() {
    let pool = TokenPool::new(1);
    let held = pool.acquire_token().await;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_token().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    pool.release_token(held).unwrap();
    let token = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    assert_eq!(token, held, "the only token is handed on");
}

#[tokio::test]
async fn foreign_and_double_releases_are_rejected() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let a = TokenPool::new(1);
    let b = TokenPool::new(1);

    let token = a.acquire_token().await;
    assert_eq!(b.release_token(token), Err(LimiterError::UnknownToken));
    a.release_token(token).unwrap();
    assert_eq!(a.release_token(token), Err(LimiterError::UnknownToken));
    assert_eq!(a.available(), 1);
    assert_eq!(b.available(), 1);
}

#[tokio::test]
async fn shrinking_leaves_held_tokens_alone() {
    let pool = AdjustableTokenPool::new(3, 3).unwrap();
    let held = pool.acquire_token().await;

    assert_eq!(pool.remove_tokens(usize::MAX), 2);
    assert_eq!(pool.token_count(), 1);
    assert_eq!(pool.in_flight(), 1);

    pool.release_token(held).unwrap();
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.remove_tokens(1), 1);
    assert_eq!(pool.token_count(), 0);
}

#[tokio::test]
async fn growing_past_ceiling_keeps_partial_add() {
    let pool = AdjustableTokenPool::new(1, 4).unwrap();
    let err = pool.add_tokens(5).unwrap_err();
    assert!(err.is_capacity_exceeded());
    assert_eq!(err.tokens_added(), Some(3));
    assert_eq!(pool.token_count(), 4);
}

#[tokio::test]
async fn dropped_invoke_returns_its_token() {
    let pool = TokenPool::new(1);
    let started = Arc::new(tokio::sync::Notify::new());

    let task = {
        let pool = pool.clone();
        let started = started.clone();
        tokio::spawn(async move {
            pool.invoke(|| async move {
                started.notify_one();
                std::future::pending::<Result<(), std::io::Error>>().await
            })
            .await
        })
    };

    started.notified().await;
    assert_eq!(pool.available(), 0);
    task.abort();
    let _ = task.await;
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.in_flight(), 0);
}
