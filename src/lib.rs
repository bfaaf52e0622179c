#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # gatekeep
//!
//! Composable execution limiters for async Rust: gate the concurrency, rate, or failure-driven
//! backoff of repeated actions such as calls to a remote service.
//!
//! ## Limiters
//!
//! - [`TokenPool`] / [`AdjustableTokenPool`]: concurrency ceiling via opaque tokens
//! - [`FailureBackoffLimiter`]: slows down after reported failures, recovers one step per success
//! - [`WindowedRateLimiter`]: N actions per window, waiting (never rejecting) when over budget
//! - [`FixedIntervalLimiter`] / [`IntervalLimiter`]: minimum gap between actions
//! - [`FailRateLimiter`] / [`TokenFailLimiter`]: layered combinations of the above
//!
//! Every limiter is driven either by the capability traits in [`limiter`] (`check_wait` /
//! `report`, `acquire_token` / `release_token`) or by its `invoke` helper, which wraps an async
//! operation and returns its result unchanged.
//!
//! ## Quick Start
//!
//! ```rust
//! use gatekeep::{FailureBackoffLimiter, TokenFailLimiter, TokenPool};
//! use gatekeep::backoff;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = TokenFailLimiter::new(
//!         TokenPool::new(4),
//!         FailureBackoffLimiter::new(backoff::half_jitter(
//!             Duration::from_millis(1),
//!             Duration::from_secs(2),
//!         )),
//!     );
//!
//!     let result = limiter
//!         .invoke(|| async {
//!             // Your async operation here
//!             Ok::<_, std::io::Error>(())
//!         })
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod composite;
pub mod dynamic;
pub mod error;
pub mod fail;
pub mod interval;
pub mod jitter;
pub mod layer;
pub mod limiter;
pub mod oracle;
pub mod prelude;
pub mod rate;
pub mod sleeper;
pub mod token;
pub mod windowed;

// Re-exports
pub use backoff::{Backoff, BackoffFunction, JitteredBackoff};
pub use composite::{FailRateLimiter, TokenFailLimiter};
pub use dynamic::DynamicConfig;
pub use error::LimiterError;
pub use fail::FailureBackoffLimiter;
pub use interval::{FixedIntervalLimiter, IntervalLimiter};
pub use jitter::Jitter;
pub use layer::{FailLimitLayer, FailLimitService, TokenLimitLayer, TokenLimitService};
pub use limiter::{FailLimiter, RateLimiter, TokenAndFailLimiter, TokenLimiter};
pub use oracle::{AdmissionOracle, FixedWindow};
pub use rate::Rate;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use token::adjustable::AdjustableTokenPool;
pub use token::{Token, TokenPool};
pub use windowed::{WindowedRateLimiter, WindowedRateLimiterBuilder};
