//! Convenient re-exports for common gatekeep types.
pub use crate::{
    backoff::{Backoff, BackoffError, BackoffFunction, JitteredBackoff, MAX_BACKOFF},
    composite::{FailRateLimiter, TokenFailLimiter},
    fail::FailureBackoffLimiter,
    interval::{FixedIntervalLimiter, IntervalLimiter},
    jitter::Jitter,
    layer::{FailLimitLayer, TokenLimitLayer},
    limiter::{FailLimiter, RateLimiter, TokenAndFailLimiter, TokenLimiter},
    oracle::AdmissionOracle,
    token::{adjustable::AdjustableTokenPool, Token, TokenPool},
    windowed::WindowedRateLimiter,
    LimiterError, Rate,
};
