//! Error types for limiters
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by limiter configuration and token accounting.
///
/// Errors returned by operations wrapped with `invoke` are never converted into this type; they
/// reach the caller untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// Adding tokens would push the pool past its ceiling. `added` tokens were created before the
    /// ceiling was hit; they are not rolled back.
    #[error("token ceiling reached: requested {requested}, added {added}, max {max}")]
    CapacityExceeded { requested: usize, added: usize, max: usize },
    /// The released token is not currently held by a caller of this pool (double release, or a
    /// token minted by another pool).
    #[error("released token is not held by a caller of this pool")]
    UnknownToken,
    /// A rate needs a non-zero duration.
    #[error("rate duration must be > 0 (got {count} per {duration:?})")]
    InvalidRate { count: u32, duration: Duration },
    /// Interval recheck periods must be non-zero.
    #[error("recheck period must be > 0")]
    InvalidRecheck,
}

impl LimiterError {
    /// Check if this error is a capacity overflow from `add_tokens`.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Check if this error is a rejected token release.
    pub fn is_unknown_token(&self) -> bool {
        matches!(self, Self::UnknownToken)
    }

    /// Number of tokens created before the ceiling was hit, if this is a capacity error.
    pub fn tokens_added(&self) -> Option<usize> {
        match self {
            Self::CapacityExceeded { added, .. } => Some(*added),
            _ => None,
        }
    }
}
