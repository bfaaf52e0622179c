//! `Rate`: "N events per duration".

use crate::LimiterError;
use std::time::Duration;

/// A count of events allowed per duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rate {
    count: u32,
    duration: Duration,
}

impl Rate {
    /// Create a rate of `count` events per `duration`. The duration must be non-zero.
    pub fn new(count: u32, duration: Duration) -> Result<Self, LimiterError> {
        if duration.is_zero() {
            return Err(LimiterError::InvalidRate { count, duration });
        }
        Ok(Self { count, duration })
    }

    /// `count` events per second.
    pub fn per_second(count: u32) -> Self {
        Self { count, duration: Duration::from_secs(1) }
    }

    /// `count` events per millisecond.
    pub fn per_millisecond(count: u32) -> Self {
        Self { count, duration: Duration::from_millis(1) }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_duration() {
        let err = Rate::new(10, Duration::ZERO).unwrap_err();
        assert_eq!(err, LimiterError::InvalidRate { count: 10, duration: Duration::ZERO });
    }

    #[test]
    fn zero_count_is_valid() {
        let rate = Rate::new(0, Duration::from_secs(1)).unwrap();
        assert_eq!(rate.count(), 0);
    }

    #[test]
    fn shorthand_constructors() {
        assert_eq!(Rate::per_second(4).duration(), Duration::from_secs(1));
        assert_eq!(Rate::per_millisecond(1).duration(), Duration::from_millis(1));
    }
}
