//! Admission oracles: non-blocking "may one more action run now?" decisions.
//!
//! The [`WindowedRateLimiter`](crate::WindowedRateLimiter) turns an oracle's rejections into
//! waits. Oracles never sleep themselves.

use crate::Rate;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Answers whether one more action is allowed right now under a configured rate.
///
/// Called at high frequency from many tasks; must not block.
pub trait AdmissionOracle: Send + Sync + fmt::Debug {
    fn allow(&self) -> bool;

    /// How long until `allow` could next succeed, if the oracle knows. Retry loops never sleep
    /// past this point. `None` means no hint.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Builds a fresh oracle for a rate. Used at construction and on every rate change.
pub type OracleFactory = Arc<dyn Fn(Rate) -> Arc<dyn AdmissionOracle> + Send + Sync>;

/// Default factory: a [`FixedWindow`] per rate.
pub fn fixed_window_factory() -> OracleFactory {
    Arc::new(|rate| Arc::new(FixedWindow::new(rate)) as Arc<dyn AdmissionOracle>)
}

/// Fixed-window counter.
///
/// The first call opens a window that admits up to `rate.count()` calls. Later windows keep the
/// cadence of the first one (`opened + k * rate.duration()`), so a late caller does not push
/// every following window back. Bursts straddling a window boundary may briefly exceed the rate.
#[derive(Debug)]
pub struct FixedWindow {
    limit: u32,
    length: Duration,
    window: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    opened: Option<Instant>,
    remaining: u32,
}

impl FixedWindow {
    pub fn new(rate: Rate) -> Self {
        Self { limit: rate.count(), length: rate.duration(), window: Mutex::default() }
    }

    /// Start of the window containing `now`, keeping the cadence set by `opened`.
    fn window_start(&self, opened: Instant, now: Instant) -> Instant {
        let elapsed = now.saturating_duration_since(opened).as_nanos();
        elapsed
            .checked_rem(self.length.as_nanos())
            .and_then(|into| u64::try_from(into).ok())
            .and_then(|into| now.checked_sub(Duration::from_nanos(into)))
            .unwrap_or(now)
    }
}

impl AdmissionOracle for FixedWindow {
    fn allow(&self) -> bool {
        if self.limit == 0 {
            return false;
        }
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        match window.opened {
            Some(opened) if now.saturating_duration_since(opened) < self.length => {
                if window.remaining == 0 {
                    return false;
                }
                window.remaining -= 1;
                true
            }
            previous => {
                window.opened = Some(previous.map_or(now, |opened| self.window_start(opened, now)));
                window.remaining = self.limit - 1;
                true
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        if self.limit == 0 {
            return None;
        }
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        match window.opened {
            Some(_) if window.remaining > 0 => Some(Duration::ZERO),
            Some(opened) => {
                let closes = opened.checked_add(self.length)?;
                Some(closes.saturating_duration_since(Instant::now()))
            }
            None => Some(Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_limit_per_window() {
        let oracle = FixedWindow::new(Rate::new(3, Duration::from_millis(10)).unwrap());

        assert!(oracle.allow());
        assert!(oracle.allow());
        assert_eq!(oracle.retry_after(), Some(Duration::ZERO));
        assert!(oracle.allow());
        assert!(!oracle.allow());
        assert_eq!(oracle.retry_after(), Some(Duration::from_millis(10)));

        tokio::time::advance(Duration::from_millis(4)).await;
        assert_eq!(oracle.retry_after(), Some(Duration::from_millis(6)));

        tokio::time::advance(Duration::from_millis(6)).await;
        assert_eq!(oracle.retry_after(), Some(Duration::ZERO));
        assert!(oracle.allow());
        assert!(oracle.allow());
        assert!(oracle.allow());
        assert!(!oracle.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn late_caller_keeps_window_cadence() {
        let oracle = FixedWindow::new(Rate::per_millisecond(1));
        assert!(oracle.allow());

        // Arrive 0.7ms into the third window: it still closes on the 1ms grid.
        tokio::time::advance(Duration::from_micros(2_700)).await;
        assert!(oracle.allow());
        assert!(!oracle.allow());
        assert_eq!(oracle.retry_after(), Some(Duration::from_micros(300)));

        tokio::time::advance(Duration::from_micros(300)).await;
        assert!(oracle.allow());
    }

    #[test]
    fn zero_count_never_admits() {
        let oracle = FixedWindow::new(Rate::per_second(0));
        assert!(!oracle.allow());
        assert!(!oracle.allow());
        assert_eq!(oracle.retry_after(), None);
    }

    #[test]
    fn factory_builds_independent_oracles() {
        let factory = fixed_window_factory();
        let a = factory(Rate::per_second(1));
        let b = factory(Rate::per_second(1));
        assert!(a.allow());
        assert!(b.allow());
        assert!(!a.allow());
    }
}
