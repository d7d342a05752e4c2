//! Stall detection and retry backoff for one download.

use std::time::Duration;

use tracing::debug;

use crate::constants::{INITIAL_RETRY_DELAY, MAX_RETRY_DELAY};

/// Counts consecutive progress checks without new bytes and computes the
/// exponential retry delay after failures.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    next_retry_delay: Duration,
    no_progress_intervals: u32,
    last_seen_bytes: u64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(INITIAL_RETRY_DELAY, MAX_RETRY_DELAY)
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new(initial_retry_delay: Duration, max_retry_delay: Duration) -> Self {
        Self {
            initial_retry_delay,
            max_retry_delay,
            next_retry_delay: initial_retry_delay,
            no_progress_intervals: 0,
            last_seen_bytes: 0,
        }
    }

    /// Records one periodic check. Returns `true` once `max_intervals`
    /// consecutive checks saw no new bytes.
    pub fn check_progress(&mut self, bytes_transferred: u64, max_intervals: u32) -> bool {
        if bytes_transferred > self.last_seen_bytes {
            self.no_progress_intervals = 0;
            self.last_seen_bytes = bytes_transferred;
        } else {
            self.no_progress_intervals += 1;
        }
        debug!(
            bytes_transferred = self.last_seen_bytes,
            no_progress_intervals = self.no_progress_intervals,
            max_intervals,
            "progress check"
        );
        self.no_progress_intervals >= max_intervals
    }

    /// Doubles the next retry delay, up to the cap.
    pub fn on_failure(&mut self) {
        self.next_retry_delay = (self.next_retry_delay * 2).min(self.max_retry_delay);
    }

    /// Restores the initial retry delay and forgets the no-progress count.
    pub fn reset(&mut self) {
        self.next_retry_delay = self.initial_retry_delay;
        self.no_progress_intervals = 0;
    }

    #[must_use]
    pub fn next_retry_delay(&self) -> Duration {
        self.next_retry_delay
    }

    #[must_use]
    pub fn no_progress_intervals(&self) -> u32 {
        self.no_progress_intervals
    }
}

/// Number of check intervals making up a no-progress timeout.
///
/// Without an explicit timeout `default_intervals` applies. Otherwise
/// `timeout / interval` is rounded to the nearest whole interval, never less
/// than one.
#[must_use]
pub fn max_no_progress_intervals(
    timeout: Option<Duration>,
    check_interval: Duration,
    default_intervals: u32,
) -> u32 {
    let Some(timeout) = timeout else {
        return default_intervals;
    };
    if check_interval.is_zero() {
        return 1;
    }
    let intervals = (timeout.as_secs_f64() / check_interval.as_secs_f64()).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let intervals = intervals.min(f64::from(u32::MAX)) as u32;
    intervals.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.next_retry_delay(), Duration::from_secs(1));

        let mut seen = Vec::new();
        for _ in 0..7 {
            tracker.on_failure();
            seen.push(tracker.next_retry_delay().as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_reset_restores_initial_delay_and_counter() {
        let mut tracker = ProgressTracker::default();
        tracker.on_failure();
        tracker.on_failure();
        assert!(!tracker.check_progress(0, 5));
        assert_eq!(tracker.no_progress_intervals(), 1);

        tracker.reset();
        assert_eq!(tracker.next_retry_delay(), Duration::from_secs(1));
        assert_eq!(tracker.no_progress_intervals(), 0);
    }

    #[test]
    fn test_check_progress_times_out_after_max_intervals() {
        let mut tracker = ProgressTracker::default();
        assert!(!tracker.check_progress(100, 3));
        assert!(!tracker.check_progress(100, 3));
        assert!(!tracker.check_progress(100, 3));
        assert!(tracker.check_progress(100, 3));
    }

    #[test]
    fn test_check_progress_resets_on_forward_movement() {
        let mut tracker = ProgressTracker::default();
        assert!(!tracker.check_progress(0, 2));
        assert!(!tracker.check_progress(50, 2));
        assert_eq!(tracker.no_progress_intervals(), 0);
        assert!(!tracker.check_progress(50, 2));
        assert!(tracker.check_progress(50, 2));
    }

    #[test]
    fn test_max_no_progress_intervals() {
        let interval = Duration::from_secs(10);
        assert_eq!(max_no_progress_intervals(None, interval, 30), 30);
        assert_eq!(max_no_progress_intervals(None, interval, 6), 6);
        assert_eq!(
            max_no_progress_intervals(Some(Duration::from_secs(60)), interval, 30),
            6
        );
        assert_eq!(
            max_no_progress_intervals(Some(Duration::from_secs(14)), interval, 30),
            1
        );
        assert_eq!(
            max_no_progress_intervals(Some(Duration::from_secs(15)), interval, 30),
            2
        );
        assert_eq!(
            max_no_progress_intervals(Some(Duration::from_secs(1)), interval, 30),
            1
        );
    }
}
