//! High-resolution timer for frame pacing and periodic statistics.

use std::time::{Duration, Instant};

/// Timer measuring total elapsed time and fixed reporting intervals.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_report: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_report: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the time since the last report if at least `interval` has
    /// passed, and starts a new reporting window.
    ///
    /// Used by the demo loop to log frame statistics once per second.
    pub fn report_due(&mut self, interval: Duration) -> Option<Duration> {
        let now = Instant::now();
        let since = now - self.last_report;
        if since >= interval {
            self.last_report = now;
            Some(since)
        } else {
            None
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_not_due_immediately() {
        let mut timer = Timer::new();
        assert!(timer.report_due(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_report_due_with_zero_interval() {
        let mut timer = Timer::new();
        assert!(timer.report_due(Duration::ZERO).is_some());
    }
}
