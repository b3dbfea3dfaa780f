//! Per-device sampling frequency
//!
//! Counts messages in rolling one-second windows. A value is published at
//! most once per second and always describes the window that just ended,
//! never an instantaneous per-message rate.

use std::time::{Duration, Instant};

/// Length of one counting window
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Rolling message counter for one device
#[derive(Debug, Clone)]
pub struct SampleRateEstimator {
    count: u32,
    window_start: Instant,
    window: Duration,
}

impl SampleRateEstimator {
    /// Start the first window at `now`
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, SAMPLE_WINDOW)
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
        }
    }

    /// Count one message received at `now`
    ///
    /// If the current window has elapsed, its count is returned and the
    /// message opens the next window.
    pub fn record(&mut self, now: Instant) -> Option<u32> {
        let published = self.roll(now);
        self.count += 1;
        published
    }

    /// Close the window at `now` if it has elapsed, without counting a message
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        self.roll(now)
    }

    /// Messages counted in the open window
    pub fn pending(&self) -> u32 {
        self.count
    }

    fn roll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) < self.window {
            return None;
        }
        let published = self.count;
        self.count = 0;
        self.window_start = now;
        Some(published)
    }
}
