//! Platform liveness tracking
//!
//! Records when the last raw frame arrived, recognized or not. A silent
//! capture session means the platform went quiet even though the socket
//! may still be open, which transport-level checks cannot see.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::types::now_millis;

/// Liveness of the captured platform stream
#[derive(Debug)]
pub struct FrameHealth {
    /// Milliseconds since the Unix epoch, 0 before the first frame
    last_frame: AtomicI64,
    window: Duration,
}

impl FrameHealth {
    /// Create tracker with the given silence window
    pub fn new(window: Duration) -> Self {
        Self {
            last_frame: AtomicI64::new(0),
            window,
        }
    }

    /// Record a frame arriving at `at_millis`
    pub fn record_frame(&self, at_millis: i64) {
        self.last_frame.fetch_max(at_millis, Ordering::Relaxed);
    }

    /// Last frame time, `None` before any frame
    pub fn last_frame(&self) -> Option<i64> {
        match self.last_frame.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    /// Healthy when the last frame is younger than the window at `now_millis`
    pub fn is_healthy_at(&self, now_millis: i64) -> bool {
        let Some(last) = self.last_frame() else {
            return false;
        };
        let window = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(last) < window
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(now_millis())
    }

    /// Milliseconds since the last frame, `None` before any frame
    pub fn silence_millis(&self, now_millis: i64) -> Option<i64> {
        self.last_frame().map(|last| now_millis.saturating_sub(last).max(0))
    }
}

impl Default for FrameHealth {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
