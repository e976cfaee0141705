//! Reconnection backoff schedule
//!
//! Linear: attempt n waits n × unit, up to a fixed number of attempts.
//! The schedule only computes delays; the client drives it with a timer and
//! a cancellation token.

use std::time::Duration;

/// Linear backoff schedule
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    unit: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(unit: Duration, max_attempts: u32) -> Self {
        Self {
            unit,
            max_attempts,
            attempt: 0,
        }
    }

    /// Advance to the next attempt and return its delay
    ///
    /// Returns `None` once every attempt has been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.unit * self.attempt)
    }

    /// Attempts handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
