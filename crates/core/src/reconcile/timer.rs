//! Round timer evaluation and the round-advance guard
//!
//! The timer is re-evaluated periodically against wall-clock time passed in
//! by the caller. When an active round runs out, the advance signal fires
//! once; the guard stays armed until the backend replaces the session window
//! or the guard timeout passes without that happening.

use std::fmt;
use std::sync::Mutex;

use crate::config::ReconcileConfig;
use crate::types::{SessionStatus, SessionWindow};

/// What the overlay shows for the round clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerDisplay {
    Countdown { remaining_ms: i64 },
    Paused(String),
    Ended,
    /// No round configured yet
    Idle,
}

impl TimerDisplay {
    /// Evaluate a session window at `now_ms`
    pub fn evaluate(window: &SessionWindow, now_ms: i64, sentinel: &str) -> Self {
        match window.status {
            SessionStatus::Paused => Self::Paused(sentinel.to_string()),
            SessionStatus::Active => {
                let remaining_ms = window.deadline().saturating_sub(now_ms);
                if remaining_ms > 0 {
                    Self::Countdown { remaining_ms }
                } else {
                    Self::Ended
                }
            }
            SessionStatus::Ended if window.session_id.is_empty() => Self::Idle,
            SessionStatus::Ended => Self::Ended,
        }
    }
}

impl fmt::Display for TimerDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Countdown { remaining_ms } => {
                // Round up so the clock reads 00:01 until the last ms
                let secs = (remaining_ms + 999) / 1000;
                write!(f, "{:02}:{:02}", secs / 60, secs % 60)
            }
            Self::Paused(sentinel) => f.write_str(sentinel),
            Self::Ended => f.write_str("00:00"),
            Self::Idle => f.write_str("--:--"),
        }
    }
}

/// Result of one timer evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub display: TimerDisplay,
    /// Caller must send the round-advance request now
    pub advance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArmedGuard {
    session_id: String,
    start_time: i64,
    fired_at: i64,
}

/// Decides when the round-advance signal fires
#[derive(Debug)]
pub struct RoundTimer {
    sentinel: String,
    guard_timeout_ms: i64,
    guard: Mutex<Option<ArmedGuard>>,
}

impl RoundTimer {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            sentinel: config.paused_sentinel.clone(),
            guard_timeout_ms: i64::try_from(config.advance_guard_timeout_ms).unwrap_or(i64::MAX),
            guard: Mutex::new(None),
        }
    }

    pub fn tick(&self, window: &SessionWindow, now_ms: i64) -> Tick {
        let display = TimerDisplay::evaluate(window, now_ms, &self.sentinel);
        let expired = window.status == SessionStatus::Active && display == TimerDisplay::Ended;
        let advance = expired && self.try_arm(window, now_ms);
        if advance {
            tracing::info!(session = %window.session_id, "Round expired, requesting advance");
        }
        Tick { display, advance }
    }

    /// Disarm the guard so the next expired tick fires again
    pub fn release(&self) {
        *self.lock() = None;
    }

    /// True while an advance is in flight
    pub fn is_armed(&self, now_ms: i64) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|g| now_ms.saturating_sub(g.fired_at) < self.guard_timeout_ms)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ArmedGuard>> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_arm(&self, window: &SessionWindow, now_ms: i64) -> bool {
        let mut guard = self.lock();
        if let Some(armed) = guard.as_ref() {
            let same_round =
                armed.session_id == window.session_id && armed.start_time == window.start_time;
            let in_flight = now_ms.saturating_sub(armed.fired_at) < self.guard_timeout_ms;
            if same_round && in_flight {
                return false;
            }
            if same_round {
                tracing::warn!(
                    session = %window.session_id,
                    "Round advance not confirmed in time, retrying"
                );
            }
        }
        *guard = Some(ArmedGuard {
            session_id: window.session_id.clone(),
            start_time: window.start_time,
            fired_at: now_ms,
        });
        true
    }
}
