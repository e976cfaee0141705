//! Heart-beat negotiation and inbound keepalive detection
//!
//! Every inbound byte (including bare-EOL heart-beats) refreshes the
//! keepalive. A connection whose server promised heart-beats and then went
//! quiet for `tolerance` intervals is considered dead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Negotiated heart-beat intervals for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPlan {
    /// How often we must send
    pub outgoing: Option<Duration>,
    /// How often the server will send
    pub incoming: Option<Duration>,
}

impl HeartbeatPlan {
    /// Combine our CONNECT offer with the server's CONNECTED answer
    ///
    /// Both pairs are (can send every ms, want to receive every ms).
    pub fn negotiate(client: (u64, u64), server: (u64, u64)) -> Self {
        let pick = |send: u64, want: u64| {
            (send != 0 && want != 0).then(|| Duration::from_millis(send.max(want)))
        };
        Self {
            outgoing: pick(client.0, server.1),
            incoming: pick(server.0, client.1),
        }
    }
}

/// Inbound activity tracker
///
/// Timestamps are milliseconds since the tracker was created, so one atomic
/// is enough and readers never lock.
#[derive(Debug)]
pub struct Keepalive {
    origin: Instant,
    last_activity_ms: AtomicU64,
    timeout: Option<Duration>,
}

impl Keepalive {
    /// `timeout = None` disables expiry (server sends no heart-beats)
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            timeout,
        }
    }

    /// Keepalive for a negotiated plan: silence of `tolerance` server intervals expires it
    pub fn for_plan(plan: &HeartbeatPlan, tolerance: u32) -> Self {
        Self::new(plan.incoming.map(|d| d * tolerance.max(1)))
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Call on every inbound chunk
    pub fn record_activity(&self) {
        self.last_activity_ms
            .fetch_max(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the last inbound byte
    pub fn idle(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_alive(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.idle() <= timeout,
            None => true,
        }
    }
}
