//! Bridge configuration
//!
//! Every field has a default so a partial JSON file is enough; the agent
//! binary layers CLI overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CoreError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend room the overlay belongs to (scopes all destinations)
    pub room_id: String,
    pub transport: TransportConfig,
    pub decoder: DecoderConfig,
    pub reconcile: ReconcileConfig,
    /// Mirror raw frames to this file when set
    pub diagnostics_path: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(CoreError::Config("room_id cannot be empty".into()));
        }
        self.transport.validate()?;
        self.reconcile.validate()
    }
}

/// Transport client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// `tcp://`, `ws(s)://` or `http(s)://` endpoint of the coordination backend
    pub url: String,
    /// Bearer token, sent as a query parameter and as a header
    pub token: Option<String>,
    /// Virtual host for the pub/sub CONNECT frame (defaults to the URL host)
    pub host: Option<String>,
    pub dial_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    /// Attempt n waits n × this unit
    pub reconnect_unit_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Heart-beat we offer to send, in ms (0 = none)
    pub heartbeat_outgoing_ms: u64,
    /// Heart-beat we want to receive, in ms (0 = none)
    pub heartbeat_incoming_ms: u64,
    /// Silence longer than this many server intervals is unhealthy
    pub keepalive_tolerance: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            token: None,
            host: None,
            dial_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            health_check_interval_ms: 5_000,
            reconnect_unit_ms: 2_000,
            max_reconnect_attempts: 10,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
            keepalive_tolerance: 3,
        }
    }
}

impl TransportConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn reconnect_unit(&self) -> Duration {
        Duration::from_millis(self.reconnect_unit_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CoreError::Config("transport.url cannot be empty".into()));
        }
        if self.dial_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(CoreError::Config("transport timeouts must be non-zero".into()));
        }
        if self.health_check_interval_ms == 0 {
            return Err(CoreError::Config(
                "transport.health_check_interval_ms must be non-zero".into(),
            ));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(CoreError::Config(
                "transport.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.keepalive_tolerance == 0 {
            return Err(CoreError::Config(
                "transport.keepalive_tolerance must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Frame decoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    /// Platform room of the capture session, used when a frame omits it
    pub room_id: String,
    /// Silence longer than this marks the platform stream unhealthy
    pub health_window_secs: u64,
    /// Capacity of the diagnostic mirror buffer
    pub mirror_capacity: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            health_window_secs: 30,
            mirror_capacity: 1024,
        }
    }
}

impl DecoderConfig {
    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health_window_secs)
    }
}

/// Reconciliation engine and timer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Shown instead of a countdown while the session is paused
    pub paused_sentinel: String,
    /// Round-advance guard is released after this long without confirmation
    pub advance_guard_timeout_ms: u64,
    /// Timer re-evaluation period
    pub tick_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            paused_sentinel: "PAUSED".to_string(),
            advance_guard_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
        }
    }
}

impl ReconcileConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(CoreError::Config(
                "reconcile.tick_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
