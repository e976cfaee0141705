//! Error types for scorebridge-core

use thiserror::Error;

/// Why a raw frame produced no canonical event
///
/// Always recovered locally: the frame is dropped and counted.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum DecodeFailure {
    #[error("frame carries no JSON object")]
    NoJson,

    #[error("frame JSON is malformed")]
    BadJson,

    #[error("frame JSON matches no known event shape")]
    UnknownShape,
}

/// Transport client failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,
}

/// Upstream data-quality problems seen by the reconciliation engine
///
/// Logged and dropped, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconciliationAnomaly {
    #[error("no team owns room {room_id}")]
    UnresolvedTeam { room_id: String },

    #[error("full-state seq {seq} is not newer than {current}")]
    StaleFullState { seq: u64, current: u64 },

    #[error("full-state teams do not match the current configuration")]
    MismatchedTeams,
}

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeFailure),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Reconciliation anomaly: {0}")]
    Reconciliation(#[from] ReconciliationAnomaly),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// True when this error means the client can never be used again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoreError::Transport(TransportError::Closed))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CoreError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CoreError::Transport(TransportError::DialFailed(err.to_string()))
    }
}
