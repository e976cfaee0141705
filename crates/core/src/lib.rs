//! Scorebridge Core - live-stream engagement bridge
//!
//! This crate provides:
//! - Domain types (gifts, chat, rooms, scoreboard)
//! - Frame decoder for captured platform traffic
//! - Pub/sub protocol codecs (STOMP subset, envelope framing)
//! - Auto-healing transport client
//! - Reconciliation engine and round timer
//! - Configuration, context and error types

// Version constants
pub const APP_VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod transport;
pub mod types;

// Re-export common types
pub use config::{BridgeConfig, DecoderConfig, ReconcileConfig, TransportConfig};
pub use context::{BridgeContext, DeviceId};
pub use decoder::{decode, DecodedFrame, DecoderStats, FrameDecoder};
pub use error::{CoreError, DecodeFailure, ReconciliationAnomaly, Result, TransportError};
pub use protocol::STOMP_VERSION;
pub use reconcile::{ReconciliationEngine, RoomTopics, RoomUpdate, TimerDisplay};
pub use transport::{ConnectionState, InboundMessage, TransportClient};
pub use types::{CanonicalEvent, ChatEvent, GiftEvent, RawFrame, ScoreboardState};
