//! Pub/sub transport to the coordination backend
//!
//! - [`channel`]: channel traits, endpoint resolution, envelope wrappers
//! - [`ws`] / [`tcp`]: real connectors
//! - [`memory`]: in-process connector for tests and local loops
//! - [`client`]: the auto-healing [`TransportClient`]

pub mod channel;
pub mod client;
pub mod heartbeat;
pub mod memory;
pub mod reconnect;
pub mod subscription;
pub mod tcp;
pub mod ws;

pub use channel::{ChannelKind, ChannelPair, Connector, Endpoint, FrameSink, FrameSource};
pub use client::{ConnectionState, TransportClient};
pub use heartbeat::{HeartbeatPlan, Keepalive};
pub use memory::{MemoryConnector, MemoryPeer};
pub use reconnect::ReconnectSchedule;
pub use subscription::{InboundMessage, MessageHandler};
pub use tcp::TcpConnector;
pub use ws::WsConnector;
