//! Wire protocols spoken to the coordination backend
//!
//! - [`stomp`]: the text-frame pub/sub protocol
//! - [`envelope`]: the tagged JSON-array framing wrapped around it on web channels

pub mod envelope;
pub mod stomp;

pub use envelope::EnvelopeFrame;
pub use stomp::{Command, Frame, FrameParser, Inbound, STOMP_VERSION};
