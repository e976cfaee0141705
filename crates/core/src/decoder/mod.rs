//! Frame decoder for captured platform socket traffic
//!
//! Turns one raw frame into zero or one canonical event:
//! 1. Everything before the first `{` is an opaque transport prefix
//! 2. The rest is parsed as a JSON object
//! 3. Known shapes are tried in a fixed order (see [`shapes`])
//!
//! Decoding never fails loudly: malformed input yields
//! [`DecodedFrame::Unrecognized`] and is counted.

mod fields;
mod health;
mod shapes;
mod sink;

pub use health::FrameHealth;
pub use shapes::DecodedFrame;
pub use sink::{ChannelSink, DiagnosticSink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::DecoderConfig;
use crate::error::DecodeFailure;
use crate::types::RawFrame;
use shapes::{ShapeInput, CLASSIFIERS};

/// Decode one frame without side effects
///
/// `default_room` is used when the frame does not name its room.
pub fn decode(frame: &RawFrame, default_room: &str) -> DecodedFrame {
    let bytes = frame.payload.as_ref();
    let Some(start) = bytes.iter().position(|b| *b == b'{') else {
        return DecodedFrame::Unrecognized(DecodeFailure::NoJson);
    };

    // Only the first JSON value counts; trailing bytes are transport noise
    let mut values = serde_json::Deserializer::from_slice(&bytes[start..]).into_iter::<Value>();
    let root = match values.next() {
        Some(Ok(Value::Object(map))) => map,
        _ => return DecodedFrame::Unrecognized(DecodeFailure::BadJson),
    };

    let input = ShapeInput {
        root: &root,
        default_room,
        received_at: frame.received_at,
    };
    CLASSIFIERS
        .iter()
        .find_map(|classify| classify(&input))
        .unwrap_or(DecodedFrame::Unrecognized(DecodeFailure::UnknownShape))
}

/// Decoder counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub frames: u64,
    pub gifts: u64,
    pub chats: u64,
    pub no_json: u64,
    pub bad_json: u64,
    pub unknown_shape: u64,
}

impl DecoderStats {
    pub fn failures(&self) -> u64 {
        self.no_json + self.bad_json + self.unknown_shape
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    gifts: AtomicU64,
    chats: AtomicU64,
    no_json: AtomicU64,
    bad_json: AtomicU64,
    unknown_shape: AtomicU64,
}

impl Counters {
    fn record(&self, decoded: &DecodedFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let counter = match decoded {
            DecodedFrame::GiftShapeA(_) | DecodedFrame::GiftShapeB(_) => &self.gifts,
            DecodedFrame::Chat(_) => &self.chats,
            DecodedFrame::Unrecognized(DecodeFailure::NoJson) => &self.no_json,
            DecodedFrame::Unrecognized(DecodeFailure::BadJson) => &self.bad_json,
            DecodedFrame::Unrecognized(DecodeFailure::UnknownShape) => &self.unknown_shape,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DecoderStats {
        DecoderStats {
            frames: self.frames.load(Ordering::Relaxed),
            gifts: self.gifts.load(Ordering::Relaxed),
            chats: self.chats.load(Ordering::Relaxed),
            no_json: self.no_json.load(Ordering::Relaxed),
            bad_json: self.bad_json.load(Ordering::Relaxed),
            unknown_shape: self.unknown_shape.load(Ordering::Relaxed),
        }
    }
}

/// Stateful decoder: health, counters and the optional diagnostic mirror
///
/// All state is atomic, so one decoder can be shared behind an `Arc`.
pub struct FrameDecoder {
    default_room: String,
    health: FrameHealth,
    counters: Counters,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl FrameDecoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            default_room: config.room_id.clone(),
            health: FrameHealth::new(config.health_window()),
            counters: Counters::default(),
            sink: None,
        }
    }

    /// Mirror every raw frame to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Decode a frame, recording liveness and counters
    pub fn decode(&self, frame: &RawFrame) -> DecodedFrame {
        self.health.record_frame(frame.received_at);
        if let Some(sink) = &self.sink {
            sink.mirror(frame);
        }

        let decoded = decode(frame, &self.default_room);
        self.counters.record(&decoded);

        if let Some(failure) = decoded.failure() {
            tracing::debug!(%failure, len = frame.len(), "Dropped unrecognized frame");
        }
        decoded
    }

    /// True if a frame arrived within the health window
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn health(&self) -> &FrameHealth {
        &self.health
    }

    pub fn stats(&self) -> DecoderStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("default_room", &self.default_room)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
