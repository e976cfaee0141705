//! Raw frames handed over by the capture collaborator

use bytes::Bytes;

/// One captured socket frame, opaque until decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Payload as yielded by the capture side (text or bytes)
    pub payload: Bytes,
    /// Arrival time in milliseconds since the Unix epoch
    pub received_at: i64,
}

impl RawFrame {
    /// Create frame with an explicit arrival time
    pub fn new(payload: impl Into<Bytes>, received_at: i64) -> Self {
        Self {
            payload: payload.into(),
            received_at,
        }
    }

    /// Create frame stamped with the current time
    pub fn now(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, super::now_millis())
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
