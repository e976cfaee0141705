//! Envelope framing used over the web channel
//!
//! Every inbound text message starts with a one-byte tag:
//! - `o` session open
//! - `h` server heart-beat
//! - `a` JSON array of inner frames
//! - `c` JSON `[code, reason]`, the server closed the session
//!
//! Outbound inner frames are sent as a one-element JSON array.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Decoded envelope message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeFrame {
    Open,
    Heartbeat,
    Close { code: u16, reason: String },
    /// Inner frames, in delivery order
    Data(Vec<String>),
    /// No known tag; passed through untouched
    Raw(String),
}

/// Decode one inbound text message
pub fn decode(text: &str) -> Result<EnvelopeFrame> {
    let Some(tag) = text.chars().next() else {
        return Ok(EnvelopeFrame::Raw(String::new()));
    };
    let rest = &text[tag.len_utf8()..];

    match tag {
        'o' => Ok(EnvelopeFrame::Open),
        'h' => Ok(EnvelopeFrame::Heartbeat),
        'a' => {
            let frames: Vec<String> = serde_json::from_str(rest)
                .map_err(|e| CoreError::Protocol(format!("Bad envelope array: {}", e)))?;
            Ok(EnvelopeFrame::Data(frames))
        }
        'c' => {
            // Lenient: a malformed close payload is still a close
            let parts: Vec<Value> = serde_json::from_str(rest).unwrap_or_default();
            let code = parts
                .first()
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(0);
            let reason = parts
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(EnvelopeFrame::Close { code, reason })
        }
        _ => Ok(EnvelopeFrame::Raw(text.to_string())),
    }
}

/// Wrap one outbound inner frame
pub fn encode(frame: &str) -> Result<String> {
    Ok(serde_json::to_string(&[frame])?)
}

/// Server-side form of a data message (used by test peers)
pub fn encode_data(frames: &[String]) -> Result<String> {
    Ok(format!("a{}", serde_json::to_string(frames)?))
}
