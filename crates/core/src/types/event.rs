//! Canonical events, independent of the wire shape they came from

use serde::{Deserialize, Serialize};

use super::{ChatEvent, GiftEvent};

/// Fully typed event produced by the decoder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CanonicalEvent {
    Gift(GiftEvent),
    Chat(ChatEvent),
}

impl CanonicalEvent {
    /// Platform room the event was captured from
    pub fn room_id(&self) -> &str {
        match self {
            Self::Gift(gift) => &gift.room_id,
            Self::Chat(chat) => &chat.room_id,
        }
    }

    pub fn received_at(&self) -> i64 {
        match self {
            Self::Gift(gift) => gift.received_at,
            Self::Chat(chat) => chat.received_at,
        }
    }

    pub fn as_gift(&self) -> Option<&GiftEvent> {
        match self {
            Self::Gift(gift) => Some(gift),
            Self::Chat(_) => None,
        }
    }
}

/// Publish payload: a canonical event tagged with the device that captured it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,
    #[serde(flatten)]
    pub event: CanonicalEvent,
}

impl DeviceEvent {
    pub fn new(device_id: impl Into<String>, event: CanonicalEvent) -> Self {
        Self {
            device_id: device_id.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserIdentity;

    fn chat() -> CanonicalEvent {
        CanonicalEvent::Chat(ChatEvent {
            sender: UserIdentity {
                id: "u1".into(),
                name: "viewer".into(),
                ..Default::default()
            },
            message: "hello".into(),
            room_id: "r9".into(),
            received_at: 77,
        })
    }

    #[test]
    fn test_event_accessors() {
        let event = chat();
        assert_eq!(event.room_id(), "r9");
        assert_eq!(event.received_at(), 77);
        assert!(event.as_gift().is_none());
    }

    #[test]
    fn test_device_event_is_flat() {
        let json = serde_json::to_value(DeviceEvent::new("dev-1", chat())).unwrap();
        assert_eq!(json["deviceId"], "dev-1");
        assert_eq!(json["type"], "CHAT");
        assert_eq!(json["message"], "hello");

        let back: DeviceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event, chat());
    }
}
