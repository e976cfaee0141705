//! Room-scoped destinations and inbound message parsing
//!
//! Subscribed destinations (`/topic/room/{room}/...`):
//! - `config`: full [`RoomConfig`]
//! - `scene`: full-state totals with a sequence number
//! - `gift`: canonical gift events published by other capture devices
//! - `activity`: informational, logged only
//!
//! Published destinations (`/app/room/{room}/...`): `gift`, `chat`, `advance`.

use serde::Serialize;
use serde_json::Value;

use super::engine::ReconciliationEngine;
use crate::error::{CoreError, Result};
use crate::transport::InboundMessage;
use crate::types::{CanonicalEvent, DeviceEvent, FullStateEvent, GiftEvent, RoomConfig, ScoreboardState};

/// Destination names for one backend room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTopics {
    room_id: String,
}

impl RoomTopics {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn topic(&self, leaf: &str) -> String {
        format!("/topic/room/{}/{}", self.room_id, leaf)
    }

    fn app(&self, leaf: &str) -> String {
        format!("/app/room/{}/{}", self.room_id, leaf)
    }

    pub fn config(&self) -> String {
        self.topic("config")
    }

    pub fn scene(&self) -> String {
        self.topic("scene")
    }

    pub fn gift(&self) -> String {
        self.topic("gift")
    }

    pub fn activity(&self) -> String {
        self.topic("activity")
    }

    /// Every destination the bridge subscribes to
    pub fn subscriptions(&self) -> [String; 4] {
        [self.config(), self.scene(), self.gift(), self.activity()]
    }

    /// Where a captured event is published
    pub fn publish_destination(&self, event: &CanonicalEvent) -> String {
        match event {
            CanonicalEvent::Gift(_) => self.app("gift"),
            CanonicalEvent::Chat(_) => self.app("chat"),
        }
    }

    pub fn advance(&self) -> String {
        self.app("advance")
    }
}

/// Body of a round-advance request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub device_id: String,
    pub session_id: String,
    pub requested_at: i64,
}

/// Parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum RoomUpdate {
    Config(RoomConfig),
    FullState(FullStateEvent),
    /// Gift captured by another device
    RemoteGift(GiftEvent),
    Activity(Value),
    Ignored(&'static str),
}

impl RoomUpdate {
    /// Parse a message received on one of `topics`
    ///
    /// `device_id` filters out echoes of our own publishes.
    pub fn parse(topics: &RoomTopics, device_id: &str, message: &InboundMessage) -> Result<Self> {
        let destination = message.destination.as_str();

        if destination == topics.config() {
            let body: Value = message.json()?;
            let config = if body.get("config").is_some_and(Value::is_object) {
                body["config"].clone()
            } else {
                body
            };
            return Ok(Self::Config(serde_json::from_value(config)?));
        }

        if destination == topics.scene() {
            let body: Value = message.json()?;
            let has_seq = ["seq", "lastAppliedSeq"]
                .iter()
                .any(|k| body.get(*k).is_some_and(Value::is_u64));
            let has_teams = body.get("teams").is_some_and(Value::is_array);
            if !has_seq || !has_teams {
                return Ok(Self::Ignored("scene update without totals"));
            }
            return Ok(Self::FullState(serde_json::from_value(body)?));
        }

        if destination == topics.gift() {
            let event: DeviceEvent = message.json()?;
            if event.device_id == device_id {
                return Ok(Self::Ignored("own gift echo"));
            }
            return match event.event {
                CanonicalEvent::Gift(gift) => Ok(Self::RemoteGift(gift)),
                CanonicalEvent::Chat(_) => Ok(Self::Ignored("chat on gift topic")),
            };
        }

        if destination == topics.activity() {
            return Ok(Self::Activity(message.json()?));
        }

        Err(CoreError::Protocol(format!(
            "Unexpected destination: {}",
            destination
        )))
    }

    /// Feed the update to the engine
    ///
    /// Returns the new scoreboard when it changed. Anomalies are logged by
    /// the engine and swallowed here.
    pub fn apply(self, engine: &ReconciliationEngine) -> Option<ScoreboardState> {
        match self {
            Self::Config(config) => Some(engine.on_config(config)),
            Self::FullState(event) => engine.on_full_state(&event).ok(),
            Self::RemoteGift(gift) => engine.on_gift(&gift).ok(),
            Self::Activity(body) => {
                tracing::info!(%body, "Room activity");
                None
            }
            Self::Ignored(reason) => {
                tracing::trace!(reason, "Inbound message ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatEvent, GiftInfo, UserIdentity};

    fn message(destination: String, body: Value) -> InboundMessage {
        InboundMessage {
            destination,
            subscription: "sub-1".into(),
            message_id: None,
            body: body.to_string(),
        }
    }

    fn remote_gift(device: &str) -> Value {
        let gift = GiftEvent {
            sender: UserIdentity::default(),
            receiver: UserIdentity::default(),
            gift: GiftInfo::default(),
            count: 2,
            value: 0,
            room_id: "7001".into(),
            received_at: 5,
            team_id: None,
        };
        serde_json::to_value(DeviceEvent::new(device, CanonicalEvent::Gift(gift))).unwrap()
    }

    #[test]
    fn test_destinations() {
        let topics = RoomTopics::new("arena");
        assert_eq!(topics.config(), "/topic/room/arena/config");
        assert_eq!(topics.advance(), "/app/room/arena/advance");
        let chat = CanonicalEvent::Chat(ChatEvent {
            sender: UserIdentity::default(),
            message: String::new(),
            room_id: String::new(),
            received_at: 0,
        });
        assert_eq!(topics.publish_destination(&chat), "/app/room/arena/chat");
    }

    #[test]
    fn test_parse_config_wrapped_and_bare() {
        let topics = RoomTopics::new("arena");
        let bare = serde_json::json!({"roomId": "arena", "teams": [{"id": "red"}, {"id": "blue"}]});
        let wrapped = serde_json::json!({"config": bare.clone()});

        for body in [bare, wrapped] {
            let update = RoomUpdate::parse(&topics, "me", &message(topics.config(), body)).unwrap();
            let RoomUpdate::Config(config) = update else {
                panic!("expected config");
            };
            assert_eq!(config.teams.len(), 2);
        }
    }

    #[test]
    fn test_parse_scene_full_state() {
        let topics = RoomTopics::new("arena");
        let body = serde_json::json!({"seq": 3, "teams": [{"id": "red", "total": 9}, {"id": "blue", "total": 1}]});
        let update = RoomUpdate::parse(&topics, "me", &message(topics.scene(), body)).unwrap();
        let RoomUpdate::FullState(event) = update else {
            panic!("expected full-state");
        };
        assert_eq!(event.last_applied_seq, 3);
        assert_eq!(event.teams[0].score, 9);
    }

    #[test]
    fn test_scene_without_seq_is_ignored() {
        let topics = RoomTopics::new("arena");
        let body = serde_json::json!({"scene": "intro"});
        let update = RoomUpdate::parse(&topics, "me", &message(topics.scene(), body)).unwrap();
        assert!(matches!(update, RoomUpdate::Ignored(_)));
    }

    #[test]
    fn test_own_gift_echo_is_ignored() {
        let topics = RoomTopics::new("arena");
        let update =
            RoomUpdate::parse(&topics, "me", &message(topics.gift(), remote_gift("me"))).unwrap();
        assert!(matches!(update, RoomUpdate::Ignored(_)));

        let update =
            RoomUpdate::parse(&topics, "me", &message(topics.gift(), remote_gift("other"))).unwrap();
        assert!(matches!(update, RoomUpdate::RemoteGift(ref g) if g.count == 2));
    }

    #[test]
    fn test_unknown_destination() {
        let topics = RoomTopics::new("arena");
        let result = RoomUpdate::parse(
            &topics,
            "me",
            &message("/topic/other".into(), serde_json::json!({})),
        );
        assert!(matches!(result, Err(CoreError::Protocol(_))));
    }

    #[test]
    fn test_apply_config_then_full_state() {
        let topics = RoomTopics::new("arena");
        let engine = ReconciliationEngine::default();

        let config = serde_json::json!({"roomId": "arena", "teams": [{"id": "red"}, {"id": "blue"}]});
        RoomUpdate::parse(&topics, "me", &message(topics.config(), config))
            .unwrap()
            .apply(&engine)
            .unwrap();

        let scene = serde_json::json!({"seq": 1, "teams": [{"id": "blue", "total": 4}, {"id": "red", "total": 6}]});
        let state = RoomUpdate::parse(&topics, "me", &message(topics.scene(), scene))
            .unwrap()
            .apply(&engine)
            .unwrap();
        assert_eq!(state.scores(), (6, 4));
    }
}
