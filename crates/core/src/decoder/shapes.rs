//! Known wire shapes, tried in priority order
//!
//! Each classifier is a pure function over the parsed frame; the first one
//! that returns `Some` wins. Shape B is tried last because its fields are a
//! subset of what the other shapes may also carry.

use crate::error::DecodeFailure;
use crate::types::{CanonicalEvent, ChatEvent, GiftEvent, GiftInfo, UserIdentity};

use super::fields::{self, Object};

/// Result of decoding one raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Top-level `type: "GIFT"` with nested sender/receiver/gift objects
    GiftShapeA(GiftEvent),
    /// `payload.vgift_typeid` with flat alternate field names
    GiftShapeB(GiftEvent),
    Chat(ChatEvent),
    Unrecognized(DecodeFailure),
}

impl DecodedFrame {
    pub fn into_event(self) -> Option<CanonicalEvent> {
        match self {
            Self::GiftShapeA(gift) | Self::GiftShapeB(gift) => Some(CanonicalEvent::Gift(gift)),
            Self::Chat(chat) => Some(CanonicalEvent::Chat(chat)),
            Self::Unrecognized(_) => None,
        }
    }

    pub fn failure(&self) -> Option<DecodeFailure> {
        match self {
            Self::Unrecognized(failure) => Some(*failure),
            _ => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.failure().is_none()
    }
}

/// Parsed frame plus the context a classifier may need
pub(crate) struct ShapeInput<'a> {
    pub root: &'a Object,
    pub default_room: &'a str,
    pub received_at: i64,
}

type Classifier = fn(&ShapeInput<'_>) -> Option<DecodedFrame>;

/// Classification order matters; see module docs
pub(crate) const CLASSIFIERS: [Classifier; 3] = [gift_shape_a, chat, gift_shape_b];

const ROOM_KEYS: &[&str] = &["roomId", "room_id", "roomid"];

fn room_of(obj: &Object, fallback: &str) -> String {
    let room = fields::text(obj, ROOM_KEYS);
    if room.is_empty() {
        fallback.to_string()
    } else {
        room
    }
}

fn level(obj: &Object, keys: &[&str]) -> u32 {
    fields::uint(obj, keys)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn user(obj: &Object) -> UserIdentity {
    UserIdentity {
        id: fields::text(obj, &["id", "userId", "uid"]),
        name: fields::text(obj, &["name", "nickname", "nickName"]),
        avatar: fields::text(obj, &["avatar", "avatarUrl", "headUrl"]),
        level: level(obj, &["level", "grade"]),
    }
}

fn has_type(root: &Object, marker: &str) -> bool {
    root.get("type").and_then(|v| v.as_str()) == Some(marker)
}

fn gift_shape_a(input: &ShapeInput<'_>) -> Option<DecodedFrame> {
    let root = input.root;
    if !has_type(root, "GIFT") {
        return None;
    }
    let sender = fields::object(root, &["sender"])?;
    let receiver = fields::object(root, &["receiver"])?;
    let gift = fields::object(root, &["gift"])?;
    let gift_id = fields::required_text(gift, &["id", "giftId"])?;

    let value = fields::uint(gift, &["value", "price", "diamondCount"])
        .or_else(|| fields::uint(root, &["value"]))
        .unwrap_or(0);

    Some(DecodedFrame::GiftShapeA(GiftEvent {
        sender: user(sender),
        receiver: user(receiver),
        gift: GiftInfo {
            id: gift_id,
            name: fields::text(gift, &["name", "giftName"]),
            image: fields::text(gift, &["image", "icon", "imageUrl"]),
        },
        count: fields::count(gift, &["count", "repeatCount"]),
        value,
        room_id: room_of(root, input.default_room),
        received_at: input.received_at,
        team_id: none_if_empty(fields::text(root, &["teamId"])),
    }))
}

fn chat(input: &ShapeInput<'_>) -> Option<DecodedFrame> {
    let root = input.root;
    if !has_type(root, "CHAT") {
        return None;
    }
    let sender = fields::object(root, &["sender"])?;
    let message = root.get("message")?.as_str()?.to_string();

    Some(DecodedFrame::Chat(ChatEvent {
        sender: user(sender),
        message,
        room_id: room_of(root, input.default_room),
        received_at: input.received_at,
    }))
}

fn gift_shape_b(input: &ShapeInput<'_>) -> Option<DecodedFrame> {
    let payload = fields::embedded_object(input.root, "payload")?;
    let gift_id = fields::required_text(&payload, &["vgift_typeid"])?;

    let sender = UserIdentity {
        id: fields::text(&payload, &["sender_uid", "uid", "userid"]),
        name: fields::text(&payload, &["sender_nick", "nickname", "nick"]),
        avatar: fields::text(&payload, &["sender_avatar", "avatar", "head_img"]),
        level: level(&payload, &["sender_level", "level"]),
    };
    let receiver = UserIdentity {
        id: fields::text(&payload, &["anchor_uid", "receiver_uid"]),
        name: fields::text(&payload, &["anchor_nick", "receiver_nick"]),
        avatar: fields::text(&payload, &["anchor_avatar", "receiver_avatar"]),
        level: 0,
    };
    let room_id = room_of(&payload, &room_of(input.root, input.default_room));

    Some(DecodedFrame::GiftShapeB(GiftEvent {
        sender,
        receiver,
        gift: GiftInfo {
            id: gift_id,
            name: fields::text(&payload, &["vgift_name", "giftname"]),
            image: fields::text(&payload, &["vgift_pic", "vgift_img", "giftpic"]),
        },
        count: fields::count(&payload, &["vgift_count"]),
        value: 0,
        room_id,
        received_at: input.received_at,
        team_id: None,
    }))
}

fn none_if_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}
