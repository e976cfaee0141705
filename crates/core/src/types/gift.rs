//! Gift events decoded from the platform wire format

use serde::{Deserialize, Serialize};

/// Sender or receiver identity on the platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub level: u32,
}

/// Gift catalogue entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GiftInfo {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// A viewer sent one or more gifts to a streamer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub sender: UserIdentity,
    pub receiver: UserIdentity,
    pub gift: GiftInfo,
    /// Number of gifts in this event (at least 1)
    pub count: u32,
    /// Point value per gift, 0 when the wire shape does not carry one
    pub value: u64,
    /// Platform room the frame was captured from
    pub room_id: String,
    pub received_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl GiftEvent {
    /// Score contribution of this event
    ///
    /// `value × count` when a value is known, otherwise one point per gift.
    pub fn points(&self) -> i64 {
        let count = i64::from(self.count.max(1));
        if self.value == 0 {
            count
        } else {
            i64::try_from(self.value)
                .unwrap_or(i64::MAX)
                .saturating_mul(count)
        }
    }

    /// Same event, attributed to a team
    pub fn with_team(self, team_id: impl Into<String>) -> Self {
        Self {
            team_id: Some(team_id.into()),
            ..self
        }
    }

    /// Same event, re-homed to the room it was captured from
    pub fn with_room(self, room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..self
        }
    }
}
