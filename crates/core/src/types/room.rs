//! Room configuration pushed by the coordination backend

use serde::{Deserialize, Serialize};

use super::GiftInfo;

/// A streamer taking part in the room
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamerIdentity {
    /// Stable id assigned by the backend
    pub id: String,
    /// Platform-specific room id, matched against captured frames
    pub room_id: String,
    pub name: String,
    pub avatar: String,
    /// Name of the gift bound to this streamer
    pub bound_gift: String,
}

/// One side of the scoreboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Team {
    /// Empty when the backend omitted it
    pub id: String,
    pub name: String,
    pub color: String,
    pub avatar: String,
    pub streamers: Vec<StreamerIdentity>,
    pub score: i64,
    pub bound_gift: Option<GiftInfo>,
}

impl Team {
    /// Placeholder shown before any configuration arrives
    pub fn placeholder(index: usize) -> Self {
        Self {
            id: format!("team-{}", index + 1),
            name: format!("Team {}", index + 1),
            ..Default::default()
        }
    }

    /// True if any streamer of this team broadcasts from `room_id`
    pub fn owns_room(&self, room_id: &str) -> bool {
        !room_id.is_empty() && self.streamers.iter().any(|s| s.room_id == room_id)
    }

    /// Find a streamer by stable id
    pub fn streamer(&self, id: &str) -> Option<&StreamerIdentity> {
        self.streamers.iter().find(|s| s.id == id)
    }
}

/// Session lifecycle as reported by the backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Paused,
    #[default]
    Ended,
}

/// Timing window of the current round
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionWindow {
    pub session_id: String,
    /// Start time in milliseconds since the Unix epoch
    pub start_time: i64,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub paused_at: Option<i64>,
}

impl SessionWindow {
    /// End of the window in milliseconds since the Unix epoch
    pub fn deadline(&self) -> i64 {
        self.start_time
            .saturating_add(i64::from(self.duration_minutes).saturating_mul(60_000))
    }
}

/// Complete room configuration; replaced as a whole on every push
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomConfig {
    pub room_id: String,
    pub teams: Vec<Team>,
    #[serde(alias = "session")]
    pub session_window: SessionWindow,
}

impl RoomConfig {
    /// Look up a streamer by platform room id
    pub fn streamer_by_room(&self, room_id: &str) -> Option<&StreamerIdentity> {
        self.teams
            .iter()
            .flat_map(|t| t.streamers.iter())
            .find(|s| !room_id.is_empty() && s.room_id == room_id)
    }

    /// Look up a streamer by stable id
    pub fn streamer_by_id(&self, id: &str) -> Option<&StreamerIdentity> {
        self.teams.iter().find_map(|t| t.streamer(id))
    }
}
