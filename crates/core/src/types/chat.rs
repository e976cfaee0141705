//! Chat events

use serde::{Deserialize, Serialize};

use super::UserIdentity;

/// A viewer chat line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub sender: UserIdentity,
    pub message: String,
    pub room_id: String,
    pub received_at: i64,
}
