//! Domain types for gifts, chat, rooms and the scoreboard

mod chat;
mod event;
mod frame;
mod gift;
mod room;
mod scoreboard;

pub use chat::ChatEvent;
pub use event::{CanonicalEvent, DeviceEvent};
pub use frame::RawFrame;
pub use gift::{GiftEvent, GiftInfo, UserIdentity};
pub use room::{RoomConfig, SessionStatus, SessionWindow, StreamerIdentity, Team};
pub use scoreboard::{FullStateEvent, ScoreboardState, TeamTotal};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
