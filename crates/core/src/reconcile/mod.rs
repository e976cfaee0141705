//! Session reconciliation: scoreboard, round timer, inbound adapter

pub mod adapter;
pub mod engine;
pub mod timer;

pub use adapter::{AdvanceRequest, RoomTopics, RoomUpdate};
pub use engine::{EngineStats, ReconciliationEngine};
pub use timer::{RoundTimer, Tick, TimerDisplay};
