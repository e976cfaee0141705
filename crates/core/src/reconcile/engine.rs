//! Scoreboard reconciliation
//!
//! Three inputs are merged into one [`ScoreboardState`]:
//! - room configuration (structure, scores carried over)
//! - gift events (optimistic, additive)
//! - full-state pushes (authoritative, ordered by sequence number)
//!
//! All mutations go through one mutex; readers get clones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::timer::{RoundTimer, Tick};
use crate::config::ReconcileConfig;
use crate::error::ReconciliationAnomaly;
use crate::types::{FullStateEvent, GiftEvent, RoomConfig, ScoreboardState, Team, TeamTotal};

/// Engine counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub configs: u64,
    pub gifts_applied: u64,
    pub full_states_applied: u64,
    pub unresolved_gifts: u64,
    pub stale_full_states: u64,
    pub mismatched_full_states: u64,
}

#[derive(Debug, Default)]
struct Counters {
    configs: AtomicU64,
    gifts_applied: AtomicU64,
    full_states_applied: AtomicU64,
    unresolved_gifts: AtomicU64,
    stale_full_states: AtomicU64,
    mismatched_full_states: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    state: ScoreboardState,
    config: Option<RoomConfig>,
}

/// Owner of the canonical scoreboard
#[derive(Debug)]
pub struct ReconciliationEngine {
    inner: Mutex<Inner>,
    timer: RoundTimer,
    counters: Counters,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(&ReconcileConfig::default())
    }
}

impl ReconciliationEngine {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            timer: RoundTimer::new(config),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is plain data; a panicked writer cannot leave it half-built
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current scoreboard
    pub fn snapshot(&self) -> ScoreboardState {
        self.lock().state.clone()
    }

    /// Active room configuration, if any has arrived
    pub fn config(&self) -> Option<RoomConfig> {
        self.lock().config.clone()
    }

    pub fn last_applied_seq(&self) -> u64 {
        self.lock().state.last_applied_seq
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            configs: c.configs.load(Ordering::Relaxed),
            gifts_applied: c.gifts_applied.load(Ordering::Relaxed),
            full_states_applied: c.full_states_applied.load(Ordering::Relaxed),
            unresolved_gifts: c.unresolved_gifts.load(Ordering::Relaxed),
            stale_full_states: c.stale_full_states.load(Ordering::Relaxed),
            mismatched_full_states: c.mismatched_full_states.load(Ordering::Relaxed),
        }
    }

    /// Replace team structure and session window
    ///
    /// Scores follow their team id. A team whose id is new inherits the
    /// score at its position only when no incoming team claimed that slot
    /// by id; otherwise it starts at zero. Missing teams are filled with
    /// placeholders.
    pub fn on_config(&self, config: RoomConfig) -> ScoreboardState {
        let mut inner = self.lock();
        let previous = &inner.state.teams;

        let incoming: [Team; 2] = std::array::from_fn(|i| {
            config
                .teams
                .get(i)
                .cloned()
                .unwrap_or_else(|| Team::placeholder(i))
        });
        let claimed: [Option<usize>; 2] = std::array::from_fn(|i| {
            let id = &incoming[i].id;
            previous.iter().position(|p| !id.is_empty() && &p.id == id)
        });
        let duplicate = !incoming[0].id.is_empty() && incoming[0].id == incoming[1].id;

        let teams: [Team; 2] = std::array::from_fn(|i| {
            let mut team = incoming[i].clone();
            team.score = match claimed[i] {
                // A repeated id carries its score once
                _ if duplicate && i == 1 => 0,
                Some(slot) => previous[slot].score,
                None if !claimed.contains(&Some(i)) => previous[i].score,
                None => 0,
            };
            team
        });

        inner.state.room_id = config.room_id.clone();
        inner.state.teams = teams;
        inner.state.session_window = config.session_window.clone();
        if config.teams.len() > 2 {
            tracing::debug!(
                teams = config.teams.len(),
                "Only the first two teams take part in scoring"
            );
        }
        tracing::info!(
            room = %config.room_id,
            session = %config.session_window.session_id,
            status = ?config.session_window.status,
            "Room configuration applied"
        );
        inner.config = Some(config);
        self.counters.configs.fetch_add(1, Ordering::Relaxed);
        inner.state.clone()
    }

    /// Optimistically add a gift to its team
    ///
    /// The team is found by explicit team id, then by the streamer whose
    /// platform room matches the event's room.
    pub fn on_gift(&self, gift: &GiftEvent) -> Result<ScoreboardState, ReconciliationAnomaly> {
        let mut inner = self.lock();
        let index = gift
            .team_id
            .as_deref()
            .and_then(|id| inner.state.team_index(id))
            .or_else(|| inner.state.team_index_by_room(&gift.room_id));

        let Some(index) = index else {
            self.counters.unresolved_gifts.fetch_add(1, Ordering::Relaxed);
            let anomaly = ReconciliationAnomaly::UnresolvedTeam {
                room_id: gift.room_id.clone(),
            };
            tracing::warn!(gift = %gift.gift.name, "Dropping gift: {}", anomaly);
            return Err(anomaly);
        };

        let points = gift.points();
        let team = &mut inner.state.teams[index];
        team.score = team.score.saturating_add(points);
        tracing::debug!(team = %team.id, points, score = team.score, "Gift applied");

        self.counters.gifts_applied.fetch_add(1, Ordering::Relaxed);
        Ok(inner.state.clone())
    }

    /// Apply an authoritative full-state push
    ///
    /// Ignored unless its sequence is newer than the last one applied.
    pub fn on_full_state(
        &self,
        event: &FullStateEvent,
    ) -> Result<ScoreboardState, ReconciliationAnomaly> {
        let mut inner = self.lock();
        let current = inner.state.last_applied_seq;
        if event.last_applied_seq <= current {
            self.counters.stale_full_states.fetch_add(1, Ordering::Relaxed);
            let anomaly = ReconciliationAnomaly::StaleFullState {
                seq: event.last_applied_seq,
                current,
            };
            tracing::debug!("Ignoring full-state: {}", anomaly);
            return Err(anomaly);
        }

        let Some(totals) = match_totals(&inner.state.teams, &event.teams) else {
            self.counters
                .mismatched_full_states
                .fetch_add(1, Ordering::Relaxed);
            let anomaly = ReconciliationAnomaly::MismatchedTeams;
            tracing::warn!(seq = event.last_applied_seq, "Dropping full-state: {}", anomaly);
            return Err(anomaly);
        };

        for (team, total) in inner.state.teams.iter_mut().zip(totals) {
            team.score = total;
        }
        inner.state.last_applied_seq = event.last_applied_seq;
        if let Some(window) = &event.session_window {
            inner.state.session_window = window.clone();
        }

        tracing::debug!(
            seq = event.last_applied_seq,
            scores = ?inner.state.scores(),
            "Full-state applied"
        );
        self.counters
            .full_states_applied
            .fetch_add(1, Ordering::Relaxed);
        Ok(inner.state.clone())
    }

    /// Re-evaluate the round timer
    pub fn tick(&self, now_ms: i64) -> Tick {
        let window = self.lock().state.session_window.clone();
        self.timer.tick(&window, now_ms)
    }

    /// Let the next tick fire the round advance again
    pub fn release_advance(&self) {
        self.timer.release();
    }
}

/// Pair full-state totals with the current teams
///
/// Both teams matched by id wins. Otherwise, if no total names a known
/// team, the first two totals are taken in order. A half match is rejected.
fn match_totals(teams: &[Team; 2], totals: &[TeamTotal]) -> Option<[i64; 2]> {
    if totals.len() < 2 {
        return None;
    }

    let by_id = |team: &Team| {
        totals
            .iter()
            .find(|t| !t.id.is_empty() && t.id == team.id)
            .map(|t| t.score)
    };
    match (by_id(&teams[0]), by_id(&teams[1])) {
        (Some(a), Some(b)) => Some([a, b]),
        (None, None) => Some([totals[0].score, totals[1].score]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GiftInfo, SessionStatus, SessionWindow, StreamerIdentity, UserIdentity};

    fn team(id: &str, room: &str) -> Team {
        Team {
            id: id.into(),
            name: id.to_uppercase(),
            streamers: vec![StreamerIdentity {
                id: format!("s-{}", id),
                room_id: room.into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn config(a: &str, b: &str) -> RoomConfig {
        RoomConfig {
            room_id: "arena".into(),
            teams: vec![team(a, "7001"), team(b, "7002")],
            session_window: SessionWindow {
                session_id: "round-1".into(),
                start_time: 0,
                duration_minutes: 5,
                status: SessionStatus::Active,
                paused_at: None,
            },
        }
    }

    fn gift(room: &str, count: u32, value: u64) -> GiftEvent {
        GiftEvent {
            sender: UserIdentity::default(),
            receiver: UserIdentity::default(),
            gift: GiftInfo {
                id: "5655".into(),
                name: "Rose".into(),
                image: String::new(),
            },
            count,
            value,
            room_id: room.into(),
            received_at: 0,
            team_id: None,
        }
    }

    fn full_state(seq: u64, totals: &[(&str, i64)]) -> FullStateEvent {
        FullStateEvent {
            last_applied_seq: seq,
            teams: totals
                .iter()
                .map(|(id, score)| TeamTotal {
                    id: id.to_string(),
                    score: *score,
                })
                .collect(),
            session_window: None,
        }
    }

    #[test]
    fn test_starts_with_placeholders() {
        let engine = ReconciliationEngine::default();
        let state = engine.snapshot();
        assert_eq!(state.teams[0].id, "team-1");
        assert_eq!(state.teams[1].id, "team-2");
        assert!(engine.config().is_none());
    }

    #[test]
    fn test_config_keeps_score_for_same_id() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 10, 10)).unwrap();
        assert_eq!(engine.snapshot().teams[0].score, 100);

        let mut renamed = config("red", "blue");
        renamed.teams[0].name = "Crimson".into();
        let state = engine.on_config(renamed);
        assert_eq!(state.teams[0].score, 100);
        assert_eq!(state.teams[0].name, "Crimson");
    }

    #[test]
    fn test_config_follows_id_across_positions() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7002", 7, 0)).unwrap();

        let state = engine.on_config(config("blue", "red"));
        assert_eq!(state.teams[0].id, "blue");
        assert_eq!(state.teams[0].score, 7);
        assert_eq!(state.teams[1].score, 0);
    }

    #[test]
    fn test_config_falls_back_to_position() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 3, 0)).unwrap();

        let state = engine.on_config(config("green", "yellow"));
        assert_eq!(state.teams[0].id, "green");
        assert_eq!(state.teams[0].score, 3);
    }

    #[test]
    fn test_config_partial_overlap_keeps_total() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 3, 0)).unwrap();
        engine.on_gift(&gift("7002", 7, 0)).unwrap();

        // blue moves to the first slot, green takes the slot blue left
        let state = engine.on_config(config("blue", "green"));
        assert_eq!(state.teams[0].id, "blue");
        assert_eq!(state.teams[0].score, 7);
        assert_eq!(state.teams[1].id, "green");
        assert_eq!(state.teams[1].score, 0);
    }

    #[test]
    fn test_config_new_id_inherits_free_slot() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 3, 0)).unwrap();
        engine.on_gift(&gift("7002", 7, 0)).unwrap();

        let state = engine.on_config(config("red", "green"));
        assert_eq!(state.scores(), (3, 7));
    }

    #[test]
    fn test_config_duplicate_id_counts_once() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 3, 0)).unwrap();
        engine.on_gift(&gift("7002", 7, 0)).unwrap();

        let state = engine.on_config(config("red", "red"));
        assert_eq!(state.scores(), (3, 0));
    }

    #[test]
    fn test_config_with_one_team_keeps_pair() {
        let engine = ReconciliationEngine::default();
        let mut cfg = config("red", "blue");
        cfg.teams.truncate(1);
        let state = engine.on_config(cfg);
        assert_eq!(state.teams[0].id, "red");
        assert_eq!(state.teams[1].id, "team-2");
    }

    #[test]
    fn test_gift_by_explicit_team() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        let state = engine
            .on_gift(&gift("unknown-room", 2, 5).with_team("blue"))
            .unwrap();
        assert_eq!(state.scores(), (0, 10));
    }

    #[test]
    fn test_unresolved_gift_is_dropped() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        let err = engine.on_gift(&gift("9999", 1, 1)).unwrap_err();
        assert_eq!(
            err,
            ReconciliationAnomaly::UnresolvedTeam {
                room_id: "9999".into()
            }
        );
        assert_eq!(engine.snapshot().scores(), (0, 0));
        assert_eq!(engine.stats().unresolved_gifts, 1);
    }

    #[test]
    fn test_full_state_replaces_exactly() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine.on_gift(&gift("7001", 1, 50)).unwrap();

        let state = engine
            .on_full_state(&full_state(4, &[("blue", 12), ("red", 40)]))
            .unwrap();
        assert_eq!(state.scores(), (40, 12));
        assert_eq!(state.last_applied_seq, 4);
    }

    #[test]
    fn test_stale_full_state_is_noop() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        engine
            .on_full_state(&full_state(5, &[("red", 1), ("blue", 2)]))
            .unwrap();

        for seq in [5, 3] {
            let err = engine
                .on_full_state(&full_state(seq, &[("red", 99), ("blue", 99)]))
                .unwrap_err();
            assert!(matches!(err, ReconciliationAnomaly::StaleFullState { current: 5, .. }));
        }
        let state = engine.snapshot();
        assert_eq!(state.scores(), (1, 2));
        assert_eq!(state.last_applied_seq, 5);
        assert_eq!(engine.stats().stale_full_states, 2);
    }

    #[test]
    fn test_full_state_positional_when_ids_unknown() {
        let engine = ReconciliationEngine::default();
        let state = engine
            .on_full_state(&full_state(1, &[("x", 8), ("y", 9)]))
            .unwrap();
        assert_eq!(state.scores(), (8, 9));
    }

    #[test]
    fn test_full_state_half_match_rejected() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        let err = engine
            .on_full_state(&full_state(2, &[("red", 8), ("green", 9)]))
            .unwrap_err();
        assert_eq!(err, ReconciliationAnomaly::MismatchedTeams);
        assert_eq!(engine.last_applied_seq(), 0);
    }

    #[test]
    fn test_full_state_needs_two_totals() {
        let engine = ReconciliationEngine::default();
        assert!(engine.on_full_state(&full_state(1, &[("a", 1)])).is_err());
    }

    #[test]
    fn test_full_state_replaces_session_window() {
        let engine = ReconciliationEngine::default();
        engine.on_config(config("red", "blue"));
        let mut evt = full_state(1, &[("red", 0), ("blue", 0)]);
        evt.session_window = Some(SessionWindow {
            status: SessionStatus::Paused,
            ..Default::default()
        });
        let state = engine.on_full_state(&evt).unwrap();
        assert_eq!(state.session_window.status, SessionStatus::Paused);
    }
}
