//! Scoreboard snapshot and authoritative full-state pushes

use serde::{Deserialize, Serialize};

use super::{SessionWindow, Team};

/// The two scoring teams plus the session window
///
/// Owned by the reconciliation engine; everyone else receives clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardState {
    pub room_id: String,
    pub teams: [Team; 2],
    pub session_window: SessionWindow,
    /// Sequence of the last authoritative full-state applied
    pub last_applied_seq: u64,
}

impl Default for ScoreboardState {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            teams: [Team::placeholder(0), Team::placeholder(1)],
            session_window: SessionWindow::default(),
            last_applied_seq: 0,
        }
    }
}

impl ScoreboardState {
    /// Index of the team with the given id
    pub fn team_index(&self, team_id: &str) -> Option<usize> {
        if team_id.is_empty() {
            return None;
        }
        self.teams.iter().position(|t| t.id == team_id)
    }

    /// Index of the team broadcasting from the given platform room
    pub fn team_index_by_room(&self, room_id: &str) -> Option<usize> {
        self.teams.iter().position(|t| t.owns_room(room_id))
    }

    /// Score pair in team order
    pub fn scores(&self) -> (i64, i64) {
        (self.teams[0].score, self.teams[1].score)
    }

    /// Leading team, `None` on a tie
    pub fn leader(&self) -> Option<&Team> {
        let (a, b) = self.scores();
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => Some(&self.teams[0]),
            std::cmp::Ordering::Less => Some(&self.teams[1]),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Authoritative total for one team
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamTotal {
    pub id: String,
    #[serde(alias = "total")]
    pub score: i64,
}

/// Full-state push carrying complete team totals
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FullStateEvent {
    #[serde(alias = "seq")]
    pub last_applied_seq: u64,
    pub teams: Vec<TeamTotal>,
    #[serde(alias = "session")]
    pub session_window: Option<SessionWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_placeholder_pair() {
        let state = ScoreboardState::default();
        assert_eq!(state.teams[0].id, "team-1");
        assert_eq!(state.teams[1].id, "team-2");
        assert_eq!(state.last_applied_seq, 0);
    }

    #[test]
    fn test_leader() {
        let mut state = ScoreboardState::default();
        assert!(state.leader().is_none());
        state.teams[1].score = 5;
        assert_eq!(state.leader().map(|t| t.id.as_str()), Some("team-2"));
    }

    #[test]
    fn test_full_state_aliases() {
        let evt: FullStateEvent = serde_json::from_str(
            r#"{"seq": 9, "teams": [{"id": "a", "total": 40}, {"id": "b", "score": 2}]}"#,
        )
        .unwrap();
        assert_eq!(evt.last_applied_seq, 9);
        assert_eq!(evt.teams[0].score, 40);
        assert!(evt.session_window.is_none());
    }
}
