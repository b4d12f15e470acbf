use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::Grid;

/// Maximum number of entries returned by any leaderboard query.
pub const LEADERBOARD_SIZE: usize = 20;

/// Server-assigned identity of one live WebSocket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        room_code: String,
        nickname: String,
    },
    Ready {
        room_code: String,
    },
    /// Scores are whole points. A fractional score does not parse and the
    /// frame is dropped like any other malformed message.
    ScoreUpdate {
        room_code: String,
        nickname: String,
        score: i64,
    },
    Highscore {
        nickname: String,
        score: i64,
    },
    GetLeaderboard,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Room membership in join order.
    Players { players: Vec<PlayerInfo> },
    StartGame { grid: Grid },
    /// Another member's absolute score.
    ScoreUpdate { nickname: String, score: i64 },
    UpdateLeaderboard { entries: Vec<LeaderboardEntry> },
}

/// Public view of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: ConnectionId,
    pub nickname: String,
    pub ready: bool,
}

/// Leaderboard entry, shared by the WebSocket and REST surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub score: i64,
}

/// Body of `POST /highscore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighscoreSubmission {
    pub nickname: String,
    pub score: i64,
}

impl HighscoreSubmission {
    /// Returns the submission with a trimmed nickname, or `None` when the
    /// nickname is blank.
    pub fn validated(self) -> Option<Self> {
        let nickname = self.nickname.trim();
        if nickname.is_empty() {
            return None;
        }
        Some(Self {
            nickname: nickname.to_string(),
            score: self.score,
        })
    }
}

/// A single player's best score returned by REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighscoreResponse {
    pub nickname: String,
    pub highscore: i64,
}
