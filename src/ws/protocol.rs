//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::grid::{Coord, Team};
use crate::game::scheduler::MoveId;
use crate::game::snapshot::{GridSnapshot, MoveInfo, RoomSnapshot};

fn anonymous() -> String {
    "Anonymous".to_string()
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join (or create) the room for a game key
    JoinGame {
        game_key: String,
        #[serde(default = "anonymous")]
        player_name: String,
        team: Team,
    },

    /// Send every troop on `from` towards `to`
    Move { from: Coord, to: Coord },

    /// Pause or resume the room
    TogglePause,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current room
    LeaveGame,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { session_id: Uuid, server_time: u64 },

    /// Full room state
    State { snapshot: RoomSnapshot },

    /// Troops left their source cell
    MoveStarted {
        #[serde(rename = "move")]
        info: MoveInfo,
        /// Travel time in milliseconds
        duration: f64,
    },

    /// Troops arrived and the destination was resolved
    MoveEnded { move_id: MoveId, grid: GridSnapshot },

    PauseChanged { paused: bool },

    /// A founding corner fell and its team was absorbed
    TeamEliminated { team: Team, by: Team, cells: usize },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
