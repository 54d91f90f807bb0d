//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::Direction;
use crate::game::room::{GameMode, MemberInfo, Seats};
use crate::game::state::{Score, Side, SimulationState};

/// Answer to a rematch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RematchAnswer {
    Accept,
    Decline,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter a room (password gating happens before this reaches the server)
    JoinRoom { room_id: Uuid },

    /// Move the sender's paddle, either to a pointer position or by one step
    PaddleMove {
        room_id: Uuid,
        #[serde(default)]
        y: Option<f32>,
        #[serde(default)]
        direction: Option<Direction>,
    },

    StartGame { room_id: Uuid },

    RematchRequest { room_id: Uuid },

    RematchResponse {
        room_id: Uuid,
        response: RematchAnswer,
    },

    DissolveRoom { room_id: Uuid },

    LeaveRoom { room_id: Uuid },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Sent to a participant right after joining
    Init {
        room_id: Uuid,
        game_state: SimulationState,
        phase: &'static str,
        running: bool,
        winner: Option<Side>,
        /// Seat assigned to the joiner
        you: Option<Side>,
        players: Seats,
        mode: GameMode,
        win_points: u32,
        room_creator: Uuid,
        is_creator: bool,
    },

    PlayersUpdate {
        room_id: Uuid,
        players: Seats,
        members: Vec<MemberInfo>,
        room_creator: Uuid,
    },

    PaddleUpdate { paddle: Side, y: f32 },

    GameStarted { game_state: SimulationState },

    /// Throttled full snapshot while a match runs
    Update { game_state: SimulationState },

    Score {
        game_state: SimulationState,
        scoring_side: Side,
    },

    GameOver {
        winner: Side,
        game_state: SimulationState,
        score: Score,
        win_points: u32,
    },

    /// Match stopped without a winner (player left or simulation fault)
    GameHalted { reason: String },

    RematchRequested {
        requested_by: Uuid,
        creator_vote: Option<Side>,
    },

    RematchStatus {
        votes: Vec<Side>,
        responders: Vec<Uuid>,
    },

    RematchDeclined { declined_by: Uuid },

    /// Fresh state after an agreed rematch
    Reset { game_state: SimulationState },

    UserLeft {
        user_id: Uuid,
        players: Seats,
        members: Vec<MemberInfo>,
    },

    /// Lobby: a room became available
    RoomCreated { room: RoomSummary },

    /// Lobby: member count changed
    RoomUpdated { room_id: Uuid, players: usize },

    /// Lobby and room: the room is gone
    RoomDissolved { room_id: Uuid },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Directory entry for a live room
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_id: Uuid,
    pub mode: GameMode,
    pub win_points: u32,
    pub players: usize,
    pub seats: Seats,
    pub phase: &'static str,
    pub room_creator: Uuid,
}
