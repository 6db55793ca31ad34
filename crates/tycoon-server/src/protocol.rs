//! WebSocket protocol messages for Tycoon multiplayer.

use serde::{Deserialize, Serialize};
use tycoon_core::{GameError, GameEvent, GameState, GameStatus, UserId};
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Identify the connection; sent by the authenticated edge first
    Hello { user_id: UserId, name: String },

    /// Open a new game with the sender as host
    CreateGame,

    /// Take a seat in a waiting game
    JoinGame { code: String },

    /// Receive snapshots of a game without acting in it
    Subscribe { code: String },

    /// Stop receiving snapshots of a game
    Unsubscribe { code: String },

    /// Request the games the sender is seated in
    ListGames,

    /// Delete a game (host only)
    DeleteGame { code: String },

    /// Submit a game action
    Action {
        code: String,
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Welcome message with the connection id
    Welcome { connection_id: Uuid },

    /// Game created; a GameState follows
    GameCreated { code: String },

    /// Full snapshot of a game
    GameState { code: String, state: serde_json::Value },

    /// Action applied successfully
    ActionResult {
        code: String,
        action: String,
        version: u64,
        events: Vec<GameEvent>,
    },

    /// Action broke a rule; the game is unchanged
    ActionRejected {
        code: String,
        action: String,
        error: GameError,
        message: String,
    },

    /// Games the user is seated in
    GameList { games: Vec<GameSummary> },

    /// The game was deleted
    GameDeleted { code: String },

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}

/// Game information for lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub code: String,
    pub host_id: UserId,
    pub status: GameStatus,
    pub players: Vec<PlayerSummary>,
    pub version: u64,
}

/// Player information in a game list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub user_id: UserId,
    pub name: String,
    pub is_bot: bool,
    pub active: bool,
}

impl From<&GameState> for GameSummary {
    fn from(game: &GameState) -> Self {
        Self {
            code: game.code.clone(),
            host_id: game.host_id.clone(),
            status: game.status,
            players: game
                .players
                .iter()
                .map(|p| PlayerSummary {
                    user_id: p.user_id.clone(),
                    name: p.name.clone(),
                    is_bot: p.is_bot(),
                    active: p.active,
                })
                .collect(),
            version: game.version,
        }
    }
}

impl ServerMessage {
    pub fn snapshot(game: &GameState) -> Self {
        ServerMessage::GameState {
            code: game.code.clone(),
            state: serde_json::to_value(game).unwrap_or_default(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}
