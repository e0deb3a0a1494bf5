//! Protocol messages for client-server communication

use serde::{Deserialize, Serialize};

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    RequestGameState,
    Join(JoinRequest),
    Cashout(CashoutRequest),
    Ping {
        timestamp: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub player_id: String,
    pub bet_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    pub player_id: String,
}

impl ClientMessage {
    pub fn join(player_id: &str, bet_amount: f64, auto_cashout: Option<f64>) -> Self {
        Self::Join(JoinRequest {
            player_id: player_id.to_string(),
            bet_amount,
            auto_cashout,
        })
    }

    pub fn cashout(player_id: &str) -> Self {
        Self::Cashout(CashoutRequest {
            player_id: player_id.to_string(),
        })
    }

    pub fn ping() -> Self {
        Self::Ping { timestamp: now_ms() }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    GameState(GameStateSnapshot),
    Countdown(u32),
    Multiplier(f64),
    JoinAccepted(JoinAccepted),
    CashoutAccepted(CashoutAccepted),
    Rejected(Rejection),
    #[serde(rename_all = "camelCase")]
    Pong {
        timestamp: u64,
        server_time: u64,
    },
    Shutdown {
        reason: String,
    },
}

impl ServerMessage {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Waiting,
    Running,
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub game_id: String,
    pub countdown: u32,
    #[serde(default)]
    pub crash_point: Option<f64>,
    pub game_status: RoundPhase,
    pub start_time: i64,
    pub current_multiplier: f64,
    pub game_history: Vec<HistoryItem>,
    #[serde(default)]
    pub players: Vec<PlayerView>,
    #[serde(default)]
    pub total_bet: f64,
    #[serde(default)]
    pub total_won: f64,
}

impl GameStateSnapshot {
    pub fn player(&self, player_id: &str) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.player_id == player_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub multiplier: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub player_id: String,
    pub bet_amount: f64,
    pub cashed_out_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAccepted {
    pub game_id: String,
    pub bet_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutAccepted {
    pub game_id: String,
    pub multiplier: f64,
    pub payout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    Join,
    Cashout,
    Crash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    NotWaiting,
    NotRunning,
    AlreadyJoined,
    NotParticipant,
    AlreadyCashedOut,
    InvalidBet,
    CrashIsServerAuthoritative,
    /// Reason added by a newer server.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub intent: IntentKind,
    pub reason: RejectReason,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
