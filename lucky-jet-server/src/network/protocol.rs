//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON envelope `{ "type": <string>, "data": <payload> }`.

use serde::{Serialize, Deserialize};

use crate::game::engine::RoundEngine;
use crate::game::round::{PlayerId, RejectReason, RoundId, RoundPhase, CashoutReceipt};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask for a full `gameState` snapshot (reconnect / resync).
    RequestGameState,

    /// Join the round currently counting down.
    Join(JoinRequest),

    /// Cash out of the running round.
    Cashout(CashoutRequest),

    /// Legacy client-side crash signal. Always rejected.
    Crash(serde_json::Value),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp (ms), echoed back.
        timestamp: u64,
    },
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Stake.
    pub bet_amount: f64,
    /// Optional automatic cashout multiplier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<f64>,
}

/// Cashout request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    /// Player identifier.
    pub player_id: PlayerId,
}

/// Which intent a rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    /// `join`
    Join,
    /// `cashout`
    Cashout,
    /// `crash`
    Crash,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full snapshot, sufficient to resynchronize from nothing.
    GameState(GameStateSnapshot),

    /// Seconds left in the countdown.
    Countdown(u32),

    /// Current multiplier.
    Multiplier(f64),

    /// Join accepted (sender only).
    JoinAccepted(JoinAccepted),

    /// Cashout accepted, manual or automatic (sender only).
    CashoutAccepted(CashoutAccepted),

    /// Intent refused (sender only).
    Rejected(Rejection),

    /// Pong response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Full round snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    /// Round identifier.
    pub game_id: RoundId,
    /// Seconds left in the countdown.
    pub countdown: u32,
    /// Crash point, present only once the round has crashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
    /// Round phase.
    pub game_status: RoundPhase,
    /// Round start (Unix ms).
    pub start_time: i64,
    /// Current multiplier.
    pub current_multiplier: f64,
    /// Finished rounds, newest first.
    pub game_history: Vec<HistoryItem>,
    /// Participants of this round.
    #[serde(default)]
    pub players: Vec<PlayerView>,
    /// Sum of accepted bets.
    #[serde(default)]
    pub total_bet: f64,
    /// Sum of payouts so far.
    #[serde(default)]
    pub total_won: f64,
}

impl GameStateSnapshot {
    /// Project the engine's current state.
    pub fn from_engine(engine: &RoundEngine) -> Self {
        let round = engine.round();
        Self {
            game_id: round.id(),
            countdown: round.countdown_remaining(),
            crash_point: round.revealed_crash_point(),
            game_status: round.phase(),
            start_time: round.start_time_ms(),
            current_multiplier: round.multiplier(),
            game_history: engine.history().iter()
                .map(|e| HistoryItem { multiplier: e.crash_point, timestamp: e.ended_at })
                .collect(),
            players: round.participants()
                .map(|p| PlayerView {
                    player_id: p.player_id.clone(),
                    bet_amount: p.bet_amount,
                    cashed_out_at: p.cashed_out_at(),
                })
                .collect(),
            total_bet: round.total_bet(),
            total_won: round.total_won(),
        }
    }
}

/// History item as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Crash point of the finished round.
    pub multiplier: f64,
    /// Crash time (Unix ms).
    pub timestamp: i64,
}

/// Participant as seen by every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Stake.
    pub bet_amount: f64,
    /// Multiplier locked in, or `null`.
    pub cashed_out_at: Option<f64>,
}

/// Join acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAccepted {
    /// Round joined.
    pub game_id: RoundId,
    /// Accepted stake.
    pub bet_amount: f64,
}

/// Cashout acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutAccepted {
    /// Round cashed out of.
    pub game_id: RoundId,
    /// Locked multiplier.
    pub multiplier: f64,
    /// `bet * multiplier`.
    pub payout: f64,
}

impl From<&CashoutReceipt> for CashoutAccepted {
    fn from(receipt: &CashoutReceipt) -> Self {
        Self {
            game_id: receipt.round_id,
            multiplier: receipt.multiplier,
            payout: receipt.payout,
        }
    }
}

/// Intent rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Refused intent.
    pub intent: IntentKind,
    /// Why.
    pub reason: RejectReason,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundConfig;
    use crate::game::round::Round;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    #[test]
    fn test_request_game_state_without_payload() {
        let msg = ClientMessage::from_json(r#"{"type":"requestGameState"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::RequestGameState));
    }

    #[test]
    fn test_join_wire_format() {
        let msg = ClientMessage::from_json(
            r#"{"type":"join","data":{"playerId":"abc","betAmount":100,"autoCashout":2.5}}"#,
        ).unwrap();

        match msg {
            ClientMessage::Join(join) => {
                assert_eq!(join.player_id, PlayerId::new("abc"));
                assert_eq!(join.bet_amount, 100.0);
                assert_eq!(join.auto_cashout, Some(2.5));
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_legacy_crash_message_parses() {
        let msg = ClientMessage::from_json(r#"{"type":"crash","data":{"crashPoint":1.7}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Crash(_)));
    }

    #[test]
    fn test_malformed_message_is_error() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"teleport","data":1}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"join","data":{"betAmount":5}}"#).is_err());
    }

    #[test]
    fn test_incremental_messages() {
        let countdown = serde_json::to_value(ServerMessage::Countdown(7)).unwrap();
        assert_eq!(countdown, json!({"type": "countdown", "data": 7}));

        let multiplier = serde_json::to_value(ServerMessage::Multiplier(1.25)).unwrap();
        assert_eq!(multiplier, json!({"type": "multiplier", "data": 1.25}));
    }

    #[test]
    fn test_snapshot_hides_crash_point_until_crash() {
        let config = RoundConfig { countdown_secs: 1, ..RoundConfig::default() };
        let round = Round::new(4.2, 1, 0);
        let mut engine = RoundEngine::from_parts(config, round, StdRng::seed_from_u64(1));

        let waiting = serde_json::to_value(ServerMessage::GameState(GameStateSnapshot::from_engine(&engine))).unwrap();
        assert_eq!(waiting["type"], "gameState");
        assert_eq!(waiting["data"]["gameStatus"], "waiting");
        assert_eq!(waiting["data"]["countdown"], 1);
        assert!(waiting["data"].get("crashPoint").is_none());

        engine.on_countdown_tick(std::time::Instant::now()).unwrap();
        engine.observe_multiplier(5.0).unwrap();

        let crashed = serde_json::to_value(ServerMessage::GameState(GameStateSnapshot::from_engine(&engine))).unwrap();
        assert_eq!(crashed["data"]["gameStatus"], "crashed");
        assert_eq!(crashed["data"]["crashPoint"], 4.2);
        assert_eq!(crashed["data"]["currentMultiplier"], 4.2);
        assert_eq!(crashed["data"]["gameHistory"][0]["multiplier"], 4.2);
    }

    #[test]
    fn test_rejection_wire_format() {
        let msg = ServerMessage::Rejected(Rejection {
            intent: IntentKind::Cashout,
            reason: RejectReason::AlreadyCashedOut,
        });
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(value, json!({
            "type": "rejected",
            "data": {"intent": "cashout", "reason": "alreadyCashedOut"}
        }));
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::Pong { timestamp: 5, server_time: 10 };
        let parsed = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert!(matches!(parsed, ServerMessage::Pong { timestamp: 5, server_time: 10 }));
    }
}
