//! Host page bridge
//!
//! Messages exchanged between an embedded game and the hosting platform,
//! which owns the balance. Requests use `{ "type", "data" }` envelopes and
//! replies carry their fields next to `type`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{BalanceLedger, LedgerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    GameReady(GameInfo),
    RequestBalance,
    PlaceBet(Amount),
    GameWon(Amount),
    GameLost(LossInfo),
    Ping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossInfo {
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeReply {
    BalanceUpdate { balance: f64 },
    BetPlaced { amount: f64 },
    BetRejected { reason: String },
    WinProcessed { amount: f64 },
    LossProcessed,
    Pong,
}

impl BridgeMessage {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl BridgeReply {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Apply a bridge request to the ledger.
///
/// Returns `None` for requests that need no answer.
pub fn handle_bridge_message<L: BalanceLedger>(ledger: &mut L, msg: BridgeMessage) -> Option<BridgeReply> {
    match msg {
        BridgeMessage::GameReady(info) => {
            debug!("Game ready: {:?} {:?}", info.game_id, info.version);
            Some(BridgeReply::BalanceUpdate { balance: ledger.balance() })
        }
        BridgeMessage::RequestBalance => Some(BridgeReply::BalanceUpdate { balance: ledger.balance() }),
        BridgeMessage::PlaceBet(Amount { amount }) => match ledger.place_bet(amount) {
            Ok(_) => Some(BridgeReply::BetPlaced { amount }),
            Err(LedgerError::InsufficientBalance { .. }) => Some(BridgeReply::BetRejected {
                reason: "insufficient_balance".to_string(),
            }),
            Err(LedgerError::InvalidAmount(_)) => Some(BridgeReply::BetRejected {
                reason: "invalid_amount".to_string(),
            }),
        },
        BridgeMessage::GameWon(Amount { amount }) if amount > 0.0 => {
            ledger.add_winnings(amount).ok()?;
            Some(BridgeReply::WinProcessed { amount })
        }
        BridgeMessage::GameWon(_) => None,
        // The stake left the balance when the bet was placed.
        BridgeMessage::GameLost(_) => Some(BridgeReply::LossProcessed),
        BridgeMessage::Ping => Some(BridgeReply::Pong),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use serde_json::json;

    fn handle(ledger: &mut InMemoryLedger, raw: &str) -> Option<serde_json::Value> {
        let msg = BridgeMessage::from_json(raw).unwrap();
        handle_bridge_message(ledger, msg).map(|reply| serde_json::to_value(reply).unwrap())
    }

    #[test]
    fn test_bet_lifecycle() {
        let mut ledger = InMemoryLedger::new(1000.0);

        assert_eq!(
            handle(&mut ledger, r#"{"type":"GAME_READY","data":{"gameId":"lucky-jet","version":"1.0.0"}}"#),
            Some(json!({"type": "BALANCE_UPDATE", "balance": 1000.0}))
        );
        assert_eq!(
            handle(&mut ledger, r#"{"type":"PLACE_BET","data":{"amount":100}}"#),
            Some(json!({"type": "BET_PLACED", "amount": 100.0}))
        );
        assert_eq!(
            handle(&mut ledger, r#"{"type":"GAME_WON","data":{"amount":237}}"#),
            Some(json!({"type": "WIN_PROCESSED", "amount": 237.0}))
        );
        assert_eq!(
            handle(&mut ledger, r#"{"type":"REQUEST_BALANCE"}"#),
            Some(json!({"type": "BALANCE_UPDATE", "balance": 1137.0}))
        );
    }

    #[test]
    fn test_rejections_and_no_ops() {
        let mut ledger = InMemoryLedger::new(50.0);

        assert_eq!(
            handle(&mut ledger, r#"{"type":"PLACE_BET","data":{"amount":100}}"#),
            Some(json!({"type": "BET_REJECTED", "reason": "insufficient_balance"}))
        );
        assert_eq!(handle(&mut ledger, r#"{"type":"GAME_WON","data":{"amount":0}}"#), None);
        assert_eq!(
            handle(&mut ledger, r#"{"type":"GAME_LOST","data":{"amount":20}}"#),
            Some(json!({"type": "LOSS_PROCESSED"}))
        );
        assert_eq!(handle(&mut ledger, r#"{"type":"PING"}"#), Some(json!({"type": "PONG"})));
        assert_eq!(ledger.balance(), 50.0);
    }

    #[test]
    fn test_unknown_message_is_error() {
        assert!(BridgeMessage::from_json(r#"{"type":"SELL_HOUSE"}"#).is_err());
    }
}
