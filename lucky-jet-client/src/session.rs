//! Client session
//!
//! Synchronous core of a client: feeds server messages into the view, tracks
//! this player's own bet and applies ledger effects. No I/O, so the driver in
//! `client` and the tests share the exact same logic.
//!
//! Own-bet state is optimistic between sending an intent and its reply, but a
//! full snapshot always wins: if it lists a cashout or a crash, that is the
//! outcome regardless of what the client believed.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::BalanceLedger;
use crate::messages::{
    CashoutAccepted, ClientMessage, GameStateSnapshot, IntentKind, JoinAccepted, RejectReason,
    RoundPhase, ServerMessage,
};
use crate::view::RoundView;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SessionError {
    #[error("waiting for a game state snapshot")]
    NotSynced,
    #[error("bets are only accepted during the countdown")]
    NotWaiting,
    #[error("round is not running")]
    NotRunning,
    #[error("already in this round")]
    AlreadyJoined,
    #[error("not in this round")]
    NotJoined,
    #[error("bet must be positive")]
    InvalidBet,
    #[error("auto cashout must be above 1.0")]
    InvalidAutoCashout,
    #[error("insufficient balance for a bet of {0}")]
    InsufficientBalance(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BetStatus {
    /// Join sent, no reply yet.
    Pending,
    Joined,
    /// Cashout sent, no reply yet.
    CashingOut,
    CashedOut { multiplier: f64, payout: f64 },
    Won { payout: f64 },
    Lost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnBet {
    /// Round the bet belongs to; unknown until the join is acknowledged when
    /// sent before the first snapshot of a round.
    pub round_id: Option<String>,
    pub amount: f64,
    pub auto_cashout: Option<f64>,
    pub status: BetStatus,
    /// Whether the ledger actually took the stake. Unfunded bets are never paid.
    pub funded: bool,
}

impl OwnBet {
    fn is_settled(&self) -> bool {
        matches!(self.status, BetStatus::Won { .. } | BetStatus::Lost)
    }

    fn is_cashed_out(&self) -> bool {
        matches!(self.status, BetStatus::CashedOut { .. } | BetStatus::Won { .. })
    }

    fn in_round(&self, round_id: &str) -> bool {
        self.round_id.as_deref() == Some(round_id)
    }
}

/// What changed after handling a server message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Synced(RoundPhase),
    Countdown(u32),
    Multiplier(f64),
    Joined { amount: f64 },
    /// The server accepted the bet but the ledger could no longer cover it.
    Unfunded { amount: f64 },
    CashedOut { multiplier: f64, payout: f64 },
    Won { payout: f64 },
    Lost { amount: f64 },
    Rejected { intent: IntentKind, reason: RejectReason },
    Pong { rtt_ms: u64 },
    Shutdown(String),
}

pub struct ClientSession<L> {
    player_id: String,
    view: RoundView,
    ledger: L,
    bet: Option<OwnBet>,
}

impl<L: BalanceLedger> ClientSession<L> {
    pub fn new(player_id: impl Into<String>, ledger: L) -> Self {
        Self {
            player_id: player_id.into(),
            view: RoundView::new(),
            ledger,
            bet: None,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn view(&self) -> &RoundView {
        &self.view
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn bet(&self) -> Option<&OwnBet> {
        self.bet.as_ref()
    }

    /// Whether a join would currently be allowed.
    pub fn can_join(&self) -> bool {
        self.view.is_synced()
            && self.view.phase == Some(RoundPhase::Waiting)
            && self.bet.as_ref().map_or(true, OwnBet::is_settled)
    }

    /// Whether a cashout would currently be allowed.
    pub fn can_cashout(&self) -> bool {
        self.view.phase == Some(RoundPhase::Running)
            && matches!(self.bet.as_ref().map(|b| b.status), Some(BetStatus::Joined))
    }

    /// Validate a bet locally and build the join intent.
    pub fn prepare_join(&mut self, amount: f64, auto_cashout: Option<f64>) -> Result<ClientMessage, SessionError> {
        if !self.view.is_synced() {
            return Err(SessionError::NotSynced);
        }
        if self.view.phase != Some(RoundPhase::Waiting) {
            return Err(SessionError::NotWaiting);
        }
        if self.bet.as_ref().is_some_and(|b| !b.is_settled()) {
            return Err(SessionError::AlreadyJoined);
        }
        if !(amount.is_finite() && amount > 0.0) {
            return Err(SessionError::InvalidBet);
        }
        if auto_cashout.is_some_and(|target| !(target.is_finite() && target > 1.0)) {
            return Err(SessionError::InvalidAutoCashout);
        }
        if !self.ledger.can_afford(amount) {
            return Err(SessionError::InsufficientBalance(amount));
        }

        self.bet = Some(OwnBet {
            round_id: self.view.round_id.clone(),
            amount,
            auto_cashout,
            status: BetStatus::Pending,
            funded: false,
        });
        Ok(ClientMessage::join(&self.player_id, amount, auto_cashout))
    }

    /// Build the cashout intent for the running round.
    pub fn prepare_cashout(&mut self) -> Result<ClientMessage, SessionError> {
        if self.view.phase != Some(RoundPhase::Running) {
            return Err(SessionError::NotRunning);
        }
        match self.bet.as_mut() {
            Some(bet) if bet.status == BetStatus::Joined => {
                bet.status = BetStatus::CashingOut;
                Ok(ClientMessage::cashout(&self.player_id))
            }
            _ => Err(SessionError::NotJoined),
        }
    }

    /// Connection lost. Increments are ignored until the next snapshot.
    pub fn on_disconnected(&mut self) {
        self.view.mark_disconnected();
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Vec<SessionEvent> {
        match msg {
            ServerMessage::GameState(snapshot) => self.on_snapshot(&snapshot),
            ServerMessage::Countdown(seconds) => {
                if self.view.apply_countdown(seconds) {
                    vec![SessionEvent::Countdown(seconds)]
                } else {
                    Vec::new()
                }
            }
            ServerMessage::Multiplier(multiplier) => {
                if self.view.apply_multiplier(multiplier) {
                    vec![SessionEvent::Multiplier(multiplier)]
                } else {
                    Vec::new()
                }
            }
            ServerMessage::JoinAccepted(ack) => self.on_join_accepted(ack),
            ServerMessage::CashoutAccepted(ack) => self.on_cashout_accepted(ack),
            ServerMessage::Rejected(rejection) => {
                debug!("{:?} rejected: {:?}", rejection.intent, rejection.reason);
                match (rejection.intent, self.bet.as_ref().map(|b| b.status)) {
                    (IntentKind::Join, Some(BetStatus::Pending)) => self.bet = None,
                    (IntentKind::Cashout, Some(BetStatus::CashingOut)) => {
                        if let Some(bet) = self.bet.as_mut() {
                            bet.status = BetStatus::Joined;
                        }
                    }
                    _ => {}
                }
                vec![SessionEvent::Rejected { intent: rejection.intent, reason: rejection.reason }]
            }
            ServerMessage::Pong { timestamp, .. } => {
                let rtt_ms = crate::messages::now_ms().saturating_sub(timestamp);
                vec![SessionEvent::Pong { rtt_ms }]
            }
            ServerMessage::Shutdown { reason } => {
                warn!("Server shutting down: {}", reason);
                vec![SessionEvent::Shutdown(reason)]
            }
        }
    }

    fn on_join_accepted(&mut self, ack: JoinAccepted) -> Vec<SessionEvent> {
        let Some(bet) = self.bet.as_mut() else {
            warn!("Join accepted for round {} without a pending bet", ack.game_id);
            return Vec::new();
        };
        if bet.status != BetStatus::Pending {
            return Vec::new();
        }
        bet.round_id = Some(ack.game_id);
        bet.amount = ack.bet_amount;
        bet.status = BetStatus::Joined;
        self.debit_stake()
    }

    fn on_cashout_accepted(&mut self, ack: CashoutAccepted) -> Vec<SessionEvent> {
        match self.bet.as_ref() {
            Some(bet) if bet.in_round(&ack.game_id) && !bet.is_cashed_out() => {
                self.credit_cashout(ack.multiplier, ack.payout)
            }
            _ => Vec::new(),
        }
    }

    fn on_snapshot(&mut self, snapshot: &GameStateSnapshot) -> Vec<SessionEvent> {
        self.view.apply_snapshot(snapshot);
        let mut events = vec![SessionEvent::Synced(snapshot.game_status)];

        let Some(bet) = self.bet.as_ref() else {
            return events;
        };
        if bet.is_settled() {
            return events;
        }

        let listed = snapshot.player(&self.player_id).cloned();
        let same_round = bet.round_id.is_none() || bet.in_round(&snapshot.game_id);

        if !same_round {
            // The round ended while we weren't looking.
            warn!("Lost track of bet in round {:?}; outcome unknown", bet.round_id);
            self.bet = None;
            return events;
        }

        if let Some(entry) = &listed {
            if bet.status == BetStatus::Pending {
                if let Some(b) = self.bet.as_mut() {
                    b.round_id = Some(snapshot.game_id.clone());
                }
                events.extend(self.debit_stake());
            }
            let cashed = self.bet.as_ref().is_some_and(OwnBet::is_cashed_out);
            if let (Some(multiplier), false) = (entry.cashed_out_at, cashed) {
                let payout = round_currency(entry.bet_amount * multiplier);
                events.extend(self.credit_cashout(multiplier, payout));
            }
        } else if snapshot.game_status != RoundPhase::Waiting && bet.status == BetStatus::Pending {
            debug!("Join never made it into round {}", snapshot.game_id);
            self.bet = None;
            return events;
        }

        if snapshot.game_status == RoundPhase::Crashed {
            events.extend(self.settle());
        }
        events
    }

    fn debit_stake(&mut self) -> Vec<SessionEvent> {
        let Some(bet) = self.bet.as_mut() else {
            return Vec::new();
        };
        bet.status = BetStatus::Joined;
        let amount = bet.amount;
        match self.ledger.place_bet(amount) {
            Ok(_) => {
                bet.funded = true;
                info!("Joined round with {}", amount);
                vec![SessionEvent::Joined { amount }]
            }
            Err(e) => {
                warn!("Ledger refused stake of {}: {}; bet will not be paid", amount, e);
                vec![SessionEvent::Unfunded { amount }]
            }
        }
    }

    fn credit_cashout(&mut self, multiplier: f64, payout: f64) -> Vec<SessionEvent> {
        let Some(bet) = self.bet.as_mut() else {
            return Vec::new();
        };
        let payout = if bet.funded { payout } else { 0.0 };
        bet.status = BetStatus::CashedOut { multiplier, payout };
        if !bet.funded {
            warn!("Cashed out at {:.2}x on an unfunded bet, nothing credited", multiplier);
        } else if let Err(e) = self.ledger.add_winnings(payout) {
            warn!("Ledger refused winnings of {}: {}", payout, e);
        }
        info!("Cashed out at {:.2}x for {}", multiplier, payout);
        vec![SessionEvent::CashedOut { multiplier, payout }]
    }

    /// Round crashed: anything not cashed out is lost.
    fn settle(&mut self) -> Vec<SessionEvent> {
        let Some(bet) = self.bet.as_mut() else {
            return Vec::new();
        };
        match bet.status {
            BetStatus::CashedOut { payout, .. } => {
                bet.status = BetStatus::Won { payout };
                vec![SessionEvent::Won { payout }]
            }
            BetStatus::Joined | BetStatus::CashingOut => {
                bet.status = BetStatus::Lost;
                let amount = if bet.funded { bet.amount } else { 0.0 };
                info!("Round crashed before cashout, lost {}", amount);
                vec![SessionEvent::Lost { amount }]
            }
            BetStatus::Pending | BetStatus::Won { .. } | BetStatus::Lost => Vec::new(),
        }
    }
}

/// Round to cents. Must match the server's payout rounding exactly, since a
/// snapshot-derived payout stands in for a missed `cashoutAccepted`.
fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::messages::{PlayerView, Rejection};

    const ME: &str = "me";

    fn snapshot(round: &str, status: RoundPhase, players: Vec<PlayerView>) -> ServerMessage {
        ServerMessage::GameState(GameStateSnapshot {
            game_id: round.to_string(),
            countdown: if status == RoundPhase::Waiting { 5 } else { 0 },
            crash_point: None,
            game_status: status,
            start_time: 0,
            current_multiplier: 1.0,
            game_history: vec![],
            players,
            total_bet: 0.0,
            total_won: 0.0,
        })
    }

    fn me(bet_amount: f64, cashed_out_at: Option<f64>) -> PlayerView {
        PlayerView { player_id: ME.to_string(), bet_amount, cashed_out_at }
    }

    fn session() -> ClientSession<InMemoryLedger> {
        let mut s = ClientSession::new(ME, InMemoryLedger::new(1000.0));
        s.handle_server_message(snapshot("r1", RoundPhase::Waiting, vec![]));
        s
    }

    fn join(s: &mut ClientSession<InMemoryLedger>, amount: f64) {
        s.prepare_join(amount, None).unwrap();
        s.handle_server_message(ServerMessage::JoinAccepted(JoinAccepted {
            game_id: "r1".to_string(),
            bet_amount: amount,
        }));
    }

    #[test]
    fn test_join_requires_snapshot() {
        let mut s = ClientSession::new(ME, InMemoryLedger::default());
        assert_eq!(s.prepare_join(10.0, None), Err(SessionError::NotSynced));
    }

    #[test]
    fn test_join_checks_balance_before_sending() {
        let mut s = session();
        assert_eq!(s.prepare_join(5000.0, None), Err(SessionError::InsufficientBalance(5000.0)));
        assert!(s.bet().is_none());
        assert_eq!(s.prepare_join(10.0, Some(1.0)), Err(SessionError::InvalidAutoCashout));
    }

    #[test]
    fn test_stake_debited_on_accept_only() {
        let mut s = session();
        let msg = s.prepare_join(100.0, None).unwrap();
        assert_eq!(msg, ClientMessage::join(ME, 100.0, None));
        assert_eq!(s.ledger().balance(), 1000.0);
        assert_eq!(s.prepare_join(100.0, None), Err(SessionError::AlreadyJoined));

        let events = s.handle_server_message(ServerMessage::JoinAccepted(JoinAccepted {
            game_id: "r1".to_string(),
            bet_amount: 100.0,
        }));
        assert_eq!(events, vec![SessionEvent::Joined { amount: 100.0 }]);
        assert_eq!(s.ledger().balance(), 900.0);

        // The broadcast that follows doesn't debit twice
        s.handle_server_message(snapshot("r1", RoundPhase::Waiting, vec![me(100.0, None)]));
        assert_eq!(s.ledger().balance(), 900.0);
    }

    #[test]
    fn test_unfunded_bet_is_never_paid() {
        let mut s = ClientSession::new(ME, InMemoryLedger::new(100.0));
        s.handle_server_message(snapshot("r1", RoundPhase::Waiting, vec![]));
        s.prepare_join(100.0, None).unwrap();

        // The balance is spent elsewhere before the join is acknowledged
        s.ledger_mut().place_bet(100.0).unwrap();
        let events = s.handle_server_message(ServerMessage::JoinAccepted(JoinAccepted {
            game_id: "r1".to_string(),
            bet_amount: 100.0,
        }));
        assert_eq!(events, vec![SessionEvent::Unfunded { amount: 100.0 }]);
        assert_eq!(s.bet().map(|b| b.funded), Some(false));
        assert_eq!(s.ledger().balance(), 0.0);

        s.handle_server_message(snapshot("r1", RoundPhase::Running, vec![me(100.0, None)]));
        s.prepare_cashout().unwrap();
        let events = s.handle_server_message(ServerMessage::CashoutAccepted(CashoutAccepted {
            game_id: "r1".to_string(),
            multiplier: 2.0,
            payout: 200.0,
        }));
        assert_eq!(events, vec![SessionEvent::CashedOut { multiplier: 2.0, payout: 0.0 }]);
        assert_eq!(s.ledger().balance(), 0.0);

        // Neither does the snapshot listing the cashout
        let events = s.handle_server_message(snapshot("r1", RoundPhase::Crashed, vec![me(100.0, Some(2.0))]));
        assert!(events.contains(&SessionEvent::Won { payout: 0.0 }));
        assert_eq!(s.ledger().balance(), 0.0);
    }

    #[test]
    fn test_rejected_join_clears_bet() {
        let mut s = session();
        s.prepare_join(100.0, None).unwrap();
        let events = s.handle_server_message(ServerMessage::Rejected(Rejection {
            intent: IntentKind::Join,
            reason: RejectReason::NotWaiting,
        }));
        assert!(matches!(events[0], SessionEvent::Rejected { reason: RejectReason::NotWaiting, .. }));
        assert!(s.bet().is_none());
        assert_eq!(s.ledger().balance(), 1000.0);
    }

    #[test]
    fn test_cashout_then_crash_is_a_win() {
        let mut s = session();
        join(&mut s, 100.0);
        s.handle_server_message(snapshot("r1", RoundPhase::Running, vec![me(100.0, None)]));
        s.handle_server_message(ServerMessage::Multiplier(2.37));

        assert!(s.can_cashout());
        s.prepare_cashout().unwrap();
        assert_eq!(s.prepare_cashout(), Err(SessionError::NotJoined));

        s.handle_server_message(ServerMessage::CashoutAccepted(CashoutAccepted {
            game_id: "r1".to_string(),
            multiplier: 2.37,
            payout: 237.0,
        }));
        assert_eq!(s.ledger().balance(), 1137.0);

        // Snapshot confirming the cashout doesn't credit again
        s.handle_server_message(snapshot("r1", RoundPhase::Running, vec![me(100.0, Some(2.37))]));
        let events = s.handle_server_message(snapshot("r1", RoundPhase::Crashed, vec![me(100.0, Some(2.37))]));
        assert!(events.contains(&SessionEvent::Won { payout: 237.0 }));
        assert_eq!(s.ledger().balance(), 1137.0);
    }

    #[test]
    fn test_crash_before_cashout_is_a_loss() {
        let mut s = session();
        join(&mut s, 100.0);
        s.handle_server_message(snapshot("r1", RoundPhase::Running, vec![me(100.0, None)]));
        s.prepare_cashout().unwrap();

        // Crash wins the race against the cashout
        let events = s.handle_server_message(snapshot("r1", RoundPhase::Crashed, vec![me(100.0, None)]));
        assert!(events.contains(&SessionEvent::Lost { amount: 100.0 }));
        assert_eq!(s.bet().map(|b| b.status), Some(BetStatus::Lost));
        assert_eq!(s.ledger().balance(), 900.0);

        s.handle_server_message(ServerMessage::Rejected(Rejection {
            intent: IntentKind::Cashout,
            reason: RejectReason::NotRunning,
        }));
        assert_eq!(s.bet().map(|b| b.status), Some(BetStatus::Lost));
    }

    #[test]
    fn test_snapshot_credits_missed_auto_cashout() {
        let mut s = session();
        s.prepare_join(100.0, Some(1.5)).unwrap();
        s.handle_server_message(ServerMessage::JoinAccepted(JoinAccepted {
            game_id: "r1".to_string(),
            bet_amount: 100.0,
        }));

        // Reconnected: the cashoutAccepted went to the old connection
        s.on_disconnected();
        s.handle_server_message(ServerMessage::Multiplier(1.9));
        assert_eq!(s.view().multiplier, 1.0);

        let events = s.handle_server_message(snapshot("r1", RoundPhase::Crashed, vec![me(100.0, Some(1.5))]));
        assert!(events.contains(&SessionEvent::CashedOut { multiplier: 1.5, payout: 150.0 }));
        assert!(events.contains(&SessionEvent::Won { payout: 150.0 }));
        assert_eq!(s.ledger().balance(), 1050.0);
    }

    #[test]
    fn test_can_join_next_round_after_settlement() {
        let mut s = session();
        join(&mut s, 100.0);
        s.handle_server_message(snapshot("r1", RoundPhase::Crashed, vec![me(100.0, None)]));
        s.handle_server_message(snapshot("r2", RoundPhase::Waiting, vec![]));

        assert!(s.can_join());
        assert!(s.prepare_join(50.0, None).is_ok());
        assert_eq!(s.bet().and_then(|b| b.round_id.clone()), Some("r2".to_string()));
    }
}
