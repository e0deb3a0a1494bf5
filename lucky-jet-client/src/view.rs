//! Local projection of the server's round state
//!
//! The view only ever copies what the server sent. It never predicts the
//! crash point and never advances the multiplier on its own, so a client that
//! stops receiving updates shows a frozen value rather than a guess.

use crate::messages::{GameStateSnapshot, HistoryItem, PlayerView, RoundPhase};

#[derive(Debug, Clone, PartialEq)]
pub struct RoundView {
    pub round_id: Option<String>,
    pub phase: Option<RoundPhase>,
    pub countdown: u32,
    pub multiplier: f64,
    /// Only known once the round has crashed.
    pub crash_point: Option<f64>,
    pub start_time: i64,
    pub history: Vec<HistoryItem>,
    pub players: Vec<PlayerView>,
    pub total_bet: f64,
    pub total_won: f64,
    synced: bool,
}

impl Default for RoundView {
    fn default() -> Self {
        Self {
            round_id: None,
            phase: None,
            countdown: 0,
            multiplier: 1.0,
            crash_point: None,
            start_time: 0,
            history: Vec::new(),
            players: Vec::new(),
            total_bet: 0.0,
            total_won: 0.0,
            synced: false,
        }
    }
}

impl RoundView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has arrived since the last (re)connect.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Overwrite every field from a full snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &GameStateSnapshot) {
        self.round_id = Some(snapshot.game_id.clone());
        self.phase = Some(snapshot.game_status);
        self.countdown = snapshot.countdown;
        self.multiplier = snapshot.current_multiplier;
        self.crash_point = snapshot.crash_point;
        self.start_time = snapshot.start_time;
        self.history = snapshot.game_history.clone();
        self.players = snapshot.players.clone();
        self.total_bet = snapshot.total_bet;
        self.total_won = snapshot.total_won;
        self.synced = true;
    }

    /// Patch the countdown. Ignored until resynchronized.
    pub fn apply_countdown(&mut self, seconds: u32) -> bool {
        if !self.synced {
            return false;
        }
        self.countdown = seconds;
        true
    }

    /// Patch the multiplier. Ignored until resynchronized.
    pub fn apply_multiplier(&mut self, multiplier: f64) -> bool {
        if !self.synced {
            return false;
        }
        self.multiplier = multiplier;
        true
    }

    /// Connection lost: keep the last values on screen but stop accepting
    /// increments until a fresh snapshot arrives.
    pub fn mark_disconnected(&mut self) {
        self.synced = false;
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn last_crash(&self) -> Option<f64> {
        self.history.first().map(|h| h.multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: RoundPhase, multiplier: f64) -> GameStateSnapshot {
        GameStateSnapshot {
            game_id: "round-1".to_string(),
            countdown: 4,
            crash_point: None,
            game_status: status,
            start_time: 1_700_000_000_000,
            current_multiplier: multiplier,
            game_history: vec![HistoryItem { multiplier: 1.87, timestamp: 1_699_999_990_000 }],
            players: vec![],
            total_bet: 0.0,
            total_won: 0.0,
        }
    }

    #[test]
    fn test_snapshot_twice_is_idempotent() {
        let mut view = RoundView::new();
        let snap = snapshot(RoundPhase::Waiting, 1.0);

        view.apply_snapshot(&snap);
        let once = view.clone();
        view.apply_snapshot(&snap);
        assert_eq!(view, once);
    }

    #[test]
    fn test_increments_patch_one_field() {
        let mut view = RoundView::new();
        view.apply_snapshot(&snapshot(RoundPhase::Running, 1.1));

        assert!(view.apply_multiplier(1.35));
        assert_eq!(view.multiplier, 1.35);
        assert_eq!(view.phase, Some(RoundPhase::Running));
        assert_eq!(view.countdown, 4);
        assert_eq!(view.last_crash(), Some(1.87));

        assert!(view.apply_countdown(0));
        assert_eq!(view.multiplier, 1.35);
    }

    #[test]
    fn test_increments_ignored_until_resync() {
        let mut view = RoundView::new();
        assert!(!view.apply_multiplier(2.0));
        assert_eq!(view.multiplier, 1.0);

        view.apply_snapshot(&snapshot(RoundPhase::Running, 1.2));
        view.mark_disconnected();
        assert!(!view.apply_multiplier(3.0));
        // Frozen, never extrapolated
        assert_eq!(view.multiplier, 1.2);

        view.apply_snapshot(&snapshot(RoundPhase::Running, 2.4));
        assert!(view.is_synced());
        assert!(view.apply_multiplier(2.5));
    }
}
