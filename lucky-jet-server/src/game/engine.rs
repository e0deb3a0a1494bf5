//! Round Engine
//!
//! Owns the single current round and the history, draws crash points, and
//! exposes one method per timer or intent. No I/O and no timers of its own:
//! the orchestrator task in `network::server` decides *when* to call it.

use std::time::Instant;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RoundConfig;
use crate::game::crash_point::generate_crash_point;
use crate::game::history::{HistoryEntry, RoundHistory};
use crate::game::round::{
    Advance, CashoutReceipt, IntentRejection, ParticipantStatus, PlayerId, Round,
    RoundError, RoundId, RoundPhase,
};

/// Outcome of a countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Still counting down.
    Counting(u32),
    /// Countdown hit zero and the round is now running.
    Started,
}

/// Outcome of a multiplier tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiplierTick {
    /// Still running.
    Rising {
        /// Current multiplier.
        multiplier: f64,
        /// Auto-cashouts accepted on this tick.
        auto_cashouts: Vec<CashoutReceipt>,
    },
    /// The round crashed on this tick.
    Crashed(CrashReport),
}

/// Settlement summary of a crashed round.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    /// Round that crashed.
    pub round_id: RoundId,
    /// Final multiplier.
    pub crash_point: f64,
    /// Wall-clock crash time (Unix ms).
    pub ended_at: i64,
    /// Auto-cashouts that fired on the crashing tick.
    pub auto_cashouts: Vec<CashoutReceipt>,
    /// Players who cashed out, with their payout.
    pub winners: Vec<(PlayerId, f64)>,
    /// Players who forfeited, with their bet.
    pub losers: Vec<(PlayerId, f64)>,
}

/// Single-writer owner of round state.
pub struct RoundEngine {
    config: RoundConfig,
    round: Round,
    history: RoundHistory,
    rng: StdRng,
}

impl RoundEngine {
    /// Create an engine with an entropy-seeded random source.
    pub fn new(config: RoundConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create an engine with a given random source.
    pub fn with_rng(config: RoundConfig, mut rng: StdRng) -> Self {
        let round = Round::new(generate_crash_point(&mut rng), config.countdown_secs, now_ms());
        Self::from_parts(config, round, rng)
    }

    /// Create an engine around an existing round (e.g. a forced crash point).
    pub fn from_parts(config: RoundConfig, round: Round, rng: StdRng) -> Self {
        let history = RoundHistory::new(config.history_capacity);
        Self { config, round, history, rng }
    }

    /// Round parameters.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Current round (read-only).
    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Finished rounds, newest first.
    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.round.phase()
    }

    /// One-second countdown tick. Starts the round when the countdown hits zero.
    pub fn on_countdown_tick(&mut self, now: Instant) -> Result<CountdownTick, RoundError> {
        let remaining = self.round.tick_countdown()?;
        if remaining > 0 {
            return Ok(CountdownTick::Counting(remaining));
        }

        self.round.start(now, now_ms())?;
        Ok(CountdownTick::Started)
    }

    /// Multiplier tick. Records history and settles the round on crash.
    pub fn on_multiplier_tick(&mut self, now: Instant) -> Result<MultiplierTick, RoundError> {
        match self.round.advance(now, self.config.growth_rate)? {
            Advance::Rising { multiplier, auto_cashouts } => {
                Ok(MultiplierTick::Rising { multiplier, auto_cashouts })
            }
            Advance::Crashed { crash_point, auto_cashouts } => {
                Ok(MultiplierTick::Crashed(self.settle_crash(crash_point, auto_cashouts)))
            }
        }
    }

    /// Apply an externally computed multiplier value (used by simulations).
    pub fn observe_multiplier(&mut self, value: f64) -> Result<MultiplierTick, RoundError> {
        match self.round.observe_multiplier(value)? {
            Advance::Rising { multiplier, auto_cashouts } => {
                Ok(MultiplierTick::Rising { multiplier, auto_cashouts })
            }
            Advance::Crashed { crash_point, auto_cashouts } => {
                Ok(MultiplierTick::Crashed(self.settle_crash(crash_point, auto_cashouts)))
            }
        }
    }

    /// `Crashed → Waiting`: new id, fresh crash point, full countdown.
    pub fn begin_next_round(&mut self) -> Result<&Round, RoundError> {
        if self.round.phase() != RoundPhase::Crashed {
            return Err(RoundError::InvalidTransition {
                phase: self.round.phase(),
                action: "begin next round",
            });
        }
        Ok(self.reset())
    }

    /// Discard the current round, whatever its phase, and start a fresh
    /// countdown. Used to recover from a faulted timer.
    pub fn reset(&mut self) -> &Round {
        let crash_point = generate_crash_point(&mut self.rng);
        self.round = Round::new(crash_point, self.config.countdown_secs, now_ms());
        &self.round
    }

    /// Join the current round.
    pub fn join(
        &mut self,
        player_id: PlayerId,
        bet_amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<RoundId, IntentRejection> {
        self.round.join(player_id, bet_amount, auto_cashout)?;
        Ok(self.round.id())
    }

    /// Cash out of the current round at the current multiplier.
    pub fn cashout(&mut self, player_id: &PlayerId) -> Result<CashoutReceipt, IntentRejection> {
        self.round.cashout(player_id)
    }

    fn settle_crash(&mut self, crash_point: f64, auto_cashouts: Vec<CashoutReceipt>) -> CrashReport {
        let ended_at = now_ms();
        self.history.record(HistoryEntry { crash_point, ended_at });

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        for participant in self.round.participants() {
            match participant.status {
                ParticipantStatus::CashedOut { payout, .. } => {
                    winners.push((participant.player_id.clone(), payout));
                }
                ParticipantStatus::Lost => {
                    losers.push((participant.player_id.clone(), participant.bet_amount));
                }
                ParticipantStatus::Active => {}
            }
        }

        CrashReport {
            round_id: self.round.id(),
            crash_point,
            ended_at,
            auto_cashouts,
            winners,
            losers,
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine_with(crash_point: f64, countdown_secs: u32) -> RoundEngine {
        let config = RoundConfig {
            countdown_secs,
            ..RoundConfig::default()
        };
        let round = Round::new(crash_point, countdown_secs, now_ms());
        RoundEngine::from_parts(config, round, StdRng::seed_from_u64(7))
    }

    fn run_countdown(engine: &mut RoundEngine, now: Instant) {
        loop {
            if engine.on_countdown_tick(now).unwrap() == CountdownTick::Started {
                break;
            }
        }
    }

    #[test]
    fn test_forced_crash_scenario() {
        let mut engine = engine_with(1.5, 1);
        run_countdown(&mut engine, Instant::now());
        assert_eq!(engine.phase(), RoundPhase::Running);

        for value in [1.0, 1.2] {
            assert!(matches!(engine.observe_multiplier(value).unwrap(), MultiplierTick::Rising { .. }));
        }
        assert!(engine.history().is_empty());

        let report = match engine.observe_multiplier(1.5).unwrap() {
            MultiplierTick::Crashed(report) => report,
            other => panic!("expected crash, got {other:?}"),
        };
        assert_eq!(report.crash_point, 1.5);
        assert_eq!(engine.round().multiplier(), 1.5);
        assert_eq!(engine.history().len(), 1);

        let entry = engine.history().latest().unwrap();
        assert_eq!(entry.crash_point, 1.5);
        assert_eq!(entry.ended_at, report.ended_at);

        // 1.6 arrives after the crash and is refused
        assert!(engine.observe_multiplier(1.6).is_err());
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_cashout_scenario() {
        let player = PlayerId::new("p1");
        let mut engine = engine_with(5.0, 1);
        engine.join(player.clone(), 100.0, None).unwrap();
        run_countdown(&mut engine, Instant::now());
        engine.observe_multiplier(2.37).unwrap();

        let receipt = engine.cashout(&player).unwrap();
        assert_eq!(receipt.payout, 237.0);

        let second = engine.cashout(&player).unwrap_err();
        assert_eq!(second.reason, crate::game::round::RejectReason::AlreadyCashedOut);
    }

    #[test]
    fn test_forfeit_scenario() {
        let player = PlayerId::new("p1");
        let mut engine = engine_with(1.8, 1);
        engine.join(player.clone(), 100.0, None).unwrap();
        run_countdown(&mut engine, Instant::now());

        let report = match engine.observe_multiplier(1.8).unwrap() {
            MultiplierTick::Crashed(report) => report,
            other => panic!("expected crash, got {other:?}"),
        };
        assert!(report.winners.is_empty());
        assert_eq!(report.losers, vec![(player.clone(), 100.0)]);
        assert_eq!(engine.round().total_won(), 0.0);
        assert!(engine.cashout(&player).is_err());
    }

    #[test]
    fn test_empty_round_still_cycles() {
        let mut engine = engine_with(1.2, 2);
        let start = Instant::now();
        assert_eq!(engine.on_countdown_tick(start).unwrap(), CountdownTick::Counting(1));
        assert_eq!(engine.on_countdown_tick(start).unwrap(), CountdownTick::Started);

        let mut now = start;
        let report = loop {
            now += Duration::from_millis(100);
            if let MultiplierTick::Crashed(report) = engine.on_multiplier_tick(now).unwrap() {
                break report;
            }
            assert!(now - start < Duration::from_secs(60), "round never crashed");
        };
        assert!(report.winners.is_empty() && report.losers.is_empty());

        let first_id = report.round_id;
        let next = engine.begin_next_round().unwrap();
        assert_ne!(next.id(), first_id);
        assert_eq!(next.phase(), RoundPhase::Waiting);
        assert_eq!(next.countdown_remaining(), 2);
        assert_eq!(next.multiplier(), 1.0);
    }

    #[test]
    fn test_begin_next_round_requires_crash() {
        let mut engine = engine_with(2.0, 1);
        assert!(engine.begin_next_round().is_err());
        assert!(engine.on_multiplier_tick(Instant::now()).is_err());

        let id = engine.round().id();
        engine.reset();
        assert_ne!(engine.round().id(), id);
        assert_eq!(engine.phase(), RoundPhase::Waiting);
    }

    #[test]
    fn test_history_capped_across_rounds() {
        let mut engine = engine_with(1.0, 1);
        for _ in 0..15 {
            run_countdown(&mut engine, Instant::now());
            // Force a crash whatever the drawn crash point
            let _ = engine.observe_multiplier(100.0).unwrap();
            engine.begin_next_round().unwrap();
        }
        assert_eq!(engine.history().len(), 10);
        let stamps: Vec<i64> = engine.history().iter().map(|e| e.ended_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] >= w[1]));
    }
}
