//! Round State Machine
//!
//! One play cycle: `Waiting(countdown)` → `Running(elapsed)` → `Crashed`.
//! The round also holds its participants, since join and cashout validity is
//! decided purely by the round's phase and multiplier.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque round identifier, fresh for every round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(Uuid);

impl RoundId {
    /// Generate a new random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player identifier as chosen by the client.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Round phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    /// Counting down, accepting joins.
    Waiting,
    /// Multiplier rising, accepting cashouts.
    Running,
    /// Round over; multiplier frozen at the crash point.
    Crashed,
}

/// Multiplier growth law: `max(1, e^(k·t))`.
#[inline]
pub fn multiplier_at(elapsed_secs: f64, growth_rate: f64) -> f64 {
    (growth_rate * elapsed_secs.max(0.0)).exp().max(1.0)
}

/// Round a currency amount to cents.
#[inline]
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// Where a participant stands in the current round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticipantStatus {
    /// Joined, not cashed out, round not crashed.
    Active,
    /// Locked in a multiplier.
    CashedOut {
        /// Multiplier at acceptance.
        multiplier: f64,
        /// `bet * multiplier`.
        payout: f64,
    },
    /// Round crashed before a cashout; bet forfeited.
    Lost,
}

/// A player who joined the round.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Stake.
    pub bet_amount: f64,
    /// Optional automatic cashout target.
    pub auto_cashout: Option<f64>,
    /// Current status.
    pub status: ParticipantStatus,
}

impl Participant {
    /// Multiplier the participant cashed out at, if any.
    pub fn cashed_out_at(&self) -> Option<f64> {
        match self.status {
            ParticipantStatus::CashedOut { multiplier, .. } => Some(multiplier),
            _ => None,
        }
    }

    /// Payout received, if any.
    pub fn payout(&self) -> Option<f64> {
        match self.status {
            ParticipantStatus::CashedOut { payout, .. } => Some(payout),
            _ => None,
        }
    }
}

/// Accepted cashout.
#[derive(Debug, Clone, PartialEq)]
pub struct CashoutReceipt {
    /// Round the cashout belongs to.
    pub round_id: RoundId,
    /// Player who cashed out.
    pub player_id: PlayerId,
    /// Stake.
    pub bet_amount: f64,
    /// Locked multiplier.
    pub multiplier: f64,
    /// `bet * multiplier`, rounded to cents.
    pub payout: f64,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why an intent was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// Join outside the countdown.
    NotWaiting,
    /// Cashout outside the running phase.
    NotRunning,
    /// Player already joined this round.
    AlreadyJoined,
    /// Cashout by a player who never joined.
    NotParticipant,
    /// Second cashout in the same round.
    AlreadyCashedOut,
    /// Bet or auto-cashout target out of range.
    InvalidBet,
    /// Clients cannot declare a crash.
    CrashIsServerAuthoritative,
}

/// Intent refused by the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("intent rejected: {reason:?}")]
pub struct IntentRejection {
    /// Reason reported back to the client.
    pub reason: RejectReason,
}

impl From<RejectReason> for IntentRejection {
    fn from(reason: RejectReason) -> Self {
        Self { reason }
    }
}

/// Invalid state-machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundError {
    /// Action not allowed in the current phase.
    #[error("cannot {action} while {phase:?}")]
    InvalidTransition {
        /// Current phase.
        phase: RoundPhase,
        /// Attempted action.
        action: &'static str,
    },

    /// Running phase has no start time.
    #[error("running round has no start time")]
    MissingStartTime,
}

// =============================================================================
// ROUND
// =============================================================================

/// Result of observing a new multiplier value.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Still running.
    Rising {
        /// Current multiplier.
        multiplier: f64,
        /// Auto-cashouts triggered by this value.
        auto_cashouts: Vec<CashoutReceipt>,
    },
    /// Crash point reached on this value.
    Crashed {
        /// Final multiplier (equal to the crash point).
        crash_point: f64,
        /// Auto-cashouts that fired before the crash.
        auto_cashouts: Vec<CashoutReceipt>,
    },
}

/// The current round.
#[derive(Debug, Clone)]
pub struct Round {
    id: RoundId,
    phase: RoundPhase,
    crash_point: f64,
    countdown_remaining: u32,
    multiplier: f64,
    elapsed: f64,
    started_at: Option<Instant>,
    start_time_ms: i64,
    participants: BTreeMap<PlayerId, Participant>,
    total_bet: f64,
    total_won: f64,
}

impl Round {
    /// Create a round in `Waiting` with a pre-drawn crash point.
    pub fn new(crash_point: f64, countdown_secs: u32, now_ms: i64) -> Self {
        Self {
            id: RoundId::generate(),
            phase: RoundPhase::Waiting,
            crash_point: crash_point.max(1.0),
            countdown_remaining: countdown_secs,
            multiplier: 1.0,
            elapsed: 0.0,
            started_at: None,
            start_time_ms: now_ms,
            participants: BTreeMap::new(),
            total_bet: 0.0,
            total_won: 0.0,
        }
    }

    /// Round identifier.
    pub fn id(&self) -> RoundId {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Hidden crash point. Never send this before the round crashes.
    pub fn crash_point(&self) -> f64 {
        self.crash_point
    }

    /// Crash point if it may be revealed.
    pub fn revealed_crash_point(&self) -> Option<f64> {
        (self.phase == RoundPhase::Crashed).then_some(self.crash_point)
    }

    /// Seconds left in the countdown.
    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }

    /// Current multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Seconds since the round started running.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Wall-clock start (Unix ms): creation while waiting, launch once running.
    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    /// Participants ordered by player id.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look up one participant.
    pub fn participant(&self, player_id: &PlayerId) -> Option<&Participant> {
        self.participants.get(player_id)
    }

    /// Sum of accepted bets.
    pub fn total_bet(&self) -> f64 {
        self.total_bet
    }

    /// Sum of payouts.
    pub fn total_won(&self) -> f64 {
        self.total_won
    }

    /// Decrement the countdown by one second. Returns the remaining seconds.
    pub fn tick_countdown(&mut self) -> Result<u32, RoundError> {
        self.expect_phase(RoundPhase::Waiting, "tick countdown")?;
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        Ok(self.countdown_remaining)
    }

    /// `Waiting → Running`. Requires the countdown to have reached zero.
    pub fn start(&mut self, now: Instant, now_ms: i64) -> Result<(), RoundError> {
        self.expect_phase(RoundPhase::Waiting, "start")?;
        if self.countdown_remaining > 0 {
            return Err(RoundError::InvalidTransition {
                phase: self.phase,
                action: "start before countdown ends",
            });
        }

        self.phase = RoundPhase::Running;
        self.multiplier = 1.0;
        self.elapsed = 0.0;
        self.started_at = Some(now);
        self.start_time_ms = now_ms;
        Ok(())
    }

    /// Recompute the multiplier from wall-clock time since start.
    ///
    /// Elapsed time is derived from `now - started_at`, not accumulated, so a
    /// late or skipped tick never slows the curve down.
    pub fn advance(&mut self, now: Instant, growth_rate: f64) -> Result<Advance, RoundError> {
        self.expect_phase(RoundPhase::Running, "advance multiplier")?;
        let started_at = self.started_at.ok_or(RoundError::MissingStartTime)?;

        self.elapsed = now.saturating_duration_since(started_at).as_secs_f64();
        self.observe_multiplier(multiplier_at(self.elapsed, growth_rate))
    }

    /// Apply a newly computed multiplier value.
    ///
    /// The stored multiplier never decreases. Once the value reaches the crash
    /// point the round crashes and the multiplier is clamped to the crash point.
    pub fn observe_multiplier(&mut self, value: f64) -> Result<Advance, RoundError> {
        self.expect_phase(RoundPhase::Running, "observe multiplier")?;

        let value = if value.is_finite() { value } else { self.crash_point };
        let next = value.max(self.multiplier).max(1.0);
        let reached = next.min(self.crash_point);
        let auto_cashouts = self.run_auto_cashouts(reached);

        if next >= self.crash_point {
            self.multiplier = self.crash_point;
            self.phase = RoundPhase::Crashed;
            for participant in self.participants.values_mut() {
                if participant.status == ParticipantStatus::Active {
                    participant.status = ParticipantStatus::Lost;
                }
            }
            return Ok(Advance::Crashed {
                crash_point: self.crash_point,
                auto_cashouts,
            });
        }

        self.multiplier = next;
        Ok(Advance::Rising {
            multiplier: next,
            auto_cashouts,
        })
    }

    /// Record a participant. Only while `Waiting`.
    pub fn join(
        &mut self,
        player_id: PlayerId,
        bet_amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<(), IntentRejection> {
        if self.phase != RoundPhase::Waiting {
            return Err(RejectReason::NotWaiting.into());
        }
        if !bet_amount.is_finite() || bet_amount <= 0.0 {
            return Err(RejectReason::InvalidBet.into());
        }
        if let Some(target) = auto_cashout {
            if !target.is_finite() || target <= 1.0 {
                return Err(RejectReason::InvalidBet.into());
            }
        }
        if self.participants.contains_key(&player_id) {
            return Err(RejectReason::AlreadyJoined.into());
        }

        self.total_bet += bet_amount;
        self.participants.insert(player_id.clone(), Participant {
            player_id,
            bet_amount,
            auto_cashout,
            status: ParticipantStatus::Active,
        });
        Ok(())
    }

    /// Lock in the current multiplier for a participant. Only while `Running`.
    pub fn cashout(&mut self, player_id: &PlayerId) -> Result<CashoutReceipt, IntentRejection> {
        if self.phase != RoundPhase::Running {
            return Err(RejectReason::NotRunning.into());
        }
        let multiplier = self.multiplier;
        self.settle_cashout(player_id, multiplier)
    }

    fn settle_cashout(
        &mut self,
        player_id: &PlayerId,
        multiplier: f64,
    ) -> Result<CashoutReceipt, IntentRejection> {
        let participant = self.participants
            .get_mut(player_id)
            .ok_or(IntentRejection::from(RejectReason::NotParticipant))?;

        if participant.status != ParticipantStatus::Active {
            return Err(RejectReason::AlreadyCashedOut.into());
        }

        let payout = round_currency(participant.bet_amount * multiplier);
        participant.status = ParticipantStatus::CashedOut { multiplier, payout };
        self.total_won += payout;

        Ok(CashoutReceipt {
            round_id: self.id,
            player_id: player_id.clone(),
            bet_amount: participant.bet_amount,
            multiplier,
            payout,
        })
    }

    /// Cash out every active participant whose target is at or below `reached`
    /// and strictly below the crash point. Pays out at the target itself.
    fn run_auto_cashouts(&mut self, reached: f64) -> Vec<CashoutReceipt> {
        let crash_point = self.crash_point;
        let due: Vec<(PlayerId, f64)> = self.participants.values()
            .filter(|p| p.status == ParticipantStatus::Active)
            .filter_map(|p| p.auto_cashout.map(|target| (p.player_id.clone(), target)))
            .filter(|(_, target)| *target <= reached && *target < crash_point)
            .collect();

        due.into_iter()
            .filter_map(|(player_id, target)| self.settle_cashout(&player_id, target).ok())
            .collect()
    }

    fn expect_phase(&self, phase: RoundPhase, action: &'static str) -> Result<(), RoundError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(RoundError::InvalidTransition { phase: self.phase, action })
        }
    }
}
