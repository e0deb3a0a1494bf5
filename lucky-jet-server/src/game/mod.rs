//! Game Logic Module
//!
//! Transport-free round logic. Time is passed in, never read from a timer,
//! so every transition can be driven from tests.
//!
//! ## Module Structure
//!
//! - `crash_point`: Weighted crash point draws
//! - `round`: Round state machine, participants, intents
//! - `history`: Bounded record of finished rounds
//! - `engine`: Single-writer owner of round and history

pub mod crash_point;
pub mod round;
pub mod history;
pub mod engine;

// Re-export key types
pub use crash_point::{generate_crash_point, MAX_CRASH_POINT, MIN_CRASH_POINT};
pub use round::{
    CashoutReceipt, IntentRejection, Participant, PlayerId, RejectReason, Round, RoundError,
    RoundId, RoundPhase,
};
pub use history::{HistoryEntry, RoundHistory};
pub use engine::{CountdownTick, CrashReport, MultiplierTick, RoundEngine};
