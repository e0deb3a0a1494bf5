//! # Lucky Jet Round Server
//!
//! Server-authoritative crash game: a hidden crash point is drawn per round,
//! the multiplier grows until it reaches it, and every client sees the same
//! outcome.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LUCKY JET SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/              - Round logic (no I/O)                   │
//! │  ├── crash_point.rs - Weighted crash point generator         │
//! │  ├── round.rs       - Waiting → Running → Crashed machine    │
//! │  ├── history.rs     - Last finished rounds, newest first     │
//! │  └── engine.rs      - Owns round + history, draws points     │
//! │                                                              │
//! │  network/           - Networking                             │
//! │  ├── protocol.rs    - JSON message envelopes                 │
//! │  ├── broadcast.rs   - Fan-out with full-state rate limit     │
//! │  └── server.rs      - WebSocket server + round orchestrator  │
//! │                                                              │
//! │  config.rs          - Server and round parameters            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Writer
//!
//! The orchestrator task is the only code that mutates round state. Timers
//! and client intents are serialized through its `select!` loop, so the
//! engine needs no locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{RoundConfig, ServerConfig};
pub use game::engine::RoundEngine;
pub use game::round::{PlayerId, Round, RoundId, RoundPhase};
pub use network::server::{GameServer, GameServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
