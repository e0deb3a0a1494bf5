//! Network Layer
//!
//! WebSocket server for real-time round broadcasts.
//! Round state is only mutated by the orchestrator in `server`; everything
//! here either transports it or projects it.

pub mod protocol;
pub mod broadcast;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, GameStateSnapshot, JoinRequest, CashoutRequest, IntentKind,
};
pub use broadcast::{BroadcastChannel, ClientRegistry, ConnectionId, FullBroadcast};
pub use server::{GameServer, GameServerError};
