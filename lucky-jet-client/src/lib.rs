//! Lucky Jet client
//!
//! Keeps a local view of the server's round in step with its broadcasts,
//! tracks the player's own bet and balance, and speaks the host page bridge.

pub mod messages;
pub mod view;
pub mod ledger;
pub mod bridge;
pub mod session;
pub mod client;

pub use client::{ClientConfig, ClientError, ClientEvent, ConnectionState, GameClient};
pub use ledger::{BalanceLedger, InMemoryLedger, LedgerError};
pub use messages::{ClientMessage, RoundPhase, ServerMessage};
pub use session::{ClientSession, SessionError, SessionEvent};
pub use view::RoundView;
