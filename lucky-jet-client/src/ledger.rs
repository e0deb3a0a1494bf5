//! Player balance
//!
//! The server never sees balances; each client debits its own ledger when a
//! join is accepted and credits it when a cashout is accepted.

use thiserror::Error;
use tracing::{debug, warn};

/// Starting balance for a fresh ledger.
pub const DEFAULT_BALANCE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid amount {0}")]
    InvalidAmount(f64),

    #[error("insufficient balance: {balance} < {amount}")]
    InsufficientBalance { balance: f64, amount: f64 },
}

pub trait BalanceLedger {
    fn balance(&self) -> f64;

    fn set_balance(&mut self, balance: f64);

    /// Credit `amount`. Returns the new balance.
    fn add_balance(&mut self, amount: f64) -> Result<f64, LedgerError>;

    /// Debit `amount`. Returns the new balance.
    fn subtract_balance(&mut self, amount: f64) -> Result<f64, LedgerError>;

    fn can_afford(&self, amount: f64) -> bool {
        self.balance() >= amount
    }

    fn place_bet(&mut self, amount: f64) -> Result<f64, LedgerError> {
        if !self.can_afford(amount) {
            return Err(LedgerError::InsufficientBalance { balance: self.balance(), amount });
        }
        self.subtract_balance(amount)
    }

    fn add_winnings(&mut self, amount: f64) -> Result<f64, LedgerError> {
        self.add_balance(amount)
    }
}

pub type ObserverId = u64;

type Observer = Box<dyn Fn(f64) + Send + Sync>;

/// Ledger held in memory, notifying observers on every change.
pub struct InMemoryLedger {
    balance: f64,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: ObserverId,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE)
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("balance", &self.balance)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl InMemoryLedger {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            observers: Vec::new(),
            next_observer: 1,
        }
    }

    /// Call `observer` with the new balance after every change.
    pub fn subscribe(&mut self, observer: impl Fn(f64) + Send + Sync + 'static) -> ObserverId {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    fn notify(&self) {
        for (_, observer) in &self.observers {
            observer(self.balance);
        }
    }
}

fn check_amount(amount: f64) -> Result<(), LedgerError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

impl BalanceLedger for InMemoryLedger {
    fn balance(&self) -> f64 {
        self.balance
    }

    fn set_balance(&mut self, balance: f64) {
        self.balance = balance;
        self.notify();
    }

    fn add_balance(&mut self, amount: f64) -> Result<f64, LedgerError> {
        if let Err(e) = check_amount(amount) {
            warn!("Refusing to credit {}", amount);
            return Err(e);
        }
        self.balance += amount;
        debug!("Balance +{} = {}", amount, self.balance);
        self.notify();
        Ok(self.balance)
    }

    fn subtract_balance(&mut self, amount: f64) -> Result<f64, LedgerError> {
        if let Err(e) = check_amount(amount) {
            warn!("Refusing to debit {}", amount);
            return Err(e);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance { balance: self.balance, amount });
        }
        self.balance -= amount;
        debug!("Balance -{} = {}", amount, self.balance);
        self.notify();
        Ok(self.balance)
    }
}
