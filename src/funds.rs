//! Funds boundary consumed by game-start and draw handlers.
//!
//! The fairness engine never moves money; handlers reserve a stake before
//! allocating a nonce and credit or release it once the outcome is known.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Amounts are integer minor units
pub type Amount = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    pub session_id: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FundsError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    #[error("Unknown reservation {0}")]
    UnknownReservation(String),

    #[error("Funds ledger unavailable: {0}")]
    Unavailable(String),
}

/// Balance operations against a session, implemented outside this crate
#[async_trait]
pub trait FundsLedger: Send + Sync {
    /// Hold `amount` from the session balance
    async fn reserve(&self, session_id: &str, amount: Amount) -> Result<Reservation, FundsError>;

    /// Settle a reservation, paying out `payout` (zero on a loss)
    async fn credit(&self, reservation: &Reservation, payout: Amount) -> Result<(), FundsError>;

    /// Cancel a reservation and return the held amount
    async fn release(&self, reservation: &Reservation) -> Result<(), FundsError>;
}
