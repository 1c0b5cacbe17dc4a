//! Error types for the fairness engine
//!
//! Contention on a conditional update is not represented here: store
//! primitives report it as `false` and callers retry against fresh state.

use crate::anchor::Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root error type for all fairness operations
#[derive(Debug, Error)]
pub enum FairdeckError {
    /// No available seed in the pool
    #[error("Commitment pool exhausted")]
    PoolExhausted,

    /// Client seed edit attempted after the seed stream was consumed
    #[error("Client seed is locked (next nonce is {next_nonce})")]
    ClientSeedLocked { next_nonce: u64 },

    /// A seed could not be obtained even after on-demand minting
    #[error("Fairness seed unavailable: {0}")]
    FairnessUnavailable(String),

    #[error("Anchor failure: {0}")]
    Anchor(#[from] AnchorError),

    /// Revealed seed does not hash to the published commitment
    #[error("Server seed hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Recomputed permutation does not match the produced outcome")]
    OutcomeMismatch,

    #[error("Seed {0} not found")]
    SeedNotFound(String),

    #[error("Seed {0} is not claimed")]
    SeedNotClaimed(String),

    #[error("No fairness state for session {0}")]
    SessionNotFound(String),

    #[error("Invalid client seed: {0}")]
    InvalidClientSeed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl FairdeckError {
    /// Whether the caller should retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FairdeckError::PoolExhausted
                | FairdeckError::FairnessUnavailable(_)
                | FairdeckError::Anchor(_)
        )
    }
}

/// Ledger anchoring errors
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AnchorError {
    #[error("No ledger node configured for {network}")]
    NotConfigured { network: Network },

    #[error("Ledger node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Ledger node not synced (height {height})")]
    NodeNotSynced { height: u64 },

    /// The ledger only accepts one unconfirmed anchor at a time
    #[error("An unconfirmed anchor is already pending")]
    PendingAnchorLimit,

    #[error("Anchor rejected: {0}")]
    Rejected(String),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for FairdeckError {
    fn from(e: rocksdb::Error) -> Self {
        FairdeckError::Storage(e.into())
    }
}

pub type FairdeckResult<T> = Result<T, FairdeckError>;
