//! Fairdeck - provably-fair commitment and session fairness engine
//!
//! Server seeds are forged and their hashes anchored on a ledger before any
//! game uses them. A pool buffers anchored seeds, sessions bind one seed and
//! hand out nonces to every game they play, and each outcome is a
//! deterministic shuffle of `server:client:nonce` that anyone can replay once
//! the seed is revealed.

pub mod anchor;
pub mod config;
pub mod errors;
pub mod factory;
pub mod funds;
pub mod maintenance;
pub mod metrics;
pub mod mode;
pub mod pool;
pub mod seed_forge;
pub mod session;
pub mod shuffle;
pub mod store;
pub mod verifier;

pub use anchor::{select_anchor, ChainAnchor, CommitmentResult, LedgerNode, Network, NodeStatus};
pub use config::{ConfigLoader, FairdeckConfig};
pub use errors::{FairdeckError, FairdeckResult};
pub use factory::{FairnessFactory, FairnessServices};
pub use mode::{DealCoordinator, FairnessMode};
pub use pool::{CommitmentPool, PoolStatus};
pub use session::{FairnessView, NonceAllocation, RevealBundle, SessionFairnessManager};
pub use shuffle::{FairnessVersion, ShuffleEngine};
pub use store::{FairnessStore, SeedRecord, SeedStatus, SessionFairnessState};
pub use verifier::{VerificationReport, Verifier};
