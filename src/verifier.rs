//! Independent re-verification of revealed outcomes.
//!
//! The hash check is the only trust check: a seed that does not hash to the
//! published commitment yields an invalid report and no permutation.

use crate::{
    errors::{FairdeckError, FairdeckResult},
    seed_forge,
    session::RevealBundle,
    shuffle::{FairnessVersion, ShuffleEngine},
};
use serde::{Deserialize, Serialize};

pub const HASH_MISMATCH_REASON: &str = "hash mismatch";

/// Result of replaying a revealed seed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub computed_hash: String,
    pub fairness_version: FairnessVersion,
    pub permutation: Vec<usize>,
}

pub struct Verifier;

impl Verifier {
    pub fn verify(
        server_seed: &str,
        claimed_hash: &str,
        client_seed: &str,
        nonce: u64,
        item_count: usize,
        version: FairnessVersion,
    ) -> VerificationReport {
        let computed_hash = seed_forge::hash(server_seed);

        // Surrounding whitespace and hex case are ignored; any other difference is a mismatch.
        if !computed_hash.eq_ignore_ascii_case(claimed_hash.trim()) {
            tracing::error!(
                claimed_hash,
                computed_hash = %computed_hash,
                "Revealed server seed does not match its commitment"
            );
            return VerificationReport {
                valid: false,
                reason: Some(HASH_MISMATCH_REASON.to_string()),
                computed_hash,
                fairness_version: version,
                permutation: Vec::new(),
            };
        }

        let combined = seed_forge::combine(server_seed, client_seed, nonce);
        VerificationReport {
            valid: true,
            reason: None,
            computed_hash,
            fairness_version: version,
            permutation: ShuffleEngine::shuffle(&combined, item_count, version),
        }
    }

    /// Verify and compare against the deal a game actually produced
    pub fn verify_outcome(
        server_seed: &str,
        claimed_hash: &str,
        client_seed: &str,
        nonce: u64,
        version: FairnessVersion,
        produced: &[usize],
    ) -> FairdeckResult<VerificationReport> {
        let report = Self::verify(server_seed, claimed_hash, client_seed, nonce, produced.len(), version);
        if !report.valid {
            return Err(FairdeckError::HashMismatch {
                expected: claimed_hash.to_string(),
                actual: report.computed_hash,
            });
        }
        if report.permutation != produced {
            tracing::error!(nonce, "Recomputed permutation differs from produced outcome");
            return Err(FairdeckError::OutcomeMismatch);
        }
        Ok(report)
    }

    /// Replay one hand from a rotation's reveal bundle
    pub fn verify_reveal(
        bundle: &RevealBundle,
        nonce: u64,
        item_count: usize,
    ) -> VerificationReport {
        Self::verify(
            &bundle.server_seed,
            &bundle.server_seed_hash,
            &bundle.client_seed,
            nonce,
            item_count,
            bundle.fairness_version,
        )
    }
}
