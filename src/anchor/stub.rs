//! In-memory stand-in for the ledger, for development networks only.

use super::{AnchorProof, ChainAnchor, CommitmentResult, Network, NodeStatus};
use crate::errors::AnchorError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Records anchors in process memory and hands out synthetic proofs
///
/// Refuses the production network unconditionally.
pub struct StubAnchor {
    height: AtomicU64,
    anchors: DashMap<String, AnchorProof>,
}

impl StubAnchor {
    pub fn new() -> Self {
        Self {
            height: AtomicU64::new(0),
            anchors: DashMap::new(),
        }
    }

    /// Proof previously issued for `hash`, if any
    pub fn proof_for(&self, hash: &str) -> Option<AnchorProof> {
        self.anchors.get(hash).map(|p| p.clone())
    }

    pub fn anchored_count(&self) -> usize {
        self.anchors.len()
    }
}

impl Default for StubAnchor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAnchor for StubAnchor {
    async fn anchor(&self, hash: &str, network: Network) -> CommitmentResult {
        if network.is_production() {
            tracing::error!(%network, "Stub anchor refused a production commitment");
            return CommitmentResult::failed(AnchorError::NotConfigured { network });
        }

        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        let mut hasher = Sha256::new();
        hasher.update(hash.as_bytes());
        hasher.update(height.to_be_bytes());
        let proof = AnchorProof {
            tx_ref: format!("stub-{}", hex::encode(hasher.finalize())),
            block_height: height,
            block_timestamp: Utc::now(),
        };

        self.anchors.insert(hash.to_string(), proof.clone());
        CommitmentResult::anchored(proof)
    }

    async fn node_status(&self, _network: Network) -> NodeStatus {
        NodeStatus {
            connected: true,
            synced: true,
            height: self.height.load(Ordering::SeqCst),
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
