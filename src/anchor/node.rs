//! Anchoring through a real ledger node, failing closed on production.

use super::{AnchorProof, ChainAnchor, CommitmentResult, Network, NodeStatus, StubAnchor};
use crate::errors::AnchorError;
use async_trait::async_trait;
use std::sync::Arc;

/// RPC boundary to a ledger node, implemented by the embedding service
#[async_trait]
pub trait LedgerNode: Send + Sync {
    async fn status(&self, network: Network) -> Result<NodeStatus, AnchorError>;

    /// Submit a commitment transaction carrying `hash`
    async fn submit_commitment(&self, hash: &str, network: Network) -> Result<AnchorProof, AnchorError>;
}

/// Anchors through a [`LedgerNode`]
///
/// When the node is missing, disconnected or unsynced, non-production
/// networks may degrade to the stub; the production network never does.
pub struct NodeAnchor {
    node: Option<Arc<dyn LedgerNode>>,
    fallback: Option<StubAnchor>,
}

impl NodeAnchor {
    pub fn new(node: Option<Arc<dyn LedgerNode>>, fallback: Option<StubAnchor>) -> Self {
        Self { node, fallback }
    }

    async fn degrade(&self, hash: &str, network: Network, cause: AnchorError) -> CommitmentResult {
        match &self.fallback {
            Some(stub) if !network.is_production() => {
                tracing::warn!(%network, error = %cause, "Ledger node unavailable; anchoring to stub");
                stub.anchor(hash, network).await
            }
            _ => {
                tracing::warn!(%network, error = %cause, "Ledger node unavailable; refusing to anchor");
                CommitmentResult::failed(cause)
            }
        }
    }

    async fn readiness(&self, node: &dyn LedgerNode, network: Network) -> Result<(), AnchorError> {
        let status = node.status(network).await?;
        if !status.connected {
            return Err(AnchorError::NodeUnreachable(format!("{} node disconnected", network)));
        }
        if !status.synced {
            return Err(AnchorError::NodeNotSynced { height: status.height });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAnchor for NodeAnchor {
    async fn anchor(&self, hash: &str, network: Network) -> CommitmentResult {
        let Some(node) = &self.node else {
            return self.degrade(hash, network, AnchorError::NotConfigured { network }).await;
        };

        if let Err(cause) = self.readiness(node.as_ref(), network).await {
            return self.degrade(hash, network, cause).await;
        }

        match node.submit_commitment(hash, network).await {
            Ok(proof) => {
                tracing::debug!(%network, tx_ref = %proof.tx_ref, height = proof.block_height, "Commitment anchored");
                CommitmentResult::anchored(proof)
            }
            Err(cause @ AnchorError::NodeUnreachable(_)) => self.degrade(hash, network, cause).await,
            Err(cause) => {
                tracing::warn!(%network, error = %cause, "Ledger rejected commitment");
                CommitmentResult::failed(cause)
            }
        }
    }

    async fn node_status(&self, network: Network) -> NodeStatus {
        match &self.node {
            Some(node) => node.status(network).await.unwrap_or_else(|_| NodeStatus::disconnected()),
            None => NodeStatus::disconnected(),
        }
    }

    fn name(&self) -> &'static str {
        "node"
    }
}
