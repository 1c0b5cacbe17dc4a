//! Ledger anchoring of seed commitments
//!
//! The anchor implementation is chosen once at startup by [`select_anchor`].
//! On the production network no path may fabricate a commitment.

pub mod node;
pub mod stub;

pub use node::{LedgerNode, NodeAnchor};
pub use stub::StubAnchor;

use crate::{config::AnchorConfig, errors::AnchorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Ledger network a commitment is anchored on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn is_production(&self) -> bool {
        matches!(self, Network::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Proof that a hash was recorded on the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorProof {
    pub tx_ref: String,
    pub block_height: u64,
    pub block_timestamp: DateTime<Utc>,
}

/// Outcome of an anchoring attempt, as reported by the collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitmentResult {
    pub success: bool,
    pub tx_ref: Option<String>,
    pub block_height: Option<u64>,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub error: Option<AnchorError>,
}

impl CommitmentResult {
    pub fn anchored(proof: AnchorProof) -> Self {
        Self {
            success: true,
            tx_ref: Some(proof.tx_ref),
            block_height: Some(proof.block_height),
            block_timestamp: Some(proof.block_timestamp),
            error: None,
        }
    }

    pub fn failed(error: AnchorError) -> Self {
        Self {
            success: false,
            tx_ref: None,
            block_height: None,
            block_timestamp: None,
            error: Some(error),
        }
    }

    pub fn into_proof(self) -> Result<AnchorProof, AnchorError> {
        match (self.success, self.tx_ref, self.block_height, self.block_timestamp) {
            (true, Some(tx_ref), Some(block_height), Some(block_timestamp)) => Ok(AnchorProof {
                tx_ref,
                block_height,
                block_timestamp,
            }),
            _ => Err(self
                .error
                .unwrap_or_else(|| AnchorError::Rejected("incomplete anchor proof".into()))),
        }
    }
}

/// Ledger node health as seen by the anchor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub connected: bool,
    pub synced: bool,
    pub height: u64,
}

impl NodeStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            synced: false,
            height: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.connected && self.synced
    }
}

/// External immutable-ledger collaborator
#[async_trait]
pub trait ChainAnchor: Send + Sync {
    /// Record `hash` on `network`; never returns success without a real proof
    /// on a production network
    async fn anchor(&self, hash: &str, network: Network) -> CommitmentResult;

    async fn node_status(&self, network: Network) -> NodeStatus;

    fn name(&self) -> &'static str;
}

/// Pick the anchor implementation for this process
///
/// Without a ledger node, non-production networks get the in-memory stub
/// when the configuration allows it; everything else goes through a
/// [`NodeAnchor`], which fails closed when the node is missing.
pub fn select_anchor(
    config: &AnchorConfig,
    node: Option<Arc<dyn LedgerNode>>,
) -> Arc<dyn ChainAnchor> {
    let stub_allowed = config.allow_stub_fallback && !config.network.is_production();

    match node {
        None if stub_allowed => {
            tracing::warn!(network = %config.network, "No ledger node configured; using in-memory stub anchor");
            Arc::new(StubAnchor::new())
        }
        node => {
            let fallback = stub_allowed.then(StubAnchor::new);
            Arc::new(NodeAnchor::new(node, fallback))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("MAINNET".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("testnet".parse::<Network>(), Ok(Network::Testnet));
        assert!("moonnet".parse::<Network>().is_err());
        assert!(Network::Mainnet.is_production());
        assert!(!Network::Regtest.is_production());
    }

    #[test]
    fn test_failed_result_has_no_proof() {
        let result = CommitmentResult::failed(AnchorError::PendingAnchorLimit);
        assert_eq!(result.into_proof(), Err(AnchorError::PendingAnchorLimit));
    }

    #[test]
    fn test_success_without_fields_is_rejected() {
        let result = CommitmentResult {
            success: true,
            tx_ref: None,
            block_height: Some(1),
            block_timestamp: None,
            error: None,
        };
        assert!(matches!(result.into_proof(), Err(AnchorError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_mainnet_without_node_fails_closed() {
        let config = AnchorConfig {
            network: Network::Mainnet,
            allow_stub_fallback: true,
        };
        let anchor = select_anchor(&config, None);
        assert_eq!(anchor.name(), "node");

        let result = anchor.anchor(&"ab".repeat(32), Network::Mainnet).await;
        assert!(!result.success);
        assert!(result.tx_ref.is_none());
    }

    #[tokio::test]
    async fn test_testnet_without_node_uses_stub() {
        let config = AnchorConfig {
            network: Network::Testnet,
            allow_stub_fallback: true,
        };
        let anchor = select_anchor(&config, None);
        assert_eq!(anchor.name(), "stub");
        assert!(anchor.anchor(&"cd".repeat(32), Network::Testnet).await.success);
    }

    #[tokio::test]
    async fn test_testnet_without_fallback_fails() {
        let config = AnchorConfig {
            network: Network::Testnet,
            allow_stub_fallback: false,
        };
        let anchor = select_anchor(&config, None);
        let result = anchor.anchor(&"ef".repeat(32), Network::Testnet).await;
        assert_eq!(
            result.error,
            Some(AnchorError::NotConfigured {
                network: Network::Testnet
            })
        );
    }
}
