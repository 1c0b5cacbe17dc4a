//! Startup wiring for the fairness engine
//!
//! Store, anchor and collaborators are chosen here exactly once; nothing
//! downstream branches on the environment again.

use crate::{
    anchor::{select_anchor, ChainAnchor, LedgerNode},
    config::{FairdeckConfig, StorageBackend},
    errors::{FairdeckError, FairdeckResult},
    maintenance::PoolMaintenance,
    metrics::FairnessMetrics,
    mode::DealCoordinator,
    pool::CommitmentPool,
    session::{RevealBundle, SessionFairnessManager},
    shuffle::FairnessVersion,
    store::{FairnessStore, MemoryStore, RocksStore},
    verifier::{VerificationReport, Verifier},
};
use std::sync::Arc;

/// Everything a service needs to run fairness for its games
pub struct FairnessServices {
    pub config: FairdeckConfig,
    pub store: Arc<dyn FairnessStore>,
    pub anchor: Arc<dyn ChainAnchor>,
    pub pool: Arc<CommitmentPool>,
    pub sessions: Arc<SessionFairnessManager>,
    pub coordinator: Arc<DealCoordinator>,
    pub metrics: Arc<FairnessMetrics>,
}

impl FairnessServices {
    /// Start periodic refill and sweeps for the pool
    pub fn spawn_maintenance(&self) -> Arc<PoolMaintenance> {
        PoolMaintenance::spawn(self.pool.clone(), self.sessions.clone())
    }

    /// Replay one hand of a reveal bundle, counting failed verifications
    pub fn verify_reveal(&self, bundle: &RevealBundle, nonce: u64, item_count: usize) -> VerificationReport {
        let report = Verifier::verify_reveal(bundle, nonce, item_count);
        if !report.valid {
            self.metrics.record_verification_failure();
        }
        report
    }

    /// Check a produced deal against its revealed seed, counting failures
    pub fn verify_outcome(
        &self,
        server_seed: &str,
        claimed_hash: &str,
        client_seed: &str,
        nonce: u64,
        version: FairnessVersion,
        produced: &[usize],
    ) -> FairdeckResult<VerificationReport> {
        let result = Verifier::verify_outcome(server_seed, claimed_hash, client_seed, nonce, version, produced);
        if matches!(result, Err(FairdeckError::HashMismatch { .. } | FairdeckError::OutcomeMismatch)) {
            self.metrics.record_verification_failure();
        }
        result
    }
}

pub struct FairnessFactory;

impl FairnessFactory {
    /// Validate the configuration and build the service graph
    ///
    /// `node` is the ledger RPC client, if the embedding service has one.
    pub fn build(config: FairdeckConfig, node: Option<Arc<dyn LedgerNode>>) -> FairdeckResult<FairnessServices> {
        config.validate()?;

        let store = Self::create_store(&config)?;
        let anchor = select_anchor(&config.anchor, node);
        let metrics = Arc::new(FairnessMetrics::new());

        let pool = Arc::new(CommitmentPool::new(
            store.clone(),
            anchor.clone(),
            config.pool.clone(),
            config.anchor.network,
            metrics.clone(),
        ));
        let sessions = Arc::new(SessionFairnessManager::new(
            store.clone(),
            pool.clone(),
            config.session.clone(),
            metrics.clone(),
        ));
        let coordinator = Arc::new(DealCoordinator::new(pool.clone()));

        tracing::info!(
            network = %config.anchor.network,
            anchor = anchor.name(),
            backend = ?config.storage.backend,
            "Fairness engine initialized"
        );

        Ok(FairnessServices {
            config,
            store,
            anchor,
            pool,
            sessions,
            coordinator,
            metrics,
        })
    }

    fn create_store(config: &FairdeckConfig) -> FairdeckResult<Arc<dyn FairnessStore>> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StorageBackend::RocksDb => {
                if !config.storage.clear_on_start {
                    tracing::info!(path = %config.storage.data_directory, "Preserving existing fairness data");
                }
                Ok(Arc::new(RocksStore::open_with_config(&config.storage)?))
            }
        }
    }
}
