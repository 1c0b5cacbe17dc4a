//! Session fairness: one committed seed per player session, shared by every
//! game the session plays, with a per-session nonce counter.
//!
//! A session is either unassigned (no state row) or active, bound to a seed
//! that is `claimed` by consumer `session:<id>`. All session writes go through
//! `replace_session` guarded by the state's revision, so nonce allocation,
//! client-seed edits and rotation are linearizable without process-local locks.

use crate::{
    config::SessionConfig,
    errors::{FairdeckError, FairdeckResult},
    metrics::FairnessMetrics,
    mode::FairnessMode,
    pool::CommitmentPool,
    seed_forge,
    shuffle::FairnessVersion,
    store::{AnchorMetadata, ConsumerMatch, FairnessStore, SeedRecord, SeedStatus, SessionFairnessState},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SESSION_CONSUMER_PREFIX: &str = "session:";

/// Consumer reference stamped on a seed held by a session
pub fn session_consumer(session_id: &str) -> String {
    format!("{}{}", SESSION_CONSUMER_PREFIX, session_id)
}

/// Everything a game engine needs to derive one outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceAllocation {
    pub seed_id: String,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub anchor: AnchorMetadata,
    pub fairness_version: FairnessVersion,
}

impl NonceAllocation {
    pub fn combined_seed(&self) -> String {
        seed_forge::combine(&self.server_seed, &self.client_seed, self.nonce)
    }
}

/// Disclosure of a retired seed, sufficient to replay every outcome it drove
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealBundle {
    pub seed_id: String,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    /// `None` when the seed never produced an outcome
    pub last_nonce_used: Option<u64>,
    pub anchor: AnchorMetadata,
    pub fairness_version: FairnessVersion,
}

#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub revealed: RevealBundle,
    pub state: SessionFairnessState,
}

/// Session-bound seeds settled by one orphan sweep
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanRecovery {
    /// Rotated-off seeds whose reveal never happened
    pub revealed: u64,
    /// Claims whose session write never happened
    pub released: u64,
}

/// Public verification payload for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FairnessView {
    pub mode: FairnessMode,
    pub server_seed_hash: String,
    pub commitment_tx_ref: Option<String>,
    pub commitment_block: Option<u64>,
    pub commitment_timestamp: Option<DateTime<Utc>>,
    pub client_seed: String,
    pub next_nonce: u64,
    pub can_edit_client_seed: bool,
    pub fairness_version: FairnessVersion,
}

pub struct SessionFairnessManager {
    store: Arc<dyn FairnessStore>,
    pool: Arc<CommitmentPool>,
    config: SessionConfig,
    metrics: Arc<FairnessMetrics>,
}

impl SessionFairnessManager {
    pub fn new(
        store: Arc<dyn FairnessStore>,
        pool: Arc<CommitmentPool>,
        config: SessionConfig,
        metrics: Arc<FairnessMetrics>,
    ) -> Self {
        Self {
            store,
            pool,
            config,
            metrics,
        }
    }

    /// Current state row, without activating the session
    pub fn current_state(&self, session_id: &str) -> FairdeckResult<Option<SessionFairnessState>> {
        self.store.load_session(session_id)
    }

    /// Make sure the session is bound to a seed it still holds
    ///
    /// Claims (and on an empty pool optionally mints) a fresh seed when the
    /// session has no state or its seed was retired elsewhere.
    pub async fn ensure_active(&self, session_id: &str) -> FairdeckResult<(SessionFairnessState, SeedRecord)> {
        let consumer = session_consumer(session_id);

        for _ in 0..self.config.max_cas_retries {
            let current = self.store.load_session(session_id)?;
            if let Some(state) = &current {
                if let Some(seed) = self.store.load_seed(&state.seed_id)? {
                    if seed.is_held_by(&consumer) {
                        return Ok((state.clone(), seed));
                    }
                }
                tracing::warn!(session_id, seed_id = %state.seed_id, "Session seed no longer held; rebinding");
            }

            if let Some(state) = &current {
                self.finish_retirement(&consumer, state)?;
            }

            let seed = self.claim_seed(session_id).await?;
            let now = Utc::now();
            let (written, state) = match current {
                None => {
                    let state = SessionFairnessState::new(session_id, &seed.id, seed_forge::generate_client_seed(), now);
                    (self.store.insert_session(&state)?, state)
                }
                Some(old) => {
                    let state = old.rebound(&seed.id, seed_forge::generate_client_seed(), now);
                    (self.store.replace_session(old.revision, &state)?, state)
                }
            };

            if written {
                tracing::info!(session_id, seed_id = %seed.id, "Session bound to seed");
                return Ok((state, seed));
            }

            // Another caller activated the session first.
            self.pool.release(&seed.id, ConsumerMatch::Is(consumer.clone()))?;
        }

        Err(FairdeckError::FairnessUnavailable(format!(
            "session {} could not be activated under contention",
            session_id
        )))
    }

    /// Claim a seed bound to the session, minting one inline if allowed
    async fn claim_seed(&self, session_id: &str) -> FairdeckResult<SeedRecord> {
        let consumer = session_consumer(session_id);
        if let Some(seed) = self.pool.claim_one_for(&consumer)? {
            return Ok(seed);
        }

        if !self.config.allow_on_demand_mint {
            return Err(FairdeckError::PoolExhausted);
        }

        tracing::warn!(session_id, "Commitment pool empty; minting on demand");
        match self.pool.mint_one().await {
            Ok(_) => {}
            Err(FairdeckError::Anchor(e)) => {
                return Err(FairdeckError::FairnessUnavailable(format!("on-demand mint failed: {}", e)));
            }
            Err(e) => return Err(e),
        }

        self.pool.claim_one_for(&consumer)?.ok_or_else(|| {
            FairdeckError::FairnessUnavailable("pool still empty after on-demand mint".to_string())
        })
    }

    /// Take the next nonce of the session's seed stream
    pub async fn allocate_nonce(&self, session_id: &str) -> FairdeckResult<NonceAllocation> {
        for _ in 0..self.config.max_cas_retries {
            let (state, seed) = self.ensure_active(session_id).await?;

            let mut next = state.successor(Utc::now());
            next.next_nonce = state.next_nonce + 1;

            if self.store.replace_session(state.revision, &next)? {
                self.metrics.record_nonce();
                tracing::debug!(session_id, seed_id = %seed.id, nonce = state.next_nonce, "Nonce allocated");
                return Ok(NonceAllocation {
                    anchor: seed.anchor(),
                    seed_id: seed.id,
                    server_seed: seed.seed,
                    server_seed_hash: seed.seed_hash,
                    client_seed: state.client_seed,
                    nonce: state.next_nonce,
                    fairness_version: state.fairness_version,
                });
            }

            self.metrics.record_nonce_contention();
            tokio::task::yield_now().await;
        }

        Err(FairdeckError::FairnessUnavailable(format!(
            "nonce allocation for session {} exceeded {} attempts",
            session_id, self.config.max_cas_retries
        )))
    }

    /// Replace the client seed; only allowed before the first nonce is taken
    pub async fn set_client_seed(&self, session_id: &str, client_seed: &str) -> FairdeckResult<SessionFairnessState> {
        seed_forge::validate_client_seed(client_seed)?;

        for _ in 0..self.config.max_cas_retries {
            let (state, _) = self.ensure_active(session_id).await?;
            if !state.can_edit_client_seed() {
                return Err(FairdeckError::ClientSeedLocked {
                    next_nonce: state.next_nonce,
                });
            }

            let mut next = state.successor(Utc::now());
            next.client_seed = client_seed.to_string();
            if self.store.replace_session(state.revision, &next)? {
                tracing::debug!(session_id, "Client seed updated");
                return Ok(next);
            }
            tokio::task::yield_now().await;
        }

        Err(FairdeckError::FairnessUnavailable(format!(
            "client seed update for session {} lost every attempt",
            session_id
        )))
    }

    /// Retire the session's seed and bind a fresh one
    ///
    /// The session row is switched first; the old seed is revealed only once
    /// no allocation can be made against it any more.
    pub async fn rotate(&self, session_id: &str, next_client_seed: Option<&str>) -> FairdeckResult<RotationOutcome> {
        if let Some(client_seed) = next_client_seed {
            seed_forge::validate_client_seed(client_seed)?;
        }
        let consumer = session_consumer(session_id);

        for _ in 0..self.config.max_cas_retries {
            let (state, seed) = self.ensure_active(session_id).await?;
            self.finish_retirement(&consumer, &state)?;

            let replacement = match self.claim_seed(session_id).await {
                Ok(seed) => seed,
                Err(FairdeckError::PoolExhausted) => {
                    return Err(FairdeckError::FairnessUnavailable(
                        "no replacement seed available for rotation".to_string(),
                    ));
                }
                Err(e) => return Err(e),
            };

            let client_seed = next_client_seed
                .map(str::to_string)
                .unwrap_or_else(|| state.client_seed.clone());
            let next = state.rebound(&replacement.id, client_seed, Utc::now());

            if !self.store.replace_session(state.revision, &next)? {
                self.pool.release(&replacement.id, ConsumerMatch::Is(consumer.clone()))?;
                tokio::task::yield_now().await;
                continue;
            }

            let Some(revealed) = self.pool.retire(&seed.id, &consumer)? else {
                tracing::error!(session_id, seed_id = %seed.id, "Rotated seed left the session before its reveal");
                return Err(FairdeckError::SeedNotClaimed(seed.id));
            };

            self.metrics.record_rotation();
            tracing::info!(
                session_id,
                revealed_seed = %revealed.id,
                next_seed = %replacement.id,
                last_nonce = ?state.next_nonce.checked_sub(1),
                "Session seed rotated"
            );

            return Ok(RotationOutcome {
                revealed: RevealBundle {
                    anchor: revealed.anchor(),
                    seed_id: revealed.id,
                    server_seed: revealed.seed,
                    server_seed_hash: revealed.seed_hash,
                    client_seed: state.client_seed,
                    last_nonce_used: state.next_nonce.checked_sub(1),
                    fairness_version: state.fairness_version,
                },
                state: next,
            });
        }

        Err(FairdeckError::FairnessUnavailable(format!(
            "rotation for session {} lost every attempt",
            session_id
        )))
    }

    /// Reveal the seed a previous rebind left behind, if it is still ours
    fn finish_retirement(&self, consumer: &str, state: &SessionFairnessState) -> FairdeckResult<()> {
        if let Some(seed_id) = &state.retired_seed_id {
            if self.pool.retire(seed_id, consumer)?.is_none() {
                tracing::debug!(seed_id = %seed_id, consumer, "Retired seed no longer held by session");
            }
        }
        Ok(())
    }

    /// Settle session-bound seeds abandoned by a crash
    ///
    /// Looks at seeds bound to a session, claimed before the claim timeout,
    /// that the session row no longer points at. A seed the session has
    /// rotated off (or started consuming) is revealed. A claim the session
    /// never recorded is released.
    pub fn recover_orphaned_seeds(&self, now: DateTime<Utc>) -> FairdeckResult<OrphanRecovery> {
        let mut recovery = OrphanRecovery::default();
        let Some(cutoff) = self.pool.claim_cutoff(now) else {
            return Ok(recovery);
        };

        let mut candidates = self.store.seeds_with_status(SeedStatus::Claimed)?;
        candidates.extend(self.store.seeds_with_status(SeedStatus::Used)?);

        for seed in candidates {
            let Some(consumer) = seed.used_by_game_id.as_deref() else {
                continue;
            };
            let Some(session_id) = consumer.strip_prefix(SESSION_CONSUMER_PREFIX) else {
                continue;
            };
            if !seed.claimed_at.is_some_and(|at| at < cutoff) {
                continue;
            }

            let state = self.store.load_session(session_id)?;
            if state.as_ref().is_some_and(|s| s.seed_id == seed.id) {
                continue;
            }

            let rotated_off = seed.status == SeedStatus::Used
                || state
                    .as_ref()
                    .is_some_and(|s| s.retired_seed_id.as_deref() == Some(seed.id.as_str()));

            if rotated_off {
                if self.pool.retire(&seed.id, consumer)?.is_some() {
                    tracing::warn!(session_id, seed_id = %seed.id, "Revealed orphaned rotated seed");
                    recovery.revealed += 1;
                }
            } else if self.pool.release(&seed.id, ConsumerMatch::Is(consumer.to_string()))? {
                tracing::warn!(session_id, seed_id = %seed.id, "Released orphaned session claim");
                recovery.released += 1;
            }
        }

        if recovery.revealed > 0 {
            self.metrics.record_orphan_reveals(recovery.revealed);
        }
        if recovery.released > 0 {
            self.metrics.record_reclaims(recovery.released);
        }
        Ok(recovery)
    }

    /// Public fairness payload for the session's active seed
    pub async fn describe(&self, session_id: &str) -> FairdeckResult<FairnessView> {
        let (state, seed) = self.ensure_active(session_id).await?;
        Ok(FairnessView {
            mode: FairnessMode::SessionNonce,
            server_seed_hash: seed.seed_hash,
            commitment_tx_ref: seed.anchor_tx_ref,
            commitment_block: seed.anchor_block_height,
            commitment_timestamp: seed.anchor_timestamp,
            can_edit_client_seed: state.can_edit_client_seed(),
            client_seed: state.client_seed,
            next_nonce: state.next_nonce,
            fairness_version: state.fairness_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        anchor::{Network, StubAnchor},
        config::PoolConfig,
        store::MemoryStore,
    };
    use chrono::Duration;

    fn manager(allow_on_demand_mint: bool) -> (SessionFairnessManager, Arc<CommitmentPool>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(FairnessMetrics::new());
        let pool = Arc::new(CommitmentPool::new(
            store.clone(),
            Arc::new(StubAnchor::new()),
            PoolConfig::default(),
            Network::Regtest,
            metrics.clone(),
        ));
        let config = SessionConfig {
            allow_on_demand_mint,
            ..Default::default()
        };
        let sessions = SessionFairnessManager::new(store.clone(), pool.clone(), config, metrics);
        (sessions, pool, store)
    }

    #[tokio::test]
    async fn test_nonces_increase_from_zero() {
        let (sessions, pool, _) = manager(false);
        pool.refill(2).await.unwrap();

        let first = sessions.allocate_nonce("s1").await.unwrap();
        let second = sessions.allocate_nonce("s1").await.unwrap();
        assert_eq!(first.nonce, 0);
        assert_eq!(second.nonce, 1);
        assert_eq!(first.seed_id, second.seed_id);
        assert_eq!(first.fairness_version, FairnessVersion::Current);
        assert_eq!(first.server_seed_hash, seed_forge::hash(&first.server_seed));
        assert_eq!(
            first.combined_seed(),
            format!("{}:{}:0", first.server_seed, first.client_seed)
        );
        assert_eq!(pool.status().unwrap().claimed, 1);
    }

    #[tokio::test]
    async fn test_empty_pool_without_minting_is_exhausted() {
        let (sessions, _, _) = manager(false);
        let err = sessions.allocate_nonce("s1").await.unwrap_err();
        assert!(matches!(err, FairdeckError::PoolExhausted));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_pool_mints_on_demand() {
        let (sessions, pool, _) = manager(true);
        let allocation = sessions.allocate_nonce("s1").await.unwrap();
        assert_eq!(allocation.nonce, 0);
        assert!(allocation.anchor.tx_ref.is_some());
        assert_eq!(pool.status().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_client_seed_locks_after_first_nonce() {
        let (sessions, pool, _) = manager(false);
        pool.refill(1).await.unwrap();

        let state = sessions.set_client_seed("s1", "lucky-7").await.unwrap();
        assert_eq!(state.client_seed, "lucky-7");
        assert_eq!(sessions.allocate_nonce("s1").await.unwrap().client_seed, "lucky-7");

        let err = sessions.set_client_seed("s1", "lucky-8").await.unwrap_err();
        assert!(matches!(err, FairdeckError::ClientSeedLocked { next_nonce: 1 }));
        assert!(matches!(
            sessions.set_client_seed("s1", "has space").await,
            Err(FairdeckError::InvalidClientSeed(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_reveals_and_resets() {
        let (sessions, pool, store) = manager(false);
        pool.refill(2).await.unwrap();

        let a = sessions.allocate_nonce("s1").await.unwrap();
        sessions.allocate_nonce("s1").await.unwrap();

        let outcome = sessions.rotate("s1", Some("fresh")).await.unwrap();
        assert_eq!(outcome.revealed.seed_id, a.seed_id);
        assert_eq!(outcome.revealed.server_seed, a.server_seed);
        assert_eq!(outcome.revealed.client_seed, a.client_seed);
        assert_eq!(outcome.revealed.last_nonce_used, Some(1));
        let retired = store.load_seed(&a.seed_id).unwrap().unwrap();
        assert_eq!(retired.status, SeedStatus::Revealed);
        assert!(retired.used_at.is_some());
        assert!(retired.used_at <= retired.revealed_at);
        assert_eq!(outcome.state.retired_seed_id.as_deref(), Some(a.seed_id.as_str()));

        assert_eq!(outcome.state.next_nonce, 0);
        assert_eq!(outcome.state.client_seed, "fresh");
        assert_ne!(outcome.state.seed_id, a.seed_id);

        let next = sessions.allocate_nonce("s1").await.unwrap();
        assert_eq!(next.nonce, 0);
        assert_eq!(next.seed_id, outcome.state.seed_id);
    }

    #[tokio::test]
    async fn test_rotate_without_replacement_fails() {
        let (sessions, pool, store) = manager(false);
        pool.refill(1).await.unwrap();
        let a = sessions.allocate_nonce("s1").await.unwrap();

        let err = sessions.rotate("s1", None).await.unwrap_err();
        assert!(matches!(err, FairdeckError::FairnessUnavailable(_)));
        // The active seed stays hidden and bound.
        assert_eq!(store.load_seed(&a.seed_id).unwrap().unwrap().status, SeedStatus::Claimed);
        assert_eq!(sessions.current_state("s1").unwrap().unwrap().next_nonce, 1);
    }

    #[tokio::test]
    async fn test_describe_reports_commitment() {
        let (sessions, pool, _) = manager(false);
        pool.refill(1).await.unwrap();

        let view = sessions.describe("s1").await.unwrap();
        assert_eq!(view.mode, FairnessMode::SessionNonce);
        assert_eq!(view.next_nonce, 0);
        assert!(view.can_edit_client_seed);
        assert!(view.commitment_tx_ref.is_some());

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("serverSeedHash").is_some());
        assert!(json.get("server_seed").is_none());
    }

    #[tokio::test]
    async fn test_rebinds_when_seed_revealed_elsewhere() {
        let (sessions, pool, _) = manager(false);
        pool.refill(2).await.unwrap();

        let a = sessions.allocate_nonce("s1").await.unwrap();
        pool.retire(&a.seed_id, "session:s1").unwrap().unwrap();

        let b = sessions.allocate_nonce("s1").await.unwrap();
        assert_ne!(b.seed_id, a.seed_id);
        assert_eq!(b.nonce, 0);
    }

    #[tokio::test]
    async fn test_live_session_seed_cannot_be_disclosed_or_freed() {
        let (sessions, pool, store) = manager(false);
        pool.refill(2).await.unwrap();

        let a = sessions.allocate_nonce("s1").await.unwrap();
        assert!(pool.reveal(&a.seed_id, "session:s1").unwrap().is_none());
        assert!(pool.mark_used(&a.seed_id, "game-1").is_err());
        assert!(!pool.release(&a.seed_id, ConsumerMatch::Unbound).unwrap());

        let b = sessions.allocate_nonce("s1").await.unwrap();
        assert_eq!(b.seed_id, a.seed_id);
        assert_eq!(b.nonce, 1);
        assert_eq!(store.load_seed(&a.seed_id).unwrap().unwrap().status, SeedStatus::Claimed);
    }

    #[tokio::test]
    async fn test_orphan_sweep_reveals_rotated_and_releases_unrecorded() {
        let (sessions, pool, store) = manager(false);
        pool.refill(4).await.unwrap();

        let a = sessions.allocate_nonce("s1").await.unwrap();

        // Rotation that died after switching the session row.
        let state = sessions.current_state("s1").unwrap().unwrap();
        let b = pool.claim_one_for("session:s1").unwrap().unwrap();
        assert!(store
            .replace_session(state.revision, &state.rebound(&b.id, "next".into(), Utc::now()))
            .unwrap());

        // Activation that died before writing the session row.
        let c = pool.claim_one_for("session:s2").unwrap().unwrap();

        assert_eq!(sessions.recover_orphaned_seeds(Utc::now()).unwrap(), OrphanRecovery::default());

        let later = Utc::now() + Duration::seconds(pool.config().claim_timeout_secs as i64 + 1);
        let recovery = sessions.recover_orphaned_seeds(later).unwrap();
        assert_eq!(recovery, OrphanRecovery { revealed: 1, released: 1 });

        assert_eq!(store.load_seed(&a.seed_id).unwrap().unwrap().status, SeedStatus::Revealed);
        assert_eq!(store.load_seed(&b.id).unwrap().unwrap().status, SeedStatus::Claimed);
        assert_eq!(store.load_seed(&c.id).unwrap().unwrap().status, SeedStatus::Available);
        assert_eq!(sessions.allocate_nonce("s1").await.unwrap().seed_id, b.id);
    }

    #[tokio::test]
    async fn test_rotation_finishes_an_interrupted_reveal() {
        let (sessions, pool, store) = manager(false);
        pool.refill(3).await.unwrap();

        let a = sessions.allocate_nonce("s1").await.unwrap();
        let state = sessions.current_state("s1").unwrap().unwrap();
        let b = pool.claim_one_for("session:s1").unwrap().unwrap();
        assert!(store
            .replace_session(state.revision, &state.rebound(&b.id, "next".into(), Utc::now()))
            .unwrap());

        let outcome = sessions.rotate("s1", None).await.unwrap();
        assert_eq!(outcome.revealed.seed_id, b.id);
        assert_eq!(store.load_seed(&a.seed_id).unwrap().unwrap().status, SeedStatus::Revealed);
    }
}
