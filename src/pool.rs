//! Commitment pool: a buffer of anchored, unclaimed seeds.
//!
//! Every claim, release and sweep is a conditional update against the shared
//! store, so several service instances can work one pool without
//! double-issuing a seed. The only in-process coordination is the refill
//! guard, and correctness does not depend on it.

use crate::{
    anchor::{ChainAnchor, Network},
    config::PoolConfig,
    errors::{AnchorError, FairdeckError, FairdeckResult},
    metrics::FairnessMetrics,
    seed_forge::ForgedSeed,
    store::{ConsumerMatch, FairnessStore, SeedRecord, SeedStatus, SeedUpdate},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Re-fetch rounds before a claimer gives up under heavy contention
const MAX_CLAIM_ROUNDS: usize = 32;

/// Pool health summary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub available: u64,
    pub claimed: u64,
    pub used: u64,
    pub revealed: u64,
    pub expired: u64,
    pub total: u64,
    pub healthy: bool,
}

/// Outcome of one refill cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefillReport {
    pub requested: u64,
    pub minted: u64,
    /// Another refill was already running in this process
    pub skipped: bool,
    /// Anchoring error that ended the batch early
    pub stopped_by: Option<AnchorError>,
}

/// Clears the refill flag when the refill ends, however it ends
struct RefillGuard<'a>(&'a AtomicBool);

impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CommitmentPool {
    store: Arc<dyn FairnessStore>,
    anchor: Arc<dyn ChainAnchor>,
    config: PoolConfig,
    network: Network,
    refilling: AtomicBool,
    metrics: Arc<FairnessMetrics>,
}

impl CommitmentPool {
    pub fn new(
        store: Arc<dyn FairnessStore>,
        anchor: Arc<dyn ChainAnchor>,
        config: PoolConfig,
        network: Network,
        metrics: Arc<FairnessMetrics>,
    ) -> Self {
        Self {
            store,
            anchor,
            config,
            network,
            refilling: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Claim the oldest available seed, unbound
    ///
    /// `Ok(None)` means the pool is empty (or every candidate was lost to
    /// other claimers); callers treat both the same way.
    pub fn claim_one(&self) -> FairdeckResult<Option<SeedRecord>> {
        self.claim(None)
    }

    /// Claim the oldest available seed and bind it to `consumer` in the same write
    pub fn claim_one_for(&self, consumer: &str) -> FairdeckResult<Option<SeedRecord>> {
        self.claim(Some(consumer))
    }

    fn claim(&self, consumer: Option<&str>) -> FairdeckResult<Option<SeedRecord>> {
        for _ in 0..MAX_CLAIM_ROUNDS {
            let candidates = self.store.oldest_available(self.config.claim_candidates)?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for mut seed in candidates {
                let update = SeedUpdate::claim(consumer, Utc::now());
                if self.store.transition_seed(&seed.id, &update)? {
                    update.apply(&mut seed);
                    self.metrics.record_claim();
                    tracing::debug!(seed_id = %seed.id, consumer = ?consumer, "Seed claimed");
                    return Ok(Some(seed));
                }
                self.metrics.record_claim_contention();
            }
        }

        tracing::warn!(rounds = MAX_CLAIM_ROUNDS, "Gave up claiming under contention");
        Ok(None)
    }

    /// Return a claim to the pool
    ///
    /// `false` if the seed is no longer claimed or is held by someone other
    /// than `holder`.
    pub fn release(&self, seed_id: &str, holder: ConsumerMatch) -> FairdeckResult<bool> {
        let released = self
            .store
            .transition_seed(seed_id, &SeedUpdate::release(holder, Utc::now()))?;
        if released {
            self.metrics.record_release();
            tracing::debug!(seed_id, "Seed released");
        }
        Ok(released)
    }

    /// Attach a consumer to an unbound claim
    pub fn bind(&self, seed_id: &str, consumer: &str) -> FairdeckResult<bool> {
        self.store.transition_seed(seed_id, &SeedUpdate::bind(consumer, Utc::now()))
    }

    /// claimed -> used by `consumer`
    pub fn mark_used(&self, seed_id: &str, consumer: &str) -> FairdeckResult<()> {
        if self.store.transition_seed(seed_id, &SeedUpdate::mark_used(consumer, Utc::now()))? {
            tracing::debug!(seed_id, consumer, "Seed marked used");
            return Ok(());
        }

        match self.store.load_seed(seed_id)? {
            None => Err(FairdeckError::SeedNotFound(seed_id.to_string())),
            Some(_) => Err(FairdeckError::SeedNotClaimed(seed_id.to_string())),
        }
    }

    /// used -> revealed by the consumer that used the seed
    pub fn reveal(&self, seed_id: &str, consumer: &str) -> FairdeckResult<Option<SeedRecord>> {
        if !self.store.transition_seed(seed_id, &SeedUpdate::reveal(consumer, Utc::now()))? {
            return Ok(None);
        }
        tracing::info!(seed_id, consumer, "Seed revealed");
        self.store.load_seed(seed_id)
    }

    /// Consume and reveal a seed held by `consumer`
    ///
    /// Safe to repeat: a seed this consumer already revealed is returned
    /// as is. `None` when the seed is not, and was not, held by `consumer`.
    pub fn retire(&self, seed_id: &str, consumer: &str) -> FairdeckResult<Option<SeedRecord>> {
        self.store
            .transition_seed(seed_id, &SeedUpdate::mark_used(consumer, Utc::now()))?;
        if let Some(seed) = self.reveal(seed_id, consumer)? {
            return Ok(Some(seed));
        }

        Ok(self.store.load_seed(seed_id)?.filter(|seed| {
            seed.status == SeedStatus::Revealed && seed.used_by_game_id.as_deref() == Some(consumer)
        }))
    }

    /// Forge, anchor and insert up to `target` seeds
    ///
    /// Stops at the first anchoring failure and leaves the rest for the next
    /// cycle. At most one refill runs per process; a concurrent call is skipped.
    pub async fn refill(&self, target: u64) -> FairdeckResult<RefillReport> {
        let mut report = RefillReport {
            requested: target,
            ..Default::default()
        };

        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refill already running; skipping");
            report.skipped = true;
            return Ok(report);
        }
        let _guard = RefillGuard(&self.refilling);

        while report.minted < target {
            match self.forge_and_anchor().await? {
                Ok(_) => report.minted += 1,
                Err(e) => {
                    tracing::warn!(network = %self.network, error = %e, minted = report.minted, "Refill stopped early");
                    report.stopped_by = Some(e);
                    break;
                }
            }
        }

        if report.minted > 0 {
            self.metrics.record_mints(report.minted);
            tracing::info!(minted = report.minted, requested = target, "Commitment pool refilled");
        }
        Ok(report)
    }

    /// Refill toward `target_size`, at most `refill_batch_size` per call
    pub async fn top_up(&self) -> FairdeckResult<RefillReport> {
        let available = self.store.status_counts()?.available;
        let deficit = self
            .config
            .target_size
            .saturating_sub(available)
            .min(self.config.refill_batch_size);

        if deficit == 0 {
            return Ok(RefillReport::default());
        }
        self.refill(deficit).await
    }

    /// Forge, anchor and insert one seed inline
    pub async fn mint_one(&self) -> FairdeckResult<SeedRecord> {
        let seed = self.forge_and_anchor().await??;
        self.metrics.record_mints(1);
        tracing::info!(seed_id = %seed.id, "Minted seed on demand");
        Ok(seed)
    }

    /// Outer error is storage, inner is anchoring
    async fn forge_and_anchor(&self) -> FairdeckResult<Result<SeedRecord, AnchorError>> {
        let forged = ForgedSeed::new();
        let proof = match self.anchor.anchor(&forged.seed_hash, self.network).await.into_proof() {
            Ok(proof) => proof,
            Err(e) => {
                self.metrics.record_anchor_failure();
                return Ok(Err(e));
            }
        };

        let record = SeedRecord::anchored(forged, proof, Utc::now());
        self.store.insert_seed(&record)?;
        Ok(Ok(record))
    }

    /// Start of the claim-timeout window ending at `now`
    pub fn claim_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        window_start(now, self.config.claim_timeout_secs)
    }

    /// Return unbound claims older than the claim timeout to the pool
    pub fn reclaim_stale(&self, now: DateTime<Utc>) -> FairdeckResult<usize> {
        let Some(cutoff) = self.claim_cutoff(now) else {
            return Ok(0);
        };
        let update = SeedUpdate::reclaim(cutoff, now);

        let mut reclaimed = 0;
        for seed in self.store.seeds_with_status(SeedStatus::Claimed)? {
            if update.matches(&seed) && self.store.transition_seed(&seed.id, &update)? {
                tracing::warn!(seed_id = %seed.id, claimed_at = ?seed.claimed_at, "Reclaimed stale claim");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            self.metrics.record_reclaims(reclaimed as u64);
        }
        Ok(reclaimed)
    }

    /// Expire available seeds older than the seed TTL
    pub fn expire_stale(&self, now: DateTime<Utc>) -> FairdeckResult<usize> {
        let Some(cutoff) = window_start(now, self.config.seed_ttl_secs) else {
            return Ok(0);
        };
        let update = SeedUpdate::expire(cutoff, now);

        let mut expired = 0;
        for seed in self.store.seeds_with_status(SeedStatus::Available)? {
            if update.matches(&seed) && self.store.transition_seed(&seed.id, &update)? {
                expired += 1;
            }
        }

        if expired > 0 {
            self.metrics.record_expiries(expired as u64);
            tracing::info!(expired, "Expired stale seeds");
        }
        Ok(expired)
    }

    pub fn status(&self) -> FairdeckResult<PoolStatus> {
        let counts = self.store.status_counts()?;
        Ok(PoolStatus {
            available: counts.available,
            claimed: counts.claimed,
            used: counts.used,
            revealed: counts.revealed,
            expired: counts.expired,
            total: counts.total(),
            healthy: counts.available >= self.config.minimum_threshold,
        })
    }
}

/// `now - secs`, or `None` when the window reaches past the representable range
fn window_start(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::try_seconds(i64::try_from(secs).ok()?)?;
    now.checked_sub_signed(window)
}
