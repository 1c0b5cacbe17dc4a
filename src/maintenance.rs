//! Background pool maintenance: periodic refill, stale-claim reclamation,
//! orphaned session seed recovery and expiry.
//!
//! Runs off the request path. Each cycle is a short, independent pass; a
//! failed cycle is logged and retried on the next tick.

use crate::{pool::CommitmentPool, session::SessionFairnessManager};
use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, time::MissedTickBehavior};

pub struct PoolMaintenance {
    pool: Arc<CommitmentPool>,
    sessions: Arc<SessionFairnessManager>,
    refill_interval: Duration,
    sweep_interval: Duration,
    running: Arc<AtomicBool>,
    shutdown: Notify,
}

impl PoolMaintenance {
    pub fn spawn(pool: Arc<CommitmentPool>, sessions: Arc<SessionFairnessManager>) -> Arc<Self> {
        let config = pool.config();
        let worker = Arc::new(Self {
            refill_interval: Duration::from_millis(config.refill_interval_ms),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms),
            pool,
            sessions,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Notify::new(),
        });

        worker.clone().spawn_task();
        worker
    }

    fn spawn_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut refill_tick = tokio::time::interval(self.refill_interval);
            refill_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sweep_tick = tokio::time::interval(self.sweep_interval);
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                refill_ms = self.refill_interval.as_millis() as u64,
                sweep_ms = self.sweep_interval.as_millis() as u64,
                "Pool maintenance started"
            );

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    _ = refill_tick.tick() => self.refill_once().await,
                    _ = sweep_tick.tick() => self.sweep_once(),
                }
            }

            tracing::info!("Pool maintenance stopped");
        });
    }

    async fn refill_once(&self) {
        match self.pool.top_up().await {
            Ok(report) if report.stopped_by.is_some() => {
                tracing::debug!(minted = report.minted, "Refill cycle ended early; remainder deferred");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Pool refill cycle failed: {}", e),
        }
    }

    fn sweep_once(&self) {
        let now = Utc::now();
        if let Err(e) = self.pool.reclaim_stale(now) {
            tracing::warn!("Stale claim sweep failed: {}", e);
        }
        if let Err(e) = self.sessions.recover_orphaned_seeds(now) {
            tracing::warn!("Orphaned session seed sweep failed: {}", e);
        }
        if let Err(e) = self.pool.expire_stale(now) {
            tracing::warn!("Expiry sweep failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        anchor::{Network, StubAnchor},
        config::FairdeckConfig,
        metrics::FairnessMetrics,
        store::{FairnessStore, MemoryStore, SeedStatus},
    };

    #[tokio::test]
    async fn test_worker_fills_pool_and_stops() {
        let config = FairdeckConfig::testing();
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(FairnessMetrics::new());
        let pool = Arc::new(CommitmentPool::new(
            store.clone(),
            Arc::new(StubAnchor::new()),
            config.pool.clone(),
            Network::Regtest,
            metrics.clone(),
        ));
        let sessions = Arc::new(SessionFairnessManager::new(
            store.clone(),
            pool.clone(),
            config.session.clone(),
            metrics,
        ));

        // A claim whose session row was never written.
        pool.refill(1).await.unwrap();
        let orphan = pool.claim_one_for("session:gone").unwrap().unwrap();

        let worker = PoolMaintenance::spawn(pool.clone(), sessions);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        worker.stop();
        assert!(!worker.is_running());

        // Topped up to target, plus the released orphan.
        assert_eq!(pool.status().unwrap().available, config.pool.target_size + 1);
        assert_eq!(store.load_seed(&orphan.id).unwrap().unwrap().status, SeedStatus::Available);
    }
}
