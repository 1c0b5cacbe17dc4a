//! Fairness engine counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-local counters, shared by the pool, sessions and verifier callers
pub struct FairnessMetrics {
    start_time: Instant,
    seeds_claimed: AtomicU64,
    claim_contention: AtomicU64,
    seeds_released: AtomicU64,
    seeds_minted: AtomicU64,
    anchor_failures: AtomicU64,
    claims_reclaimed: AtomicU64,
    seeds_expired: AtomicU64,
    nonces_allocated: AtomicU64,
    nonce_contention: AtomicU64,
    rotations: AtomicU64,
    orphans_revealed: AtomicU64,
    verification_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub seeds_claimed: u64,
    pub claim_contention: u64,
    pub seeds_released: u64,
    pub seeds_minted: u64,
    pub anchor_failures: u64,
    pub claims_reclaimed: u64,
    pub seeds_expired: u64,
    pub nonces_allocated: u64,
    pub nonce_contention: u64,
    pub rotations: u64,
    pub orphans_revealed: u64,
    pub verification_failures: u64,
}

impl FairnessMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            seeds_claimed: AtomicU64::new(0),
            claim_contention: AtomicU64::new(0),
            seeds_released: AtomicU64::new(0),
            seeds_minted: AtomicU64::new(0),
            anchor_failures: AtomicU64::new(0),
            claims_reclaimed: AtomicU64::new(0),
            seeds_expired: AtomicU64::new(0),
            nonces_allocated: AtomicU64::new(0),
            nonce_contention: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            orphans_revealed: AtomicU64::new(0),
            verification_failures: AtomicU64::new(0),
        }
    }

    pub fn record_claim(&self) {
        self.seeds_claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// A conditional update lost to another claimer
    pub fn record_claim_contention(&self) {
        self.claim_contention.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.seeds_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mints(&self, count: u64) {
        self.seeds_minted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_anchor_failure(&self) {
        self.anchor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaims(&self, count: u64) {
        self.claims_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expiries(&self, count: u64) {
        self.seeds_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_nonce(&self) {
        self.nonces_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nonce_contention(&self) {
        self.nonce_contention.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Rotated-off seeds revealed by the orphan sweep
    pub fn record_orphan_reveals(&self, count: u64) {
        self.orphans_revealed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_verification_failure(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            seeds_claimed: self.seeds_claimed.load(Ordering::Relaxed),
            claim_contention: self.claim_contention.load(Ordering::Relaxed),
            seeds_released: self.seeds_released.load(Ordering::Relaxed),
            seeds_minted: self.seeds_minted.load(Ordering::Relaxed),
            anchor_failures: self.anchor_failures.load(Ordering::Relaxed),
            claims_reclaimed: self.claims_reclaimed.load(Ordering::Relaxed),
            seeds_expired: self.seeds_expired.load(Ordering::Relaxed),
            nonces_allocated: self.nonces_allocated.load(Ordering::Relaxed),
            nonce_contention: self.nonce_contention.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            orphans_revealed: self.orphans_revealed.load(Ordering::Relaxed),
            verification_failures: self.verification_failures.load(Ordering::Relaxed),
        }
    }

    /// Render counters in Prometheus text exposition format
    pub fn to_prometheus_format(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("fairdeck_seeds_claimed_total", "Seeds claimed from the pool", s.seeds_claimed),
            ("fairdeck_claim_contention_total", "Claims that lost a conditional update", s.claim_contention),
            ("fairdeck_seeds_released_total", "Claimed seeds returned to the pool", s.seeds_released),
            ("fairdeck_seeds_minted_total", "Seeds forged and anchored", s.seeds_minted),
            ("fairdeck_anchor_failures_total", "Failed anchoring attempts", s.anchor_failures),
            ("fairdeck_claims_reclaimed_total", "Stale claims returned to the pool", s.claims_reclaimed),
            ("fairdeck_seeds_expired_total", "Available seeds expired past TTL", s.seeds_expired),
            ("fairdeck_nonces_allocated_total", "Session nonces allocated", s.nonces_allocated),
            ("fairdeck_nonce_contention_total", "Nonce allocations retried after contention", s.nonce_contention),
            ("fairdeck_rotations_total", "Session seed rotations", s.rotations),
            ("fairdeck_orphans_revealed_total", "Rotated-off seeds revealed by the orphan sweep", s.orphans_revealed),
            ("fairdeck_verification_failures_total", "Verifications that failed", s.verification_failures),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
            ));
        }
        output.push_str(&format!(
            "# HELP fairdeck_uptime_seconds Process uptime\n\
             # TYPE fairdeck_uptime_seconds gauge\n\
             fairdeck_uptime_seconds {}\n",
            s.uptime_seconds
        ));
        output
    }
}

impl Default for FairnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = FairnessMetrics::new();
        metrics.record_claim();
        metrics.record_claim();
        metrics.record_mints(5);
        metrics.record_nonce_contention();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.seeds_claimed, 2);
        assert_eq!(snapshot.seeds_minted, 5);
        assert_eq!(snapshot.nonce_contention, 1);
        assert_eq!(snapshot.rotations, 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = FairnessMetrics::new();
        metrics.record_rotation();
        let text = metrics.to_prometheus_format();
        assert!(text.contains("# TYPE fairdeck_rotations_total counter"));
        assert!(text.contains("fairdeck_rotations_total 1\n"));
        assert!(text.contains("fairdeck_uptime_seconds"));
    }
}
