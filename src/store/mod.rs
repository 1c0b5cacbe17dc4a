//! Persisted fairness records and the conditional-update store interface
//!
//! Every mutation of a shared row is a conditional update guarded by the
//! row's current state. A `false` return means the guard no longer held
//! (another caller won the race), never a failure.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::{
    anchor::AnchorProof,
    errors::FairdeckResult,
    seed_forge::ForgedSeed,
    shuffle::FairnessVersion,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a commitment seed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeedStatus {
    Available,
    Claimed,
    Used,
    Revealed,
    Expired,
}

impl SeedStatus {
    /// Allowed forward edges (plus the claimed -> available release)
    pub fn can_transition_to(self, next: SeedStatus) -> bool {
        use SeedStatus::*;
        matches!(
            (self, next),
            (Available, Claimed)
                | (Available, Expired)
                | (Claimed, Claimed)
                | (Claimed, Available)
                | (Claimed, Used)
                | (Used, Revealed)
        )
    }
}

impl fmt::Display for SeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeedStatus::Available => "available",
            SeedStatus::Claimed => "claimed",
            SeedStatus::Used => "used",
            SeedStatus::Revealed => "revealed",
            SeedStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Anchor proof fields as exposed to players
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorMetadata {
    pub tx_ref: Option<String>,
    pub block_height: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Commitment record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRecord {
    pub id: String,
    pub seed: String,
    pub seed_hash: String,
    pub anchor_tx_ref: Option<String>,
    pub anchor_block_height: Option<u64>,
    pub anchor_timestamp: Option<DateTime<Utc>>,
    pub status: SeedStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    /// Consumer holding the seed: a game id, or `session:<id>`
    pub used_by_game_id: Option<String>,
    pub revealed_at: Option<DateTime<Utc>>,
}

impl SeedRecord {
    /// A fresh, anchored, unclaimed seed
    pub fn anchored(forged: ForgedSeed, proof: AnchorProof, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seed: forged.seed,
            seed_hash: forged.seed_hash,
            anchor_tx_ref: Some(proof.tx_ref),
            anchor_block_height: Some(proof.block_height),
            anchor_timestamp: Some(proof.block_timestamp),
            status: SeedStatus::Available,
            created_at: now,
            claimed_at: None,
            used_at: None,
            used_by_game_id: None,
            revealed_at: None,
        }
    }

    pub fn anchor(&self) -> AnchorMetadata {
        AnchorMetadata {
            tx_ref: self.anchor_tx_ref.clone(),
            block_height: self.anchor_block_height,
            timestamp: self.anchor_timestamp,
        }
    }

    pub fn is_held_by(&self, consumer: &str) -> bool {
        self.status == SeedStatus::Claimed && self.used_by_game_id.as_deref() == Some(consumer)
    }
}

/// Per-session seed binding and nonce counter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionFairnessState {
    pub session_id: String,
    pub seed_id: String,
    pub client_seed: String,
    pub next_nonce: u64,
    #[serde(default)]
    pub fairness_version: FairnessVersion,
    /// Guard column for conditional replacement, bumped on every write
    #[serde(default)]
    pub revision: u64,
    /// Seed this session rotated off and may not have revealed yet
    #[serde(default)]
    pub retired_seed_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionFairnessState {
    pub fn new(session_id: &str, seed_id: &str, client_seed: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            seed_id: seed_id.to_string(),
            client_seed,
            next_nonce: 0,
            fairness_version: FairnessVersion::FOR_NEW_COMMITMENTS,
            revision: 0,
            retired_seed_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next revision of this state, to be written with `replace_session`
    pub fn successor(&self, now: DateTime<Utc>) -> Self {
        Self {
            revision: self.revision + 1,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Rebind to a new seed with a fresh nonce stream, remembering the old seed
    pub fn rebound(&self, seed_id: &str, client_seed: String, now: DateTime<Utc>) -> Self {
        Self {
            retired_seed_id: Some(self.seed_id.clone()),
            seed_id: seed_id.to_string(),
            client_seed,
            next_nonce: 0,
            fairness_version: FairnessVersion::FOR_NEW_COMMITMENTS,
            ..self.successor(now)
        }
    }

    pub fn can_edit_client_seed(&self) -> bool {
        self.next_nonce == 0
    }
}

/// Which consumer reference a guarded update expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerMatch {
    Any,
    Unbound,
    Is(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsumerChange {
    Keep,
    Set(String),
    Clear,
}

/// A conditional seed update: guard plus effect
///
/// Only the constructors below exist, so only allowed edges can be written.
#[derive(Debug, Clone)]
pub struct SeedUpdate {
    expected: SeedStatus,
    consumer_match: ConsumerMatch,
    claimed_before: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    next: SeedStatus,
    consumer: ConsumerChange,
    at: DateTime<Utc>,
}

impl SeedUpdate {
    fn edge(expected: SeedStatus, next: SeedStatus, at: DateTime<Utc>) -> Self {
        debug_assert!(expected.can_transition_to(next));
        Self {
            expected,
            consumer_match: ConsumerMatch::Any,
            claimed_before: None,
            created_before: None,
            next,
            consumer: ConsumerChange::Keep,
            at,
        }
    }

    /// available -> claimed, optionally bound to a consumer in the same write
    pub fn claim(consumer: Option<&str>, at: DateTime<Utc>) -> Self {
        Self {
            consumer: match consumer {
                Some(c) => ConsumerChange::Set(c.to_string()),
                None => ConsumerChange::Clear,
            },
            ..Self::edge(SeedStatus::Available, SeedStatus::Claimed, at)
        }
    }

    /// Attach a consumer to an unbound claim
    pub fn bind(consumer: &str, at: DateTime<Utc>) -> Self {
        Self {
            consumer_match: ConsumerMatch::Unbound,
            consumer: ConsumerChange::Set(consumer.to_string()),
            ..Self::edge(SeedStatus::Claimed, SeedStatus::Claimed, at)
        }
    }

    /// claimed -> available, only while held by `holder`
    pub fn release(holder: ConsumerMatch, at: DateTime<Utc>) -> Self {
        Self {
            consumer_match: holder,
            consumer: ConsumerChange::Clear,
            ..Self::edge(SeedStatus::Claimed, SeedStatus::Available, at)
        }
    }

    /// claimed -> used, only by the consumer the claim is bound to
    pub fn mark_used(consumer: &str, at: DateTime<Utc>) -> Self {
        Self {
            consumer_match: ConsumerMatch::Is(consumer.to_string()),
            ..Self::edge(SeedStatus::Claimed, SeedStatus::Used, at)
        }
    }

    /// used -> revealed, only by the consumer that used it
    pub fn reveal(consumer: &str, at: DateTime<Utc>) -> Self {
        Self {
            consumer_match: ConsumerMatch::Is(consumer.to_string()),
            ..Self::edge(SeedStatus::Used, SeedStatus::Revealed, at)
        }
    }

    /// Unbound claims older than `cutoff` go back to available
    pub fn reclaim(cutoff: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            consumer_match: ConsumerMatch::Unbound,
            claimed_before: Some(cutoff),
            consumer: ConsumerChange::Clear,
            ..Self::edge(SeedStatus::Claimed, SeedStatus::Available, at)
        }
    }

    /// Available seeds created before `cutoff` expire
    pub fn expire(cutoff: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            created_before: Some(cutoff),
            ..Self::edge(SeedStatus::Available, SeedStatus::Expired, at)
        }
    }

    pub fn expected_status(&self) -> SeedStatus {
        self.expected
    }

    pub fn next_status(&self) -> SeedStatus {
        self.next
    }

    /// Whether the guard holds against the record's current state
    pub fn matches(&self, record: &SeedRecord) -> bool {
        if record.status != self.expected {
            return false;
        }

        let consumer_ok = match &self.consumer_match {
            ConsumerMatch::Any => true,
            ConsumerMatch::Unbound => record.used_by_game_id.is_none(),
            ConsumerMatch::Is(c) => record.used_by_game_id.as_deref() == Some(c.as_str()),
        };
        if !consumer_ok {
            return false;
        }

        if let Some(cutoff) = self.claimed_before {
            match record.claimed_at {
                Some(claimed_at) if claimed_at < cutoff => {}
                _ => return false,
            }
        }

        if let Some(cutoff) = self.created_before {
            if record.created_at >= cutoff {
                return false;
            }
        }

        true
    }

    /// Apply the effect; callers check [`SeedUpdate::matches`] first
    pub fn apply(&self, record: &mut SeedRecord) {
        record.status = self.next;

        match &self.consumer {
            ConsumerChange::Keep => {}
            ConsumerChange::Set(c) => record.used_by_game_id = Some(c.clone()),
            ConsumerChange::Clear => record.used_by_game_id = None,
        }

        match self.next {
            SeedStatus::Claimed if self.expected == SeedStatus::Available => {
                record.claimed_at = Some(self.at)
            }
            SeedStatus::Available => record.claimed_at = None,
            SeedStatus::Used => record.used_at = Some(self.at),
            SeedStatus::Revealed => record.revealed_at = Some(self.at),
            _ => {}
        }
    }
}

/// Seed counts per status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub available: u64,
    pub claimed: u64,
    pub used: u64,
    pub revealed: u64,
    pub expired: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: SeedStatus) {
        match status {
            SeedStatus::Available => self.available += 1,
            SeedStatus::Claimed => self.claimed += 1,
            SeedStatus::Used => self.used += 1,
            SeedStatus::Revealed => self.revealed += 1,
            SeedStatus::Expired => self.expired += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.available + self.claimed + self.used + self.revealed + self.expired
    }
}

/// Shared store of seeds and session states
///
/// Implementations must make `transition_seed`, `insert_session` and
/// `replace_session` atomic with respect to every other caller of the same
/// store, including other processes where the backend allows it.
pub trait FairnessStore: Send + Sync {
    fn insert_seed(&self, seed: &SeedRecord) -> FairdeckResult<()>;

    fn load_seed(&self, seed_id: &str) -> FairdeckResult<Option<SeedRecord>>;

    /// Up to `limit` available seeds, oldest first
    fn oldest_available(&self, limit: usize) -> FairdeckResult<Vec<SeedRecord>>;

    /// Conditional update; `Ok(false)` when the guard did not hold or the
    /// seed does not exist
    fn transition_seed(&self, seed_id: &str, update: &SeedUpdate) -> FairdeckResult<bool>;

    fn seeds_with_status(&self, status: SeedStatus) -> FairdeckResult<Vec<SeedRecord>>;

    fn status_counts(&self) -> FairdeckResult<StatusCounts>;

    fn load_session(&self, session_id: &str) -> FairdeckResult<Option<SessionFairnessState>>;

    /// Insert if no state exists for the session; `Ok(false)` otherwise
    fn insert_session(&self, state: &SessionFairnessState) -> FairdeckResult<bool>;

    /// Replace the session state if its revision is still `expected_revision`
    fn replace_session(&self, expected_revision: u64, state: &SessionFairnessState) -> FairdeckResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: SeedStatus, consumer: Option<&str>) -> SeedRecord {
        let now = Utc::now();
        SeedRecord {
            id: "seed-1".into(),
            seed: "00".repeat(32),
            seed_hash: "11".repeat(32),
            anchor_tx_ref: Some("tx".into()),
            anchor_block_height: Some(1),
            anchor_timestamp: Some(now),
            status,
            created_at: now - Duration::hours(2),
            claimed_at: (status == SeedStatus::Claimed).then(|| now - Duration::minutes(10)),
            used_at: None,
            used_by_game_id: consumer.map(str::to_string),
            revealed_at: None,
        }
    }

    #[test]
    fn test_allowed_edges() {
        use SeedStatus::*;
        assert!(Available.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Available));
        assert!(Used.can_transition_to(Revealed));
        assert!(!Claimed.can_transition_to(Revealed));
        assert!(!Used.can_transition_to(Available));
        assert!(!Revealed.can_transition_to(Claimed));
        assert!(!Expired.can_transition_to(Available));
        assert!(!Available.can_transition_to(Used));
    }

    #[test]
    fn test_claim_guard_and_effect() {
        let now = Utc::now();
        let mut rec = record(SeedStatus::Available, None);
        let update = SeedUpdate::claim(Some("session:abc"), now);

        assert!(update.matches(&rec));
        update.apply(&mut rec);
        assert_eq!(rec.status, SeedStatus::Claimed);
        assert_eq!(rec.claimed_at, Some(now));
        assert!(rec.is_held_by("session:abc"));

        // Second claim of the same row loses.
        assert!(!update.matches(&rec));
    }

    #[test]
    fn test_reclaim_skips_bound_and_fresh_claims() {
        let now = Utc::now();
        let bound = record(SeedStatus::Claimed, Some("session:x"));
        let unbound = record(SeedStatus::Claimed, None);

        assert!(!SeedUpdate::reclaim(now, now).matches(&bound));
        assert!(SeedUpdate::reclaim(now, now).matches(&unbound));
        assert!(!SeedUpdate::reclaim(now - Duration::hours(1), now).matches(&unbound));
    }

    #[test]
    fn test_mark_used_requires_binding() {
        let now = Utc::now();
        let rec = record(SeedStatus::Claimed, Some("game-1"));
        assert!(SeedUpdate::mark_used("game-1", now).matches(&rec));
        assert!(!SeedUpdate::mark_used("game-2", now).matches(&rec));
        assert!(!SeedUpdate::mark_used("game-2", now).matches(&record(SeedStatus::Claimed, None)));
    }

    #[test]
    fn test_reveal_only_from_used_by_holder() {
        let now = Utc::now();
        let live = record(SeedStatus::Claimed, Some("session:s1"));
        assert!(!SeedUpdate::reveal("session:s1", now).matches(&live));

        let mut used = record(SeedStatus::Used, Some("session:s1"));
        assert!(!SeedUpdate::reveal("session:s2", now).matches(&used));
        let update = SeedUpdate::reveal("session:s1", now);
        assert!(update.matches(&used));
        update.apply(&mut used);
        assert_eq!(used.status, SeedStatus::Revealed);
        assert_eq!(used.revealed_at, Some(now));
    }

    #[test]
    fn test_release_is_guarded_by_holder() {
        let now = Utc::now();
        let bound = record(SeedStatus::Claimed, Some("session:s1"));
        assert!(!SeedUpdate::release(ConsumerMatch::Unbound, now).matches(&bound));
        assert!(!SeedUpdate::release(ConsumerMatch::Is("session:s2".into()), now).matches(&bound));

        let mut rec = record(SeedStatus::Claimed, Some("game-1"));
        let update = SeedUpdate::release(ConsumerMatch::Is("game-1".into()), now);
        assert!(update.matches(&rec));
        update.apply(&mut rec);
        assert_eq!(rec.status, SeedStatus::Available);
        assert!(rec.claimed_at.is_none());
        assert!(rec.used_by_game_id.is_none());
    }

    #[test]
    fn test_expire_uses_created_cutoff() {
        let now = Utc::now();
        let rec = record(SeedStatus::Available, None);
        assert!(SeedUpdate::expire(now, now).matches(&rec));
        assert!(!SeedUpdate::expire(now - Duration::days(1), now).matches(&rec));
    }

    #[test]
    fn test_session_state_defaults_missing_version_to_legacy() {
        let json = r#"{
            "session_id": "s1",
            "seed_id": "seed-1",
            "client_seed": "abc",
            "next_nonce": 4,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let state: SessionFairnessState = serde_json::from_str(json).unwrap();
        assert_eq!(state.fairness_version, FairnessVersion::Legacy);
        assert_eq!(state.revision, 0);
        assert!(!state.can_edit_client_seed());
    }

    #[test]
    fn test_rebound_resets_nonce_and_bumps_revision() {
        let now = Utc::now();
        let mut state = SessionFairnessState::new("s1", "seed-1", "abc".into(), now);
        state.next_nonce = 7;
        let next = state.rebound("seed-2", "def".into(), now);
        assert_eq!(next.next_nonce, 0);
        assert_eq!(next.revision, 1);
        assert_eq!(next.seed_id, "seed-2");
        assert_eq!(next.fairness_version, FairnessVersion::Current);
        assert_eq!(next.retired_seed_id.as_deref(), Some("seed-1"));
    }
}
