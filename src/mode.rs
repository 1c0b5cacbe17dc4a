//! Fairness modes and the per-game commitment flow.
//!
//! A session resolves its [`FairnessMode`] once and threads it through every
//! later call. `SessionNonce` goes through the session manager;
//! `LegacyPerGame` commits one seed per game through [`DealCoordinator`].

use crate::{
    errors::{FairdeckError, FairdeckResult},
    pool::CommitmentPool,
    seed_forge,
    session::{FairnessView, RevealBundle},
    shuffle::{FairnessVersion, ShuffleEngine},
    store::{AnchorMetadata, ConsumerMatch, SeedRecord},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FairnessMode {
    /// One committed seed per game, revealed at settlement
    LegacyPerGame,
    /// One seed per session with a shared nonce counter
    #[default]
    SessionNonce,
}

impl FairnessMode {
    /// Resolve a stored mode tag; unknown or missing tags select `SessionNonce`
    pub fn resolve(tag: Option<&str>) -> Self {
        tag.and_then(|t| t.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for FairnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FairnessMode::LegacyPerGame => write!(f, "legacy_per_game"),
            FairnessMode::SessionNonce => write!(f, "session_nonce"),
        }
    }
}

impl FromStr for FairnessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy_per_game" | "legacy" | "per_game" => Ok(FairnessMode::LegacyPerGame),
            "session_nonce" | "session" => Ok(FairnessMode::SessionNonce),
            other => Err(format!("unknown fairness mode '{}'", other)),
        }
    }
}

/// A seed committed to one game before the deal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DealCommitment {
    pub seed_id: String,
    #[serde(skip)]
    pub server_seed: String,
    pub server_seed_hash: String,
    pub anchor: AnchorMetadata,
    pub fairness_version: FairnessVersion,
}

impl From<SeedRecord> for DealCommitment {
    fn from(seed: SeedRecord) -> Self {
        Self {
            anchor: seed.anchor(),
            seed_id: seed.id,
            server_seed: seed.seed,
            server_seed_hash: seed.seed_hash,
            fairness_version: FairnessVersion::FOR_NEW_COMMITMENTS,
        }
    }
}

/// What a settled game recorded about its deal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettledGame {
    pub game_id: String,
    pub seed_id: String,
    pub client_seed: String,
    pub nonce: u64,
    pub fairness_version: FairnessVersion,
}

/// Per-game commitment flow over the shared pool
///
/// `commit_deal` claims unbound, `confirm_game` binds the claim to the game,
/// `abandon` returns it, `settle` consumes it and `reveal_game` discloses it.
pub struct DealCoordinator {
    pool: Arc<CommitmentPool>,
}

impl DealCoordinator {
    pub fn new(pool: Arc<CommitmentPool>) -> Self {
        Self { pool }
    }

    pub fn commit_deal(&self) -> FairdeckResult<DealCommitment> {
        let seed = self.pool.claim_one()?.ok_or(FairdeckError::PoolExhausted)?;
        tracing::debug!(seed_id = %seed.id, "Deal committed");
        Ok(seed.into())
    }

    /// Bind the committed seed to the game that materialized
    pub fn confirm_game(&self, seed_id: &str, game_id: &str) -> FairdeckResult<()> {
        if self.pool.bind(seed_id, game_id)? {
            return Ok(());
        }
        Err(FairdeckError::SeedNotClaimed(seed_id.to_string()))
    }

    /// The game never started; give the seed back
    ///
    /// Only an unconfirmed claim can be abandoned. `false` once the seed is
    /// bound to a game or a session.
    pub fn abandon(&self, seed_id: &str) -> FairdeckResult<bool> {
        self.pool.release(seed_id, ConsumerMatch::Unbound)
    }

    pub fn settle(&self, seed_id: &str, game_id: &str) -> FairdeckResult<()> {
        self.pool.mark_used(seed_id, game_id)
    }

    pub fn reveal_game(&self, game: &SettledGame) -> FairdeckResult<RevealBundle> {
        let Some(seed) = self.pool.reveal(&game.seed_id, &game.game_id)? else {
            tracing::warn!(seed_id = %game.seed_id, game_id = %game.game_id, "Reveal missed: seed not held by game");
            return Err(FairdeckError::SeedNotClaimed(game.seed_id.clone()));
        };

        Ok(RevealBundle {
            anchor: seed.anchor(),
            seed_id: seed.id,
            server_seed: seed.seed,
            server_seed_hash: seed.seed_hash,
            client_seed: game.client_seed.clone(),
            last_nonce_used: Some(game.nonce),
            fairness_version: game.fairness_version,
        })
    }

    /// Deal `item_count` items for the committed seed
    pub fn deal(commitment: &DealCommitment, client_seed: &str, nonce: u64, item_count: usize) -> Vec<usize> {
        let combined = seed_forge::combine(&commitment.server_seed, client_seed, nonce);
        ShuffleEngine::shuffle(&combined, item_count, commitment.fairness_version)
    }

    pub fn describe(commitment: &DealCommitment, client_seed: &str) -> FairnessView {
        FairnessView {
            mode: FairnessMode::LegacyPerGame,
            server_seed_hash: commitment.server_seed_hash.clone(),
            commitment_tx_ref: commitment.anchor.tx_ref.clone(),
            commitment_block: commitment.anchor.block_height,
            commitment_timestamp: commitment.anchor.timestamp,
            client_seed: client_seed.to_string(),
            next_nonce: 0,
            can_edit_client_seed: true,
            fairness_version: commitment.fairness_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        anchor::{Network, StubAnchor},
        config::PoolConfig,
        metrics::FairnessMetrics,
        store::{FairnessStore, MemoryStore, SeedStatus},
        verifier::Verifier,
    };

    fn coordinator() -> (DealCoordinator, Arc<CommitmentPool>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(CommitmentPool::new(
            store.clone(),
            Arc::new(StubAnchor::new()),
            PoolConfig::default(),
            Network::Regtest,
            Arc::new(FairnessMetrics::new()),
        ));
        (DealCoordinator::new(pool.clone()), pool, store)
    }

    #[test]
    fn test_mode_resolution() {
        assert_eq!(FairnessMode::resolve(Some("legacy")), FairnessMode::LegacyPerGame);
        assert_eq!(FairnessMode::resolve(Some("session_nonce")), FairnessMode::SessionNonce);
        assert_eq!(FairnessMode::resolve(None), FairnessMode::SessionNonce);
        assert_eq!(FairnessMode::resolve(Some("???")), FairnessMode::SessionNonce);
        assert_eq!(
            serde_json::to_string(&FairnessMode::LegacyPerGame).unwrap(),
            "\"legacy_per_game\""
        );
    }

    #[tokio::test]
    async fn test_game_lifecycle() {
        let (coordinator, pool, store) = coordinator();
        pool.refill(1).await.unwrap();

        let commitment = coordinator.commit_deal().unwrap();
        assert_eq!(commitment.fairness_version, FairnessVersion::Current);
        let json = serde_json::to_value(&commitment).unwrap();
        assert!(json.get("server_seed").is_none());

        coordinator.confirm_game(&commitment.seed_id, "game-1").unwrap();
        assert!(coordinator.confirm_game(&commitment.seed_id, "game-2").is_err());

        let deck = DealCoordinator::deal(&commitment, "player", 0, 52);
        coordinator.settle(&commitment.seed_id, "game-1").unwrap();
        assert_eq!(store.load_seed(&commitment.seed_id).unwrap().unwrap().status, SeedStatus::Used);

        let game = SettledGame {
            game_id: "game-1".into(),
            seed_id: commitment.seed_id.clone(),
            client_seed: "player".into(),
            nonce: 0,
            fairness_version: commitment.fairness_version,
        };
        let bundle = coordinator.reveal_game(&game).unwrap();
        assert_eq!(bundle.server_seed, commitment.server_seed);

        let report = Verifier::verify_outcome(
            &bundle.server_seed,
            &bundle.server_seed_hash,
            &bundle.client_seed,
            0,
            bundle.fairness_version,
            &deck,
        )
        .unwrap();
        assert!(report.valid);

        assert!(coordinator.reveal_game(&game).is_err());
    }

    #[tokio::test]
    async fn test_abandon_returns_seed() {
        let (coordinator, pool, _) = coordinator();
        pool.refill(1).await.unwrap();

        let commitment = coordinator.commit_deal().unwrap();
        assert!(matches!(coordinator.commit_deal(), Err(FairdeckError::PoolExhausted)));
        assert!(coordinator.abandon(&commitment.seed_id).unwrap());
        assert_eq!(coordinator.commit_deal().unwrap().seed_id, commitment.seed_id);
    }

    #[tokio::test]
    async fn test_abandon_never_frees_a_bound_seed() {
        let (coordinator, pool, store) = coordinator();
        pool.refill(2).await.unwrap();

        let confirmed = coordinator.commit_deal().unwrap();
        coordinator.confirm_game(&confirmed.seed_id, "game-1").unwrap();
        assert!(!coordinator.abandon(&confirmed.seed_id).unwrap());

        let session_seed = pool.claim_one_for("session:s1").unwrap().unwrap();
        assert!(!coordinator.abandon(&session_seed.id).unwrap());

        for id in [&confirmed.seed_id, &session_seed.id] {
            assert_eq!(store.load_seed(id).unwrap().unwrap().status, SeedStatus::Claimed);
        }
        assert!(matches!(coordinator.commit_deal(), Err(FairdeckError::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_describe_legacy_deal() {
        let (coordinator, pool, _) = coordinator();
        pool.refill(1).await.unwrap();
        let commitment = coordinator.commit_deal().unwrap();

        let view = DealCoordinator::describe(&commitment, "player");
        assert_eq!(view.mode, FairnessMode::LegacyPerGame);
        assert_eq!(view.server_seed_hash, commitment.server_seed_hash);
        assert!(view.commitment_block.is_some());
    }
}
