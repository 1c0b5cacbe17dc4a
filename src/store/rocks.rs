//! RocksDB-backed fairness store
//!
//! Conditional updates run inside optimistic transactions: the row is read
//! with `get_for_update`, the guard is checked, and a commit conflict with a
//! concurrent writer is reported as a lost race.
//!
//! Key layout:
//! - `seed:record:<id>` -> JSON [`SeedRecord`]
//! - `seed:available:<created_ms be><id>` -> empty, ordered index of available seeds
//! - `session:state:<session_id>` -> JSON [`SessionFairnessState`]

use super::{FairnessStore, SeedRecord, SeedStatus, SeedUpdate, SessionFairnessState, StatusCounts};
use crate::{
    config::StorageConfig,
    errors::{FairdeckResult, StorageError},
};
use rocksdb::{Direction, ErrorKind, IteratorMode, OptimisticTransactionDB, Options};
use serde::{de::DeserializeOwned, Serialize};
use std::{path::Path, sync::Arc};

const SEED_RECORD_PREFIX: &[u8] = b"seed:record:";
const AVAILABLE_INDEX_PREFIX: &[u8] = b"seed:available:";
const SESSION_STATE_PREFIX: &[u8] = b"session:state:";

fn seed_key(seed_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(SEED_RECORD_PREFIX.len() + seed_id.len());
    key.extend_from_slice(SEED_RECORD_PREFIX);
    key.extend_from_slice(seed_id.as_bytes());
    key
}

fn available_key(record: &SeedRecord) -> Vec<u8> {
    // Oldest first: prefix | created_ms(be) | id
    let created_ms = record.created_at.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(AVAILABLE_INDEX_PREFIX.len() + 8 + record.id.len());
    key.extend_from_slice(AVAILABLE_INDEX_PREFIX);
    key.extend_from_slice(&created_ms.to_be_bytes());
    key.extend_from_slice(record.id.as_bytes());
    key
}

fn session_key(session_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(SESSION_STATE_PREFIX.len() + session_id.len());
    key.extend_from_slice(SESSION_STATE_PREFIX);
    key.extend_from_slice(session_id.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StorageError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
}

/// A commit that lost to a concurrent writer
fn is_conflict(e: &rocksdb::Error) -> bool {
    matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<OptimisticTransactionDB>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> FairdeckResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = OptimisticTransactionDB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn open_with_config(config: &StorageConfig) -> FairdeckResult<Self> {
        if config.clear_on_start {
            tracing::warn!(path = %config.data_directory, "Clearing fairness database on start");
            let _ = std::fs::remove_dir_all(&config.data_directory);
        }
        Self::open(&config.data_directory)
    }

    fn scan_prefix(&self, prefix: &[u8], limit: usize) -> FairdeckResult<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key, value));
        }
        Ok(rows)
    }

    fn all_seeds(&self) -> FairdeckResult<Vec<SeedRecord>> {
        self.scan_prefix(SEED_RECORD_PREFIX, usize::MAX)?
            .into_iter()
            .map(|(_, value)| decode::<SeedRecord>(&value, "seed record").map_err(Into::into))
            .collect()
    }
}

impl FairnessStore for RocksStore {
    fn insert_seed(&self, seed: &SeedRecord) -> FairdeckResult<()> {
        let txn = self.db.transaction();
        txn.put(seed_key(&seed.id), encode(seed, "seed record")?)?;
        if seed.status == SeedStatus::Available {
            txn.put(available_key(seed), b"")?;
        }
        txn.commit()?;
        Ok(())
    }

    fn load_seed(&self, seed_id: &str) -> FairdeckResult<Option<SeedRecord>> {
        let bytes = self
            .db
            .get(seed_key(seed_id))
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(bytes.map(|b| decode(&b, "seed record")).transpose()?)
    }

    fn oldest_available(&self, limit: usize) -> FairdeckResult<Vec<SeedRecord>> {
        let mut seeds = Vec::with_capacity(limit);
        for (key, _) in self.scan_prefix(AVAILABLE_INDEX_PREFIX, limit)? {
            let id_offset = AVAILABLE_INDEX_PREFIX.len() + 8;
            if key.len() <= id_offset {
                continue;
            }
            let seed_id = String::from_utf8_lossy(&key[id_offset..]).into_owned();
            match self.load_seed(&seed_id)? {
                Some(seed) if seed.status == SeedStatus::Available => seeds.push(seed),
                _ => tracing::debug!(seed_id = %seed_id, "Skipping stale available-index entry"),
            }
        }
        Ok(seeds)
    }

    fn transition_seed(&self, seed_id: &str, update: &SeedUpdate) -> FairdeckResult<bool> {
        let key = seed_key(seed_id);
        let txn = self.db.transaction();

        let Some(bytes) = txn
            .get_for_update(&key, true)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        else {
            return Ok(false);
        };
        let mut record: SeedRecord = decode(&bytes, "seed record")?;
        if !update.matches(&record) {
            return Ok(false);
        }

        let was_available = record.status == SeedStatus::Available;
        let old_index = available_key(&record);
        update.apply(&mut record);

        txn.put(&key, encode(&record, "seed record")?)?;
        match (was_available, record.status == SeedStatus::Available) {
            (true, false) => txn.delete(&old_index)?,
            (false, true) => txn.put(available_key(&record), b"")?,
            _ => {}
        }

        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(StorageError::WriteFailed(e.to_string()).into()),
        }
    }

    fn seeds_with_status(&self, status: SeedStatus) -> FairdeckResult<Vec<SeedRecord>> {
        Ok(self
            .all_seeds()?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    fn status_counts(&self) -> FairdeckResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for seed in self.all_seeds()? {
            counts.record(seed.status);
        }
        Ok(counts)
    }

    fn load_session(&self, session_id: &str) -> FairdeckResult<Option<SessionFairnessState>> {
        let bytes = self
            .db
            .get(session_key(session_id))
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(bytes.map(|b| decode(&b, "session state")).transpose()?)
    }

    fn insert_session(&self, state: &SessionFairnessState) -> FairdeckResult<bool> {
        let key = session_key(&state.session_id);
        let txn = self.db.transaction();
        if txn
            .get_for_update(&key, true)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
            .is_some()
        {
            return Ok(false);
        }
        txn.put(&key, encode(state, "session state")?)?;

        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(StorageError::WriteFailed(e.to_string()).into()),
        }
    }

    fn replace_session(&self, expected_revision: u64, state: &SessionFairnessState) -> FairdeckResult<bool> {
        let key = session_key(&state.session_id);
        let txn = self.db.transaction();
        let Some(bytes) = txn
            .get_for_update(&key, true)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        else {
            return Ok(false);
        };
        let current: SessionFairnessState = decode(&bytes, "session state")?;
        if current.revision != expected_revision {
            return Ok(false);
        }
        txn.put(&key, encode(state, "session state")?)?;

        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(StorageError::WriteFailed(e.to_string()).into()),
        }
    }
}
