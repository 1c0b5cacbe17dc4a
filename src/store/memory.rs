//! In-process store backed by concurrent maps.
//!
//! A conditional update holds the row's shard lock while it checks the
//! guard and applies the effect, so two callers can never both observe
//! the same pre-state.

use super::{FairnessStore, SeedRecord, SeedStatus, SeedUpdate, SessionFairnessState, StatusCounts};
use crate::errors::FairdeckResult;
use dashmap::{mapref::entry::Entry, DashMap};

#[derive(Default)]
pub struct MemoryStore {
    seeds: DashMap<String, SeedRecord>,
    sessions: DashMap<String, SessionFairnessState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FairnessStore for MemoryStore {
    fn insert_seed(&self, seed: &SeedRecord) -> FairdeckResult<()> {
        self.seeds.insert(seed.id.clone(), seed.clone());
        Ok(())
    }

    fn load_seed(&self, seed_id: &str) -> FairdeckResult<Option<SeedRecord>> {
        Ok(self.seeds.get(seed_id).map(|r| r.clone()))
    }

    fn oldest_available(&self, limit: usize) -> FairdeckResult<Vec<SeedRecord>> {
        let mut available: Vec<SeedRecord> = self
            .seeds
            .iter()
            .filter(|r| r.status == SeedStatus::Available)
            .map(|r| r.clone())
            .collect();
        available.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        available.truncate(limit);
        Ok(available)
    }

    fn transition_seed(&self, seed_id: &str, update: &SeedUpdate) -> FairdeckResult<bool> {
        let Some(mut record) = self.seeds.get_mut(seed_id) else {
            return Ok(false);
        };
        if !update.matches(&record) {
            return Ok(false);
        }
        update.apply(&mut record);
        Ok(true)
    }

    fn seeds_with_status(&self, status: SeedStatus) -> FairdeckResult<Vec<SeedRecord>> {
        Ok(self
            .seeds
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.clone())
            .collect())
    }

    fn status_counts(&self) -> FairdeckResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for r in self.seeds.iter() {
            counts.record(r.status);
        }
        Ok(counts)
    }

    fn load_session(&self, session_id: &str) -> FairdeckResult<Option<SessionFairnessState>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    fn insert_session(&self, state: &SessionFairnessState) -> FairdeckResult<bool> {
        match self.sessions.entry(state.session_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
                Ok(true)
            }
        }
    }

    fn replace_session(&self, expected_revision: u64, state: &SessionFairnessState) -> FairdeckResult<bool> {
        let Some(mut current) = self.sessions.get_mut(&state.session_id) else {
            return Ok(false);
        };
        if current.revision != expected_revision {
            return Ok(false);
        }
        *current = state.clone();
        Ok(true)
    }
}
