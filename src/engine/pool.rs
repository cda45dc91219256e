//! Worker pool registry.
//!
//! The fixed, ordered set of disposable worker accounts. Pure data access:
//! the size is a hard precondition checked when the pool is built, never
//! inferred at runtime.

use tracing::info;

use crate::storage::CycleStore;
use crate::types::{RotorError, WorkerAccount};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: Vec<WorkerAccount>,
}

impl WorkerPool {
    /// Build a pool of exactly `expected` workers from the persisted list.
    ///
    /// Extra persisted workers beyond `expected` are ignored. Fewer, a gap in
    /// the indices, or a missing credential is a configuration error.
    pub fn new(mut accounts: Vec<WorkerAccount>, expected: usize) -> Result<Self, RotorError> {
        if expected == 0 {
            return Err(RotorError::Configuration("worker pool size must be at least 1".into()));
        }
        if accounts.len() < expected {
            return Err(RotorError::Configuration(format!(
                "worker pool has {} accounts, {expected} required",
                accounts.len()
            )));
        }

        accounts.sort_by_key(|w| w.index);
        accounts.truncate(expected);

        for (position, worker) in accounts.iter().enumerate() {
            if worker.index != position {
                return Err(RotorError::Configuration(format!(
                    "worker pool is missing index {position}"
                )));
            }
            if worker.address.trim().is_empty() || worker.credential.is_empty() {
                return Err(RotorError::Configuration(format!(
                    "worker #{position} is missing its address or credential"
                )));
            }
        }

        Ok(Self { workers: accounts })
    }

    /// Load the persisted pool and check it against the configured size.
    pub async fn load(store: &dyn CycleStore, expected: usize) -> Result<Self, RotorError> {
        let accounts = store
            .load_workers()
            .await
            .map_err(|e| RotorError::Storage(format!("{e:#}")))?;
        let pool = Self::new(accounts, expected)?;
        info!(size = pool.size(), "Worker pool loaded");
        Ok(pool)
    }

    pub fn get(&self, index: usize) -> Result<&WorkerAccount, RotorError> {
        self.workers.get(index).ok_or_else(|| {
            RotorError::Configuration(format!(
                "worker index {index} outside pool of {}",
                self.workers.len()
            ))
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// The index after `index`, wrapping at the pool size.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.workers.len()
    }
}
