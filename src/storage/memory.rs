//! In-memory cycle store.
//!
//! Same lease semantics as the SQLite store, held behind a mutex. Used by
//! the test suites and for dry runs; nothing survives a restart.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use super::CycleStore;
use crate::types::{CycleConfig, CycleState, TradeLedgerEntry, WorkerAccount};

#[derive(Default)]
struct Inner {
    config: Option<CycleConfig>,
    state: Option<CycleState>,
    workers: Vec<WorkerAccount>,
    ledger: Vec<TradeLedgerEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(config: Option<CycleConfig>, workers: Vec<WorkerAccount>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                workers,
                ..Inner::default()
            }),
        }
    }

    /// Overwrite the persisted state (test setup).
    pub fn set_state(&self, state: CycleState) {
        self.lock().state = Some(state);
    }

    /// Persisted state, if any has been written.
    pub fn state(&self) -> Option<CycleState> {
        self.lock().state.clone()
    }

    pub fn set_running(&self, running: bool) {
        if let Some(config) = self.lock().config.as_mut() {
            config.is_running = running;
        }
    }

    /// Every ledger entry, oldest first.
    pub fn ledger(&self) -> Vec<TradeLedgerEntry> {
        self.lock().ledger.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CycleStore for MemoryStore {
    async fn load_config(&self) -> Result<Option<CycleConfig>> {
        Ok(self.lock().config.clone())
    }

    async fn load_state(&self, now: DateTime<Utc>) -> Result<CycleState> {
        let mut inner = self.lock();
        Ok(inner.state.get_or_insert_with(|| CycleState::initial(now)).clone())
    }

    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Option<CycleState>> {
        let mut inner = self.lock();
        let state = inner.state.get_or_insert_with(|| CycleState::initial(now));
        if state.is_leased(now) {
            return Ok(None);
        }
        state.lease_owner = Some(owner.to_string());
        state.lease_expires_at = Some(now + ttl);
        Ok(Some(state.clone()))
    }

    async fn renew_lease(&self, owner: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool> {
        let mut inner = self.lock();
        match inner.state.as_mut() {
            Some(state) if state.lease_owner.as_deref() == Some(owner) => {
                state.lease_expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_state(&self, owner: &str, next: &CycleState) -> Result<bool> {
        let mut inner = self.lock();
        let Some(state) = inner.state.as_mut() else {
            return Ok(false);
        };
        if state.lease_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        state.phase = next.phase;
        state.active_worker_index = next.active_worker_index;
        state.phase_started_at = next.phase_started_at;
        state.version += 1;
        state.lease_owner = None;
        state.lease_expires_at = None;
        Ok(true)
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(state) = inner.state.as_mut() {
            if state.lease_owner.as_deref() == Some(owner) {
                state.lease_owner = None;
                state.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn load_workers(&self) -> Result<Vec<WorkerAccount>> {
        Ok(self.lock().workers.clone())
    }

    async fn append_ledger(&self, entry: &TradeLedgerEntry) -> Result<()> {
        self.lock().ledger.push(entry.clone());
        Ok(())
    }

    async fn recent_ledger(&self, limit: usize) -> Result<Vec<TradeLedgerEntry>> {
        Ok(self.lock().ledger.iter().rev().take(limit).cloned().collect())
    }
}
