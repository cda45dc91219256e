//! Persistence layer.
//!
//! The datastore holds the cycle config, the single `CycleState` row (with
//! its lease columns), the worker pool and the append-only trade ledger.
//! The scheduler only ever sees the `CycleStore` trait; the lease is a
//! conditional update on the state record, so overlapping invocations are
//! excluded by the store rather than by process-local locks.
//! - `sqlite` — `sqlx` SQLite store used in production
//! - `memory` — in-memory store for tests and dry runs

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CycleConfig, CycleState, TradeLedgerEntry, WorkerAccount};

#[async_trait]
pub trait CycleStore: Send + Sync {
    /// Operator config. `None` until the control surface has written one.
    async fn load_config(&self) -> Result<Option<CycleConfig>>;

    /// Current state without taking the lease (read-only views).
    /// Creates the initial `Idle` record on first use.
    async fn load_state(&self, now: DateTime<Utc>) -> Result<CycleState>;

    /// Atomically claim the lease if it is free or expired.
    ///
    /// Returns the state as of the claim, or `None` when another owner holds
    /// a live lease. Creates the initial record on first use.
    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Option<CycleState>>;

    /// Push the lease expiry to `now + ttl`, only if `owner` still holds it.
    /// Returns `false` once the lease has been released or taken over.
    async fn renew_lease(&self, owner: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool>;

    /// Persist `state`'s phase fields, bump the version and release the lease,
    /// only if `owner` still holds it. Returns `false` if the lease was lost.
    async fn commit_state(&self, owner: &str, state: &CycleState) -> Result<bool>;

    /// Release the lease without changing the phase. No-op if not the owner.
    async fn release_lease(&self, owner: &str) -> Result<()>;

    /// Worker pool in index order.
    async fn load_workers(&self) -> Result<Vec<WorkerAccount>>;

    async fn append_ledger(&self, entry: &TradeLedgerEntry) -> Result<()>;

    /// Most recent ledger entries, newest first.
    async fn recent_ledger(&self, limit: usize) -> Result<Vec<TradeLedgerEntry>>;
}
