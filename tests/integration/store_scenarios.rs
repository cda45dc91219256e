//! Store-facing scenarios: lost leases, datastore outages and a full cycle
//! over the SQLite store.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_test::assert_ok;

use rotor::storage::memory::MemoryStore;
use rotor::storage::sqlite::SqliteStore;
use rotor::storage::CycleStore;
use rotor::types::{
    Credential, CycleConfig, CycleState, Phase, StepAction, StepStatus, TradeKind,
    TradeLedgerEntry, WorkerAccount,
};

use crate::harness::*;
use crate::mock_chain::{MockChain, MockSwap};

/// Delegates to a `MemoryStore`, with switchable failures.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_reads: AtomicBool,
    lose_lease_on_commit: AtomicBool,
    lose_lease_on_renew: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: AtomicBool::new(false),
            lose_lease_on_commit: AtomicBool::new(false),
            lose_lease_on_renew: AtomicBool::new(false),
        })
    }

    /// Another invocation reclaims the lease from `owner`.
    async fn usurp(&self, owner: &str, now: DateTime<Utc>) -> Result<()> {
        self.inner.release_lease(owner).await?;
        self.inner
            .try_acquire_lease("usurper", now, chrono::Duration::seconds(120))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CycleStore for FlakyStore {
    async fn load_config(&self) -> Result<Option<CycleConfig>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("database is locked");
        }
        self.inner.load_config().await
    }

    async fn load_state(&self, now: DateTime<Utc>) -> Result<CycleState> {
        self.inner.load_state(now).await
    }

    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Option<CycleState>> {
        self.inner.try_acquire_lease(owner, now, ttl).await
    }

    async fn renew_lease(&self, owner: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool> {
        if self.lose_lease_on_renew.load(Ordering::SeqCst) {
            self.usurp(owner, now).await?;
        }
        self.inner.renew_lease(owner, now, ttl).await
    }

    async fn commit_state(&self, owner: &str, state: &CycleState) -> Result<bool> {
        if self.lose_lease_on_commit.load(Ordering::SeqCst) {
            self.usurp(owner, state.phase_started_at).await?;
        }
        self.inner.commit_state(owner, state).await
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        self.inner.release_lease(owner).await
    }

    async fn load_workers(&self) -> Result<Vec<WorkerAccount>> {
        self.inner.load_workers().await
    }

    async fn append_ledger(&self, entry: &TradeLedgerEntry) -> Result<()> {
        self.inner.append_ledger(entry).await
    }

    async fn recent_ledger(&self, limit: usize) -> Result<Vec<TradeLedgerEntry>> {
        self.inner.recent_ledger(limit).await
    }
}

fn flaky_harness() -> (Harness, Arc<FlakyStore>) {
    let memory = Arc::new(MemoryStore::new(Some(cycle_config()), workers(3)));
    let flaky = FlakyStore::new(memory.clone());
    let h = Harness::with_store(memory, flaky.clone(), 3, 10 * MIN_TRADE);
    (h, flaky)
}

#[tokio::test]
async fn test_lost_lease_is_an_error_not_an_overwrite() {
    let (h, flaky) = flaky_harness();
    flaky.lose_lease_on_commit.store(true, Ordering::SeqCst);

    let report = h.scheduler.step_at(t0()).await;

    assert_eq!(report.status, StepStatus::Error);
    assert_eq!(report.status.exit_code(), 1);
    assert!(report.message.unwrap().contains("Lease lost"));

    let state = h.store.state().unwrap();
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.version, 0);
    assert_eq!(state.lease_owner.as_deref(), Some("usurper"));
    // The financial operations already happened and are audited.
    assert_eq!(h.store.ledger().len(), 2);
}

#[tokio::test]
async fn test_taken_over_step_submits_nothing() {
    let (h, flaky) = flaky_harness();
    flaky.lose_lease_on_renew.store(true, Ordering::SeqCst);

    let report = h.scheduler.step_at(t0()).await;

    assert_eq!(report.status, StepStatus::Error);
    assert_eq!(report.phase, Phase::Idle);
    assert!(report.message.unwrap().contains("Lease lost"));
    assert!(h.chain.submitted().is_empty());
    assert_eq!(h.chain.balance(TREASURY), 10 * MIN_TRADE);
    assert!(h.store.ledger().is_empty());

    let state = h.store.state().unwrap();
    assert_eq!(state.version, 0);
    assert_eq!(state.lease_owner.as_deref(), Some("usurper"));
}

#[tokio::test]
async fn test_datastore_outage_is_an_error() {
    let (h, flaky) = flaky_harness();
    flaky.fail_reads.store(true, Ordering::SeqCst);

    let report = h.scheduler.step_at(t0()).await;
    assert_eq!(report.status, StepStatus::Error);
    assert!(report.message.unwrap().contains("database is locked"));
    assert!(h.chain.submitted().is_empty());

    flaky.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(h.scheduler.step_at(t0()).await.status, StepStatus::Ok);
}

#[tokio::test]
async fn test_full_cycle_over_sqlite() {
    let sqlite = Arc::new(assert_ok!(SqliteStore::connect("sqlite::memory:").await));
    assert_ok!(sqlite.save_config(&cycle_config()).await);
    for worker in workers(3) {
        assert_ok!(
            sqlite
                .insert_worker(worker.index, &worker.address, &Credential::new(format!("key-{}", worker.index)))
                .await
        );
    }

    let chain = MockChain::new();
    chain.set_balance(TREASURY, 10 * MIN_TRADE);
    let scheduler = build_scheduler(sqlite.clone(), 3, chain.clone(), MockSwap::new());

    let entered = scheduler.step_at(t0()).await;
    assert_eq!(entered.action, StepAction::EnterCycle);

    let waiting = scheduler.step_at(t0() + secs(60)).await;
    assert_eq!(waiting.action, StepAction::Wait);
    assert_eq!(waiting.remaining_secs, Some(HOLD_SECS - 60));

    let exited = scheduler.step_at(t0() + secs(HOLD_SECS)).await;
    assert_eq!(exited.action, StepAction::ExitCycle);

    let state = assert_ok!(sqlite.load_state(t0()).await);
    assert_eq!(state.phase, Phase::Cooling);
    assert_eq!(state.active_worker_index, 0);
    assert_eq!(state.version, 2);
    assert_eq!(state.phase_started_at, t0() + secs(HOLD_SECS));
    assert!(state.lease_owner.is_none());

    let recent = assert_ok!(sqlite.recent_ledger(10).await);
    let kinds: Vec<_> = recent.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![TradeKind::Sweep, TradeKind::Sell, TradeKind::Buy, TradeKind::Fund]);
}
