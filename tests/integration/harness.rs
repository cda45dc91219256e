//! Wires a `CycleScheduler` to the mock chain and an in-memory store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use rotor::engine::{
    CycleScheduler, ExecutorConfig, SchedulerConfig, SettlementAgent, TradeExecutor, TreasuryGuard,
    TreasuryPolicy, WorkerPool,
};
use rotor::ledger::{LedgerClient, TxSigner};
use rotor::notify::NoopNotifier;
use rotor::storage::memory::MemoryStore;
use rotor::storage::CycleStore;
use rotor::types::{CycleConfig, Credential, TreasuryAccount, WorkerAccount};

use crate::mock_chain::{MockChain, MockSigner, MockSwap, NATIVE, TOKEN};

pub const TREASURY: &str = "Treasury";
pub const RESERVE: u64 = 50_000_000;
pub const MIN_TRADE: u64 = 10_000_000;
pub const BUY_FEE_BUFFER: u64 = 10_000;
pub const RENT_BUFFER: u64 = 2_000_000;
pub const HOLD_SECS: i64 = 900;
pub const CYCLE_SECS: i64 = 1_800;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<MockChain>,
    pub swap: Arc<MockSwap>,
    pub scheduler: CycleScheduler,
}

impl Harness {
    /// A running cycle over `pool_size` workers with a funded treasury.
    pub fn new(pool_size: usize, treasury_balance: u64) -> Self {
        let store = Arc::new(MemoryStore::new(Some(cycle_config()), workers(pool_size)));
        Self::with_store(store.clone(), store, pool_size, treasury_balance)
    }

    /// As `new`, but the scheduler talks to `scheduler_store` (which must
    /// wrap `store`).
    pub fn with_store(
        store: Arc<MemoryStore>,
        scheduler_store: Arc<dyn CycleStore>,
        pool_size: usize,
        treasury_balance: u64,
    ) -> Self {
        let chain = MockChain::new();
        chain.set_balance(TREASURY, treasury_balance);
        let swap = MockSwap::new();
        let scheduler = build_scheduler(scheduler_store, pool_size, chain.clone(), swap.clone());
        Self { store, chain, swap, scheduler }
    }
}

pub fn build_scheduler(
    store: Arc<dyn CycleStore>,
    pool_size: usize,
    chain: Arc<MockChain>,
    swap: Arc<MockSwap>,
) -> CycleScheduler {
    let ledger: Arc<dyn LedgerClient> = chain;
    let signer: Arc<dyn TxSigner> = Arc::new(MockSigner);
    let timeout = std::time::Duration::from_secs(5);

    CycleScheduler::new(
        store,
        WorkerPool::new(workers(pool_size), pool_size).expect("pool"),
        TreasuryGuard::new(
            TreasuryAccount { address: TREASURY.into(), credential: Credential::new("treasury-key") },
            TreasuryPolicy { min_reserve: RESERVE, safety_factor: dec!(0.99), min_viable_trade: MIN_TRADE },
            ledger.clone(),
            signer.clone(),
            timeout,
        ),
        TradeExecutor::new(
            swap,
            ledger.clone(),
            signer.clone(),
            ExecutorConfig {
                native_mint: NATIVE.into(),
                buy_fee_buffer: BUY_FEE_BUFFER,
                liquidation_slippage_bps: 1_500,
                dust_threshold: 1_000,
                quote_attempts: 2,
                retry_backoff: std::time::Duration::ZERO,
                confirm_timeout: timeout,
            },
        ),
        SettlementAgent::new(ledger.clone(), signer, RENT_BUFFER, timeout),
        ledger,
        Arc::new(NoopNotifier),
        SchedulerConfig {
            hold_window: Duration::seconds(HOLD_SECS),
            cycle_window: Duration::seconds(CYCLE_SECS),
            lease_ttl: Duration::seconds(120),
            funding_settle_delay: std::time::Duration::ZERO,
        },
    )
}

pub fn cycle_config() -> CycleConfig {
    CycleConfig { target_asset: TOKEN.into(), slippage_bps: 100, is_running: true }
}

pub fn worker_address(index: usize) -> String {
    format!("Worker{index}")
}

pub fn workers(n: usize) -> Vec<WorkerAccount> {
    (0..n)
        .map(|i| WorkerAccount {
            index: i,
            address: worker_address(i),
            credential: Credential::new(format!("worker-key-{i}")),
        })
        .collect()
}

/// Fixed start time so scenarios are reproducible.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub fn secs(n: i64) -> Duration {
    Duration::seconds(n)
}
