//! Cycle scheduler — the phase state machine.
//!
//! One call to [`CycleScheduler::step`] performs at most one transition:
//!
//! ```text
//!   IDLE ──enter──▶ HOLDING ──(hold window)──exit──▶ COOLING
//!                      ▲                                │
//!                      └──enter next worker◀─(cycle window)
//! ```
//!
//! The step runs under a lease on the persisted state record, kept alive by
//! [`StepLease`] and re-checked before every submission. Every path that does
//! not commit a new phase releases the lease before returning.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::TradeExecutor;
use super::lease::{StepLease, SubmitGuard};
use super::pool::WorkerPool;
use super::settlement::SettlementAgent;
use super::treasury::TreasuryGuard;
use crate::ledger::LedgerClient;
use crate::notify::Notifier;
use crate::storage::CycleStore;
use crate::types::{
    lamports_to_sol, CycleConfig, CycleState, HaltReason, Phase, RotorError, StepAction,
    StepReport, StepStatus, TradeKind, TradeLedgerEntry, WorkerAccount,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub hold_window: chrono::Duration,
    pub cycle_window: chrono::Duration,
    pub lease_ttl: chrono::Duration,
    /// Pause between funding a worker and reading its balance.
    pub funding_settle_delay: Duration,
}

// ---------------------------------------------------------------------------
// Internal outcomes
// ---------------------------------------------------------------------------

/// What a dispatched phase handler decided.
enum Transition {
    /// Persist `next` and release the lease.
    Commit { next: CycleState, action: StepAction },
    /// Nothing due yet.
    Wait { remaining_secs: i64 },
    /// Funding did not happen; phase stays put for the next invocation.
    FundingFailed(String),
    Halt { reason: HaltReason, message: String },
    /// The lease could not be confirmed before a submission.
    Abort(RotorError),
}

enum EnterOutcome {
    Entered,
    FundingFailed(String),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct CycleScheduler {
    store: Arc<dyn CycleStore>,
    pool: WorkerPool,
    treasury: TreasuryGuard,
    executor: TradeExecutor,
    settlement: SettlementAgent,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

impl CycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CycleStore>,
        pool: WorkerPool,
        treasury: TreasuryGuard,
        executor: TradeExecutor,
        settlement: SettlementAgent,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self { store, pool, treasury, executor, settlement, ledger, notifier, config }
    }

    pub fn store(&self) -> &Arc<dyn CycleStore> {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one step against the wall clock.
    pub async fn step(&self) -> StepReport {
        self.step_at(Utc::now()).await
    }

    /// Run one step as of `now`. Window comparisons and the new
    /// `phase_started_at` both use `now`.
    pub async fn step_at(&self, now: DateTime<Utc>) -> StepReport {
        // Config gate: no lease is taken when stopped or misconfigured.
        let config = match self.store.load_config().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return self
                    .halt_unleased(now, HaltReason::Configuration, "cycle config has not been written")
                    .await;
            }
            Err(e) => return self.storage_error(now, format!("load config: {e:#}")).await,
        };

        if !config.is_running {
            let (phase, index) = self.snapshot(now).await;
            debug!(phase = %phase, index, "Cycle not running");
            return report(StepStatus::NotRunning, phase, index, StepAction::None);
        }

        if config.target_asset.trim().is_empty() {
            return self
                .halt_unleased(now, HaltReason::Configuration, "target asset is not set")
                .await;
        }

        // Lease
        let owner = Uuid::new_v4().to_string();
        let state = match self.store.try_acquire_lease(&owner, now, self.config.lease_ttl).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                let (phase, index) = self.snapshot(now).await;
                info!(phase = %phase, index, "Another invocation holds the lease; skipping");
                return report(StepStatus::Skipped, phase, index, StepAction::None)
                    .with_message("another step is in progress");
            }
            Err(e) => return self.storage_error(now, format!("acquire lease: {e:#}")).await,
        };

        debug!(owner = %owner, state = %state, "Lease acquired");
        let lease = StepLease::start(self.store.clone(), owner, now, self.config.lease_ttl);

        if state.active_worker_index >= self.pool.size() {
            let message = format!(
                "persisted worker index {} is outside the pool of {}",
                state.active_worker_index,
                self.pool.size()
            );
            self.release(lease.owner()).await;
            return self.halted(&state, HaltReason::Configuration, message);
        }

        // Dispatch
        let owner = lease.owner();
        match self.dispatch(&config, &state, now, &lease).await {
            Transition::Commit { next, action } => match self.store.commit_state(owner, &next).await {
                Ok(true) => {
                    info!(
                        from = %state.phase,
                        to = %next.phase,
                        index = next.active_worker_index,
                        "Phase committed"
                    );
                    report(StepStatus::Ok, next.phase, next.active_worker_index, action)
                }
                Ok(false) => {
                    let err = RotorError::LeaseLost(owner.to_string());
                    error!(error = %err, "Transition not committed");
                    self.notifier.notify(&format!("Step error: {err}"));
                    report(StepStatus::Error, state.phase, state.active_worker_index, action)
                        .with_message(err.to_string())
                }
                Err(e) => {
                    self.release(owner).await;
                    self.storage_error(now, format!("commit state: {e:#}")).await
                }
            },
            Transition::Wait { remaining_secs } => {
                self.release(owner).await;
                debug!(phase = %state.phase, remaining_secs, "Waiting");
                StepReport {
                    remaining_secs: Some(remaining_secs),
                    ..report(StepStatus::Ok, state.phase, state.active_worker_index, StepAction::Wait)
                }
            }
            Transition::FundingFailed(message) => {
                self.release(owner).await;
                report(
                    StepStatus::Ok,
                    state.phase,
                    state.active_worker_index,
                    StepAction::FundingFailed,
                )
                .with_message(message)
            }
            Transition::Halt { reason, message } => {
                self.release(owner).await;
                self.halted(&state, reason, message)
            }
            Transition::Abort(err) => {
                self.release(owner).await;
                error!(error = %err, "Step aborted before submitting");
                self.notifier.notify(&format!("Step error: {err}"));
                report(StepStatus::Error, state.phase, state.active_worker_index, StepAction::None)
                    .with_message(err.to_string())
            }
        }
    }

    /// Pick the transition for `state`, in priority order.
    async fn dispatch(
        &self,
        config: &CycleConfig,
        state: &CycleState,
        now: DateTime<Utc>,
        lease: &StepLease,
    ) -> Transition {
        let elapsed = state.elapsed(now);

        let target_index = match state.phase {
            Phase::Idle => Some(state.active_worker_index),
            Phase::Cooling if elapsed >= self.config.cycle_window => {
                Some(self.pool.next_index(state.active_worker_index))
            }
            _ => None,
        };

        if let Some(index) = target_index {
            let worker = match self.pool.get(index) {
                Ok(w) => w,
                Err(e) => {
                    return Transition::Halt { reason: HaltReason::Configuration, message: e.to_string() }
                }
            };
            return match self.enter_cycle(worker, config, lease).await {
                Ok(EnterOutcome::Entered) => Transition::Commit {
                    next: next_state(state, Phase::Holding, index, now),
                    action: StepAction::EnterCycle,
                },
                Ok(EnterOutcome::FundingFailed(message)) => Transition::FundingFailed(message),
                Err(e @ RotorError::InsufficientFunds { .. }) => {
                    Transition::Halt { reason: HaltReason::InsufficientFunds, message: e.to_string() }
                }
                Err(e @ RotorError::Configuration(_)) => {
                    Transition::Halt { reason: HaltReason::Configuration, message: e.to_string() }
                }
                Err(e @ (RotorError::LeaseLost(_) | RotorError::Storage(_))) => Transition::Abort(e),
                Err(e) => Transition::FundingFailed(e.to_string()),
            };
        }

        match state.phase {
            Phase::Holding if elapsed >= self.config.hold_window => {
                let worker = match self.pool.get(state.active_worker_index) {
                    Ok(w) => w,
                    Err(e) => {
                        return Transition::Halt {
                            reason: HaltReason::Configuration,
                            message: e.to_string(),
                        }
                    }
                };
                self.exit_cycle(worker, config, lease).await;
                Transition::Commit {
                    next: next_state(state, Phase::Cooling, state.active_worker_index, now),
                    action: StepAction::ExitCycle,
                }
            }
            Phase::Holding => Transition::Wait {
                remaining_secs: remaining(self.config.hold_window, elapsed),
            },
            _ => Transition::Wait {
                remaining_secs: remaining(self.config.cycle_window, elapsed),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Fund `worker` from the treasury and attempt the buy.
    ///
    /// `Err` means nothing was transferred. Once funding is confirmed the
    /// outcome is always `Entered`, whatever happened to the buy.
    async fn enter_cycle(
        &self,
        worker: &WorkerAccount,
        config: &CycleConfig,
        lease: &StepLease,
    ) -> Result<EnterOutcome, RotorError> {
        let balance = match self.treasury.balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Treasury balance unavailable; not funding");
                self.notifier.notify(&format!("Funding skipped for worker #{}: {e}", worker.index));
                return Ok(EnterOutcome::FundingFailed(e.to_string()));
            }
        };
        let amount = self.treasury.compute_disbursement(balance)?;

        info!(
            worker = %worker.address,
            index = worker.index,
            treasury_balance = balance,
            amount,
            "Entering cycle"
        );

        lease.ensure_held().await?;
        let funding = self
            .treasury
            .transfer(&worker.address, amount)
            .await
            .map_err(|e| e.to_string());
        self.record(TradeLedgerEntry::from_transfer(&worker.address, TradeKind::Fund, amount, &funding))
            .await;
        if let Err(reason) = funding {
            self.notifier.notify(&format!(
                "Funding worker #{} with {} SOL failed: {reason}",
                worker.index,
                lamports_to_sol(amount)
            ));
            return Ok(EnterOutcome::FundingFailed(reason));
        }

        if !self.config.funding_settle_delay.is_zero() {
            tokio::time::sleep(self.config.funding_settle_delay).await;
        }

        let available = match self.ledger.get_balance(&worker.address).await {
            Ok(b) => b,
            Err(e) => {
                warn!(worker = %worker.address, error = %e, "Worker balance unavailable; using disbursed amount");
                amount
            }
        };

        let buy = self
            .executor
            .acquire_position(worker, available, &config.target_asset, config.slippage_bps, lease)
            .await;
        self.record(TradeLedgerEntry::from_trade(&worker.address, TradeKind::Buy, &buy))
            .await;

        if buy.success {
            self.notifier.notify(&format!(
                "Worker #{} funded with {} SOL and bought {} units of {}",
                worker.index,
                lamports_to_sol(amount),
                buy.amount_out,
                config.target_asset
            ));
        } else {
            self.notifier.notify(&format!(
                "Worker #{} funded with {} SOL but the buy failed: {}",
                worker.index,
                lamports_to_sol(amount),
                buy.error.as_deref().unwrap_or("unknown error")
            ));
        }

        Ok(EnterOutcome::Entered)
    }

    /// Liquidate and sweep `worker`. Always completes; failures are recorded.
    async fn exit_cycle(&self, worker: &WorkerAccount, config: &CycleConfig, lease: &StepLease) {
        info!(worker = %worker.address, index = worker.index, "Exiting cycle");

        let sell = self
            .executor
            .liquidate_position(worker, &config.target_asset, config.slippage_bps, lease)
            .await;
        // A dust no-op has nothing to audit.
        if sell.amount_in > 0 || !sell.success {
            self.record(TradeLedgerEntry::from_trade(&worker.address, TradeKind::Sell, &sell))
                .await;
        }

        let sweep = self.settlement.sweep(worker, self.treasury.address(), lease).await;
        if sweep.amount > 0 || !sweep.is_success() {
            let outcome = match (&sweep.tx_ref, &sweep.error) {
                (Some(tx), _) => Ok(tx.clone()),
                (None, Some(e)) => Err(e.clone()),
                (None, None) => Err("no transaction reference".to_string()),
            };
            self.record(TradeLedgerEntry::from_transfer(
                &worker.address,
                TradeKind::Sweep,
                sweep.amount,
                &outcome,
            ))
            .await;
        }

        let sell_text = match (&sell.error, sell.amount_in) {
            (Some(e), _) => format!("sell failed: {e}"),
            (None, 0) => "nothing to sell".to_string(),
            (None, n) => format!("sold {n} units"),
        };
        let sweep_text = match &sweep.error {
            Some(e) => format!("sweep failed: {e}"),
            None => format!("swept {} SOL", lamports_to_sol(sweep.amount)),
        };
        self.notifier
            .notify(&format!("Worker #{} exited: {sell_text}; {sweep_text}", worker.index));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn record(&self, entry: TradeLedgerEntry) {
        debug!(entry = %entry, "Recording ledger entry");
        if let Err(e) = self.store.append_ledger(&entry).await {
            warn!(error = %e, entry = %entry, "Failed to append ledger entry");
        }
    }

    async fn release(&self, owner: &str) {
        if let Err(e) = self.store.release_lease(owner).await {
            // It will expire on its own.
            warn!(owner, error = %e, "Failed to release lease");
        }
    }

    /// Phase and index for reports made without the lease.
    async fn snapshot(&self, now: DateTime<Utc>) -> (Phase, usize) {
        match self.store.load_state(now).await {
            Ok(state) => (state.phase, state.active_worker_index),
            Err(e) => {
                warn!(error = %e, "Could not read state for report");
                (Phase::Idle, 0)
            }
        }
    }

    fn halted(&self, state: &CycleState, reason: HaltReason, message: String) -> StepReport {
        warn!(reason = ?reason, detail = %message, "Cycle halted");
        self.notifier.notify(&format!("Cycle halted: {message}"));
        StepReport {
            halt_reason: Some(reason),
            ..report(StepStatus::Halted, state.phase, state.active_worker_index, StepAction::None)
        }
        .with_message(message)
    }

    async fn halt_unleased(&self, now: DateTime<Utc>, reason: HaltReason, message: &str) -> StepReport {
        let (phase, index) = self.snapshot(now).await;
        warn!(reason = ?reason, detail = message, "Cycle halted");
        self.notifier.notify(&format!("Cycle halted: {message}"));
        StepReport {
            halt_reason: Some(reason),
            ..report(StepStatus::Halted, phase, index, StepAction::None)
        }
        .with_message(message)
    }

    async fn storage_error(&self, now: DateTime<Utc>, message: String) -> StepReport {
        let err = RotorError::Storage(message);
        error!(error = %err, "Step failed");
        self.notifier.notify(&format!("Step error: {err}"));
        let (phase, index) = self.snapshot(now).await;
        report(StepStatus::Error, phase, index, StepAction::None).with_message(err.to_string())
    }
}

fn report(status: StepStatus, phase: Phase, index: usize, action: StepAction) -> StepReport {
    StepReport {
        status,
        phase,
        active_worker_index: index,
        action,
        halt_reason: None,
        remaining_secs: None,
        message: None,
    }
}

fn next_state(current: &CycleState, phase: Phase, index: usize, now: DateTime<Utc>) -> CycleState {
    CycleState {
        phase,
        active_worker_index: index,
        phase_started_at: now,
        ..current.clone()
    }
}

/// Whole seconds left in `window`, rounded up.
fn remaining(window: chrono::Duration, elapsed: chrono::Duration) -> i64 {
    let left = window - elapsed;
    let secs = left.num_seconds();
    if left > chrono::Duration::seconds(secs) {
        secs + 1
    } else {
        secs.max(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
