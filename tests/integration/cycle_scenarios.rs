//! End-to-end cycle scenarios: cold start, hold and cool expiry, rotation,
//! halting and failure containment.

use std::collections::HashMap;

use rotor::storage::CycleStore;
use rotor::types::{
    CycleState, HaltReason, Phase, StepAction, StepStatus, TradeKind, TradeStatus,
};

use crate::harness::*;
use crate::mock_chain::{TOKEN, TX_FEE};

fn kinds(h: &Harness) -> Vec<(TradeKind, TradeStatus)> {
    h.store.ledger().iter().map(|e| (e.kind, e.status)).collect()
}

#[tokio::test]
async fn test_cold_start_funds_and_buys_with_worker_zero() {
    let h = Harness::new(5, 10 * MIN_TRADE);

    let report = h.scheduler.step_at(t0()).await;

    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.action, StepAction::EnterCycle);
    assert_eq!(report.phase, Phase::Holding);
    assert_eq!(report.active_worker_index, 0);

    let state = h.store.state().unwrap();
    assert_eq!(state.phase, Phase::Holding);
    assert_eq!(state.active_worker_index, 0);
    assert_eq!(state.phase_started_at, t0());
    assert!(state.lease_owner.is_none());

    // headroom 50_000_000 * 0.99
    let funded = 49_500_000;
    assert_eq!(h.chain.balance(TREASURY), 10 * MIN_TRADE - funded - TX_FEE);
    assert!(h.chain.balance(TREASURY) >= RESERVE);
    assert_eq!(h.chain.token_balance(&worker_address(0), TOKEN), (funded - BUY_FEE_BUFFER) * 2);

    assert_eq!(
        kinds(&h),
        vec![(TradeKind::Fund, TradeStatus::Success), (TradeKind::Buy, TradeStatus::Success)]
    );
    let entries = h.store.ledger();
    assert_eq!(entries[0].amount, funded);
    assert_eq!(entries[1].amount, funded - BUY_FEE_BUFFER);
    assert!(entries.iter().all(|e| e.worker_address == worker_address(0)));
}

#[tokio::test]
async fn test_hold_expiry_liquidates_and_sweeps() {
    let h = Harness::new(5, 10 * MIN_TRADE);
    h.scheduler.step_at(t0()).await;

    let early = h.scheduler.step_at(t0() + secs(HOLD_SECS - 1)).await;
    assert_eq!(early.action, StepAction::Wait);
    assert_eq!(early.remaining_secs, Some(1));
    assert_eq!(h.store.state().unwrap().phase, Phase::Holding);

    let report = h.scheduler.step_at(t0() + secs(HOLD_SECS)).await;
    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.action, StepAction::ExitCycle);
    assert_eq!(report.phase, Phase::Cooling);
    assert_eq!(report.active_worker_index, 0);

    let state = h.store.state().unwrap();
    assert_eq!(state.phase, Phase::Cooling);
    assert_eq!(state.phase_started_at, t0() + secs(HOLD_SECS));

    let worker = worker_address(0);
    assert_eq!(h.chain.token_balance(&worker, TOKEN), 0);
    assert_eq!(h.chain.balance(&worker), RENT_BUFFER - TX_FEE);

    assert_eq!(
        kinds(&h),
        vec![
            (TradeKind::Fund, TradeStatus::Success),
            (TradeKind::Buy, TradeStatus::Success),
            (TradeKind::Sell, TradeStatus::Success),
            (TradeKind::Sweep, TradeStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_cool_expiry_wraps_to_first_worker() {
    let h = Harness::new(20, 10 * MIN_TRADE);
    h.store.set_state(CycleState {
        phase: Phase::Cooling,
        active_worker_index: 19,
        ..CycleState::initial(t0())
    });

    let early = h.scheduler.step_at(t0() + secs(CYCLE_SECS - 1)).await;
    assert_eq!(early.action, StepAction::Wait);
    assert_eq!(early.active_worker_index, 19);

    let report = h.scheduler.step_at(t0() + secs(CYCLE_SECS)).await;
    assert_eq!(report.action, StepAction::EnterCycle);
    assert_eq!(report.phase, Phase::Holding);
    assert_eq!(report.active_worker_index, 0);

    let state = h.store.state().unwrap();
    assert_eq!(state.active_worker_index, 0);
    assert_eq!(state.phase_started_at, t0() + secs(CYCLE_SECS));
    assert!(h.chain.token_balance(&worker_address(0), TOKEN) > 0);
    assert_eq!(h.chain.token_balance(&worker_address(19), TOKEN), 0);
}

#[tokio::test]
async fn test_late_invocation_fires_overdue_transition() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.scheduler.step_at(t0()).await;

    let report = h.scheduler.step_at(t0() + secs(HOLD_SECS * 10)).await;
    assert_eq!(report.action, StepAction::ExitCycle);
    assert_eq!(h.store.state().unwrap().phase_started_at, t0() + secs(HOLD_SECS * 10));
}

#[tokio::test]
async fn test_starved_treasury_halts_without_moving_funds() {
    for balance in [RESERVE, RESERVE + 1, RESERVE + MIN_TRADE - 1, RESERVE + MIN_TRADE] {
        let h = Harness::new(5, balance);

        let report = h.scheduler.step_at(t0()).await;

        assert_eq!(report.status, StepStatus::Halted, "balance {balance}");
        assert_eq!(report.halt_reason, Some(HaltReason::InsufficientFunds));
        assert_eq!(report.phase, Phase::Idle);

        let state = h.store.state().unwrap();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.version, 0);
        assert!(state.lease_owner.is_none());
        assert_eq!(h.chain.balance(TREASURY), balance);
        assert!(h.chain.submitted().is_empty());
        assert!(h.store.ledger().is_empty());
    }
}

#[tokio::test]
async fn test_starved_treasury_does_not_advance_index() {
    let h = Harness::new(5, RESERVE);
    h.store.set_state(CycleState {
        phase: Phase::Cooling,
        active_worker_index: 3,
        ..CycleState::initial(t0())
    });

    let report = h.scheduler.step_at(t0() + secs(CYCLE_SECS)).await;
    assert_eq!(report.status, StepStatus::Halted);

    let state = h.store.state().unwrap();
    assert_eq!(state.phase, Phase::Cooling);
    assert_eq!(state.active_worker_index, 3);

    // Topped up: the same invocation now proceeds to the next worker.
    h.chain.set_balance(TREASURY, 10 * MIN_TRADE);
    let report = h.scheduler.step_at(t0() + secs(CYCLE_SECS + 60)).await;
    assert_eq!(report.action, StepAction::EnterCycle);
    assert_eq!(report.active_worker_index, 4);
}

#[tokio::test]
async fn test_repeated_step_without_elapsed_time_is_idempotent() {
    let h = Harness::new(5, 10 * MIN_TRADE);
    h.scheduler.step_at(t0()).await;
    let before = h.store.state().unwrap();

    let first = h.scheduler.step_at(t0() + secs(10)).await;
    let after_first = h.store.state().unwrap();
    let second = h.scheduler.step_at(t0() + secs(10)).await;
    let after_second = h.store.state().unwrap();

    assert_eq!(first.action, StepAction::Wait);
    assert_eq!(second.action, StepAction::Wait);
    assert_eq!(first.remaining_secs, second.remaining_secs);
    assert_eq!(before, after_first);
    assert_eq!(after_first, after_second);
    assert_eq!(h.store.ledger().len(), 2);
}

#[tokio::test]
async fn test_every_worker_is_visited_in_order() {
    const N: usize = 4;
    const ROTATIONS: usize = 3;
    let h = Harness::new(N, 100_000_000_000);

    let mut visits: HashMap<usize, usize> = HashMap::new();
    let mut entered = Vec::new();
    let mut now = t0();

    for _ in 0..(N * ROTATIONS * 2) {
        let report = h.scheduler.step_at(now).await;
        assert_eq!(report.status, StepStatus::Ok);
        assert!(h.chain.balance(TREASURY) >= RESERVE);

        if report.action == StepAction::EnterCycle {
            *visits.entry(report.active_worker_index).or_default() += 1;
            entered.push(report.active_worker_index);
        }
        now += secs(CYCLE_SECS);
    }

    for index in 0..N {
        assert_eq!(visits.get(&index), Some(&ROTATIONS), "worker {index}");
    }
    // Index after k cool-downs is k mod N.
    for (k, index) in entered.iter().enumerate() {
        assert_eq!(*index, k % N);
    }
}

#[tokio::test]
async fn test_failed_acquisition_still_holds_then_recovers_funds() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.swap.refuse_quotes(Some("no route"));

    let report = h.scheduler.step_at(t0()).await;
    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.phase, Phase::Holding);
    assert_eq!(h.swap.quotes_requested(), 2);

    let buy = &h.store.ledger()[1];
    assert_eq!(buy.kind, TradeKind::Buy);
    assert_eq!(buy.status, TradeStatus::Failed);
    assert!(buy.error.as_deref().unwrap().contains("no route"));

    // Nothing to liquidate; the sweep still returns the funding.
    let report = h.scheduler.step_at(t0() + secs(HOLD_SECS)).await;
    assert_eq!(report.phase, Phase::Cooling);
    assert_eq!(
        kinds(&h),
        vec![
            (TradeKind::Fund, TradeStatus::Success),
            (TradeKind::Buy, TradeStatus::Failed),
            (TradeKind::Sweep, TradeStatus::Success),
        ]
    );
    assert_eq!(h.chain.balance(&worker_address(0)), RENT_BUFFER - TX_FEE);
}

#[tokio::test]
async fn test_failed_exit_still_cools() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.scheduler.step_at(t0()).await;

    h.chain.set_unconfirmed(true);
    let report = h.scheduler.step_at(t0() + secs(HOLD_SECS)).await;

    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.phase, Phase::Cooling);
    let tail: Vec<_> = kinds(&h).into_iter().skip(2).collect();
    assert_eq!(
        tail,
        vec![(TradeKind::Sell, TradeStatus::Failed), (TradeKind::Sweep, TradeStatus::Failed)]
    );
}

#[tokio::test]
async fn test_failed_funding_leaves_phase_for_next_step() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.chain.set_unconfirmed(true);

    let report = h.scheduler.step_at(t0()).await;
    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.action, StepAction::FundingFailed);
    assert_eq!(report.phase, Phase::Idle);
    assert_eq!(h.store.state().unwrap().version, 0);
    assert_eq!(kinds(&h), vec![(TradeKind::Fund, TradeStatus::Failed)]);

    // The unconfirmed transfer landed anyway; top the treasury back up.
    h.chain.set_unconfirmed(false);
    h.chain.set_balance(TREASURY, 10 * MIN_TRADE);
    let report = h.scheduler.step_at(t0() + secs(60)).await;
    assert_eq!(report.action, StepAction::EnterCycle);
    assert_eq!(report.phase, Phase::Holding);
}

#[tokio::test]
async fn test_ledger_outage_skips_funding() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.chain.set_error("rpc unavailable");

    let report = h.scheduler.step_at(t0()).await;
    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.action, StepAction::FundingFailed);
    assert!(report.message.unwrap().contains("rpc unavailable"));
    assert!(h.store.ledger().is_empty());

    h.chain.clear_error();
    assert_eq!(h.scheduler.step_at(t0()).await.phase, Phase::Holding);
}

#[tokio::test]
async fn test_live_lease_skips_and_expired_lease_is_reclaimed() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.store
        .try_acquire_lease("other-host", t0(), secs(120))
        .await
        .unwrap()
        .unwrap();

    let report = h.scheduler.step_at(t0() + secs(1)).await;
    assert_eq!(report.status, StepStatus::Skipped);
    assert_eq!(report.status.exit_code(), 0);
    assert!(h.chain.submitted().is_empty());
    assert_eq!(h.store.state().unwrap().lease_owner.as_deref(), Some("other-host"));

    let report = h.scheduler.step_at(t0() + secs(121)).await;
    assert_eq!(report.status, StepStatus::Ok);
    assert_eq!(report.action, StepAction::EnterCycle);
    assert!(h.store.state().unwrap().lease_owner.is_none());
}

#[tokio::test]
async fn test_not_running_is_a_no_op() {
    let h = Harness::new(3, 10 * MIN_TRADE);
    h.store.set_running(false);

    let report = h.scheduler.step_at(t0()).await;
    assert_eq!(report.status, StepStatus::NotRunning);
    assert!(h.chain.submitted().is_empty());
    assert!(h.store.state().unwrap().lease_owner.is_none());

    h.store.set_running(true);
    assert_eq!(h.scheduler.step_at(t0()).await.action, StepAction::EnterCycle);
}
