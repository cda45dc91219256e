//! Settlement agent.
//!
//! Returns a worker's residual native balance to the treasury, keeping back
//! the rent/fee buffer so the sweep itself can be paid for.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::lease::SubmitGuard;
use crate::ledger::{self, LedgerClient, TxSigner};
use crate::types::{SweepResult, WorkerAccount};

pub struct SettlementAgent {
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn TxSigner>,
    rent_buffer: u64,
    confirm_timeout: Duration,
}

impl SettlementAgent {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
        rent_buffer: u64,
        confirm_timeout: Duration,
    ) -> Self {
        Self { ledger, signer, rent_buffer, confirm_timeout }
    }

    /// Sweep `worker` into `treasury_address`. Never returns an error; a
    /// failed balance read or transfer is reported in the result.
    pub async fn sweep(
        &self,
        worker: &WorkerAccount,
        treasury_address: &str,
        guard: &dyn SubmitGuard,
    ) -> SweepResult {
        let balance = match self.ledger.get_balance(&worker.address).await {
            Ok(b) => b,
            Err(e) => {
                warn!(worker = %worker.address, error = %e, "Could not read worker balance for sweep");
                return SweepResult {
                    amount: 0,
                    tx_ref: None,
                    error: Some(format!("balance read failed: {e:#}")),
                };
            }
        };

        let amount = balance.saturating_sub(self.rent_buffer);
        if amount == 0 {
            debug!(worker = %worker.address, balance, rent_buffer = self.rent_buffer, "Nothing to sweep");
            return SweepResult::nothing();
        }

        if let Err(e) = guard.ensure_held().await {
            warn!(worker = %worker.address, error = %e, "Sweep not submitted");
            return SweepResult { amount, tx_ref: None, error: Some(e.to_string()) };
        }

        match ledger::transfer(
            self.ledger.as_ref(),
            self.signer.as_ref(),
            &worker.address,
            &worker.credential,
            treasury_address,
            amount,
            self.confirm_timeout,
        )
        .await
        {
            Ok(tx_ref) => {
                info!(worker = %worker.address, amount, tx = %tx_ref, "Worker swept");
                SweepResult { amount, tx_ref: Some(tx_ref), error: None }
            }
            Err(e) => SweepResult { amount, tx_ref: None, error: Some(e.to_string()) },
        }
    }
}
