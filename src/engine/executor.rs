//! Trade executor.
//!
//! Acquires and liquidates a worker's position through the swap service.
//! Every outcome comes back as a `TradeResult`; nothing here returns an
//! error, because the cycle must be able to proceed to settlement even when
//! a leg fails.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::lease::SubmitGuard;
use crate::ledger::{self, LedgerClient, TxSigner};
use crate::swap::{Quote, SwapService};
use crate::types::{TradeResult, UnsignedTx, WorkerAccount};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Funding-side mint (wrapped native currency).
    pub native_mint: String,
    /// Lamports held back from each buy for network fees.
    pub buy_fee_buffer: u64,
    /// Floor for sell-side slippage. A sell never runs tighter than the buy
    /// that opened the position.
    pub liquidation_slippage_bps: u16,
    /// Token holdings below this are left alone.
    pub dust_threshold: u64,
    /// Quote + build attempts before giving up. Nothing is submitted until
    /// an attempt succeeds, so retrying is safe.
    pub quote_attempts: u32,
    pub retry_backoff: Duration,
    pub confirm_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    swap: Arc<dyn SwapService>,
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn TxSigner>,
    config: ExecutorConfig,
}

impl TradeExecutor {
    pub fn new(
        swap: Arc<dyn SwapService>,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
        config: ExecutorConfig,
    ) -> Self {
        Self { swap, ledger, signer, config }
    }

    /// Swap the worker's available native balance (minus the fee buffer)
    /// into `asset`. Nothing is submitted unless `guard` still holds.
    pub async fn acquire_position(
        &self,
        worker: &WorkerAccount,
        funds_available: u64,
        asset: &str,
        slippage_bps: u16,
        guard: &dyn SubmitGuard,
    ) -> TradeResult {
        let amount = funds_available.saturating_sub(self.config.buy_fee_buffer);
        if amount == 0 {
            warn!(
                worker = %worker.address,
                funds_available,
                fee_buffer = self.config.buy_fee_buffer,
                "Nothing left to buy with after fee buffer"
            );
            return TradeResult::failed(0, "funds do not cover the fee buffer");
        }

        info!(worker = %worker.address, amount, asset, slippage_bps, "Acquiring position");
        self.swap_exact_in(worker, &self.config.native_mint, asset, amount, slippage_bps, guard)
            .await
    }

    /// Sell the worker's entire holding of `asset` back to native currency,
    /// at no less than `acquisition_slippage_bps`. A holding below the dust
    /// threshold is a successful no-op.
    pub async fn liquidate_position(
        &self,
        worker: &WorkerAccount,
        asset: &str,
        acquisition_slippage_bps: u16,
        guard: &dyn SubmitGuard,
    ) -> TradeResult {
        let holding = match self.ledger.get_token_balance(&worker.address, asset).await {
            Ok(h) => h,
            Err(e) => {
                warn!(worker = %worker.address, error = %e, "Could not read holding");
                return TradeResult::failed(0, format!("holding read failed: {e:#}"));
            }
        };

        if holding < self.config.dust_threshold {
            debug!(worker = %worker.address, holding, "Holding below dust threshold; nothing to sell");
            return TradeResult::nothing();
        }

        let slippage_bps = self.liquidation_slippage(acquisition_slippage_bps);
        info!(worker = %worker.address, holding, slippage_bps, "Liquidating position");
        self.swap_exact_in(worker, asset, &self.config.native_mint, holding, slippage_bps, guard)
            .await
    }

    fn liquidation_slippage(&self, acquisition_slippage_bps: u16) -> u16 {
        let floor = self.config.liquidation_slippage_bps;
        if acquisition_slippage_bps > floor {
            warn!(
                liquidation_slippage_bps = floor,
                acquisition_slippage_bps,
                "Liquidation slippage is tighter than acquisition; selling at the acquisition tolerance"
            );
            acquisition_slippage_bps
        } else {
            floor
        }
    }

    async fn swap_exact_in(
        &self,
        worker: &WorkerAccount,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
        guard: &dyn SubmitGuard,
    ) -> TradeResult {
        let (quote, unsigned) = match self
            .prepare_swap(worker, input_mint, output_mint, amount, slippage_bps)
            .await
        {
            Ok(prepared) => prepared,
            Err(reason) => return TradeResult::failed(amount, reason),
        };

        if let Err(e) = guard.ensure_held().await {
            warn!(worker = %worker.address, error = %e, "Swap not submitted");
            return TradeResult::failed(amount, e.to_string());
        }

        match ledger::submit_and_confirm(
            self.ledger.as_ref(),
            self.signer.as_ref(),
            &unsigned,
            &worker.credential,
            self.config.confirm_timeout,
        )
        .await
        {
            Ok(tx_ref) => {
                info!(worker = %worker.address, quote = %quote, tx = %tx_ref, "Swap confirmed");
                TradeResult::confirmed(amount, quote.out_amount, tx_ref)
            }
            Err(reason) => {
                warn!(worker = %worker.address, error = %reason, "Swap failed");
                TradeResult::failed(amount, reason)
            }
        }
    }

    /// Quote and build, retrying up to `quote_attempts` times.
    async fn prepare_swap(
        &self,
        worker: &WorkerAccount,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<(Quote, UnsignedTx), String> {
        let attempts = self.config.quote_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.quote_and_build(worker, input_mint, output_mint, amount, slippage_bps).await {
                Ok(prepared) => return Ok(prepared),
                Err(reason) => {
                    warn!(
                        attempt,
                        attempts,
                        provider = self.swap.name(),
                        error = %reason,
                        "Swap preparation failed"
                    );
                    last_error = reason;
                }
            }
            if attempt < attempts && !self.config.retry_backoff.is_zero() {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
        }

        Err(format!("{last_error} (after {attempts} attempts)"))
    }

    async fn quote_and_build(
        &self,
        worker: &WorkerAccount,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<(Quote, UnsignedTx), String> {
        let quote = self
            .swap
            .quote(input_mint, output_mint, amount, slippage_bps)
            .await
            .map_err(|e| format!("quote request failed: {e:#}"))?
            .into_result()
            .map_err(|e| format!("quote rejected: {e}"))?;

        let unsigned = self
            .swap
            .build_swap_transaction(&quote, &worker.address)
            .await
            .map_err(|e| format!("swap build failed: {e:#}"))?;

        Ok((quote, unsigned))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
