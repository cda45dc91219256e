//! Treasury guard.
//!
//! Enforces the reserve floor on the shared funding account and sizes each
//! disbursement. All arithmetic is in lamports; the safety factor is an
//! exact decimal, so no float rounding enters the invariant check.

use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::ledger::{self, LedgerClient, TxSigner};
use crate::types::{RotorError, TreasuryAccount, TxRef};

/// Reserve and sizing policy, in lamports.
#[derive(Debug, Clone)]
pub struct TreasuryPolicy {
    pub min_reserve: u64,
    /// Fraction of the headroom disbursed, in (0, 1]. Absorbs fee variance.
    pub safety_factor: Decimal,
    pub min_viable_trade: u64,
}

pub struct TreasuryGuard {
    account: TreasuryAccount,
    policy: TreasuryPolicy,
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn TxSigner>,
    confirm_timeout: Duration,
}

impl TreasuryGuard {
    pub fn new(
        account: TreasuryAccount,
        policy: TreasuryPolicy,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
        confirm_timeout: Duration,
    ) -> Self {
        Self { account, policy, ledger, signer, confirm_timeout }
    }

    pub fn address(&self) -> &str {
        &self.account.address
    }

    /// Live treasury balance. Never cached.
    pub async fn balance(&self) -> Result<u64, RotorError> {
        self.ledger
            .get_balance(&self.account.address)
            .await
            .map_err(|e| RotorError::Ledger(format!("treasury balance: {e:#}")))
    }

    /// `floor((balance - reserve) * safety_factor)`.
    ///
    /// `InsufficientFunds` unless the headroom above the reserve exceeds the
    /// minimum viable trade and the floored amount is non-zero.
    pub fn compute_disbursement(&self, current_balance: u64) -> Result<u64, RotorError> {
        let insufficient = || RotorError::InsufficientFunds {
            balance: current_balance,
            reserve: self.policy.min_reserve,
            min_trade: self.policy.min_viable_trade,
        };

        let headroom = current_balance
            .checked_sub(self.policy.min_reserve)
            .ok_or_else(insufficient)?;
        if headroom <= self.policy.min_viable_trade {
            return Err(insufficient());
        }

        let amount = (Decimal::from(headroom) * self.policy.safety_factor)
            .floor()
            .to_u64()
            .unwrap_or(0)
            .min(headroom);
        if amount == 0 {
            return Err(insufficient());
        }

        debug!(current_balance, headroom, amount, "Disbursement computed");
        Ok(amount)
    }

    /// Confirmed transfer from the treasury to `to`.
    pub async fn transfer(&self, to: &str, amount: u64) -> Result<TxRef, RotorError> {
        let tx = ledger::transfer(
            self.ledger.as_ref(),
            self.signer.as_ref(),
            &self.account.address,
            &self.account.credential,
            to,
            amount,
            self.confirm_timeout,
        )
        .await?;
        info!(to, amount, tx = %tx, "Treasury disbursement confirmed");
        Ok(tx)
    }
}
