//! Ledger-network access.
//!
//! Defines the `LedgerClient` and `TxSigner` traits the cycle components
//! talk to, plus the confirmed native-transfer helper shared by the
//! treasury guard and the settlement agent.
//! - `rpc` — Solana JSON-RPC client over `reqwest`
//! - `signer` — `solana-sdk` keypair signing

pub mod rpc;
pub mod signer;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::{Credential, RotorError, SignedTx, TxRef, UnsignedTx};

/// Abstraction over the ledger network RPC.
///
/// Balances are always read live; implementors must not cache them.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Native-currency balance of `address`, in smallest units.
    async fn get_balance(&self, address: &str) -> Result<u64>;

    /// Balance of token `mint` held by `owner`, in the token's smallest units.
    /// Zero when the owner has no account for the mint.
    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64>;

    /// Build an unsigned native transfer paid for by `from`.
    async fn build_transfer(&self, from: &str, to: &str, amount: u64) -> Result<UnsignedTx>;

    /// Submit a signed transaction. Returns its reference without waiting.
    async fn submit(&self, tx: &SignedTx) -> Result<TxRef>;

    /// Poll until `tx` is confirmed, failed, or `timeout` elapses.
    /// `Ok(false)` means failed on-chain or timed out.
    async fn confirm(&self, tx: &TxRef, timeout: Duration) -> Result<bool>;
}

/// Signs serialized transactions with an account credential.
pub trait TxSigner: Send + Sync {
    fn sign(&self, tx: &UnsignedTx, credential: &Credential) -> Result<SignedTx>;
}

/// Sign, submit, and confirm an already-built transaction.
///
/// Shared by transfers and swaps. Never retries: once submitted, a retry
/// could land twice.
pub async fn submit_and_confirm(
    ledger: &dyn LedgerClient,
    signer: &dyn TxSigner,
    tx: &UnsignedTx,
    credential: &Credential,
    timeout: Duration,
) -> Result<TxRef, String> {
    let signed = signer.sign(tx, credential).map_err(|e| format!("signing failed: {e:#}"))?;
    let tx_ref = ledger.submit(&signed).await.map_err(|e| format!("submit failed: {e:#}"))?;

    match ledger.confirm(&tx_ref, timeout).await {
        Ok(true) => Ok(tx_ref),
        Ok(false) => Err(format!("transaction {tx_ref} not confirmed within {}s", timeout.as_secs())),
        Err(e) => Err(format!("confirmation of {tx_ref} failed: {e:#}")),
    }
}

/// A single confirmed native transfer. Not retried here; the caller decides
/// whether a retry should move a fresh amount.
pub async fn transfer(
    ledger: &dyn LedgerClient,
    signer: &dyn TxSigner,
    from_address: &str,
    from_credential: &Credential,
    to: &str,
    amount: u64,
    timeout: Duration,
) -> Result<TxRef, RotorError> {
    let unsigned = ledger
        .build_transfer(from_address, to, amount)
        .await
        .map_err(|e| RotorError::Transfer(format!("build failed: {e:#}")))?;

    match submit_and_confirm(ledger, signer, &unsigned, from_credential, timeout).await {
        Ok(tx_ref) => {
            info!(from = from_address, to, amount, tx = %tx_ref, "Transfer confirmed");
            Ok(tx_ref)
        }
        Err(reason) => {
            warn!(from = from_address, to, amount, error = %reason, "Transfer failed");
            Err(RotorError::Transfer(reason))
        }
    }
}
