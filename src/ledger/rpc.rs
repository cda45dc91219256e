//! Solana JSON-RPC ledger client.
//!
//! Thin typed wrapper over the handful of RPC methods the cycle needs:
//! `getBalance`, `getTokenAccountsByOwner`, `getLatestBlockhash`,
//! `sendTransaction` and `getSignatureStatuses`. Responses are validated
//! once here and surfaced as plain integers / references.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{signer, LedgerClient};
use crate::types::{SignedTx, TxRef, UnsignedTx};

const COMMITMENT: &str = "confirmed";

// ---------------------------------------------------------------------------
// RPC envelope types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct Blockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    account: TokenAccountData,
}

#[derive(Debug, Deserialize)]
struct TokenAccountData {
    data: Value,
}

/// What `getSignatureStatuses` said about one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Unknown to the cluster yet, or below the target commitment.
    Pending,
    Confirmed,
    Failed(String),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Per-request timeout for every RPC call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RpcLedgerClient {
    http: Client,
    url: String,
    poll_interval: Duration,
}

impl RpcLedgerClient {
    pub fn new(url: &str, poll_interval: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(RPC_TIMEOUT)
            .user_agent("ROTOR/0.1.0 (wallet-rotation)")
            .build()
            .context("Failed to build HTTP client for ledger RPC")?;

        Ok(Self {
            http,
            url: url.trim().to_string(),
            poll_interval,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, "Ledger RPC call");

        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("RPC request failed: {method}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("RPC {method} HTTP {status}: {body}");
        }

        let body: RpcResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Invalid RPC response for {method}"))?;

        if let Some(err) = body.error {
            anyhow::bail!("RPC {method} error {}: {}", err.code, err.message);
        }
        body.result
            .with_context(|| format!("RPC {method} returned no result"))
    }

    async fn latest_blockhash(&self) -> Result<String> {
        let resp: WithContext<Blockhash> = self
            .call("getLatestBlockhash", json!([{ "commitment": COMMITMENT }]))
            .await?;
        Ok(resp.value.blockhash)
    }

    async fn signature_status(&self, tx: &TxRef) -> Result<SignatureStatus> {
        let resp: WithContext<Vec<Value>> = self
            .call(
                "getSignatureStatuses",
                json!([[tx.0], { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(parse_signature_status(resp.value.first().unwrap_or(&Value::Null)))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_balance(&self, address: &str) -> Result<u64> {
        let resp: WithContext<u64> = self
            .call("getBalance", json!([address, { "commitment": COMMITMENT }]))
            .await?;
        Ok(resp.value)
    }

    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64> {
        let resp: WithContext<Vec<TokenAccount>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    owner,
                    { "mint": mint },
                    { "encoding": "jsonParsed", "commitment": COMMITMENT }
                ]),
            )
            .await?;

        let mut total: u64 = 0;
        for account in &resp.value {
            total = total.saturating_add(parse_token_amount(&account.account.data)?);
        }
        Ok(total)
    }

    async fn build_transfer(&self, from: &str, to: &str, amount: u64) -> Result<UnsignedTx> {
        let blockhash = self.latest_blockhash().await?;
        signer::encode_transfer(from, to, amount, &blockhash)
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxRef> {
        let encoded = BASE64.encode(&tx.0);
        let signature: String = self
            .call(
                "sendTransaction",
                json!([
                    encoded,
                    {
                        "encoding": "base64",
                        "skipPreflight": false,
                        "preflightCommitment": COMMITMENT,
                        "maxRetries": 3
                    }
                ]),
            )
            .await?;
        Ok(TxRef(signature))
    }

    async fn confirm(&self, tx: &TxRef, timeout: Duration) -> Result<bool> {
        let started = Instant::now();
        loop {
            match self.signature_status(tx).await {
                Ok(SignatureStatus::Confirmed) => return Ok(true),
                Ok(SignatureStatus::Failed(reason)) => {
                    warn!(tx = %tx, reason = %reason, "Transaction failed on-chain");
                    return Ok(false);
                }
                Ok(SignatureStatus::Pending) => {}
                // A flaky status query is not a failed transaction; keep polling.
                Err(e) => debug!(tx = %tx, error = %e, "Status query failed"),
            }

            if started.elapsed() + self.poll_interval > timeout {
                warn!(tx = %tx, timeout_secs = timeout.as_secs(), "Confirmation timed out");
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Interpret one entry of a `getSignatureStatuses` result.
pub fn parse_signature_status(entry: &Value) -> SignatureStatus {
    if entry.is_null() {
        return SignatureStatus::Pending;
    }
    if let Some(err) = entry.get("err") {
        if !err.is_null() {
            return SignatureStatus::Failed(err.to_string());
        }
    }
    match entry.get("confirmationStatus").and_then(Value::as_str) {
        Some("confirmed") | Some("finalized") => SignatureStatus::Confirmed,
        _ => SignatureStatus::Pending,
    }
}

/// Extract `parsed.info.tokenAmount.amount` from a jsonParsed token account.
fn parse_token_amount(data: &Value) -> Result<u64> {
    let amount = data
        .pointer("/parsed/info/tokenAmount/amount")
        .and_then(Value::as_str)
        .context("Token account missing tokenAmount.amount")?;
    amount
        .parse::<u64>()
        .with_context(|| format!("Invalid token amount: {amount}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
