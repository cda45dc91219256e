//! Shared types for the ROTOR orchestrator.
//!
//! These types form the data model used across all modules: the persisted
//! cycle records, worker accounts, ledger entries, and the typed results
//! returned by the executor and settlement components.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Smallest-unit multiplier for the native currency (lamports per SOL).
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Amount conversions (boundary only)
// ---------------------------------------------------------------------------

/// Convert a decimal native-currency amount into smallest units.
/// Fractions of a lamport are truncated. Returns `None` for negative or
/// out-of-range values.
pub fn sol_to_lamports(sol: Decimal) -> Option<u64> {
    if sol.is_sign_negative() {
        return None;
    }
    (sol * Decimal::from(LAMPORTS_PER_SOL)).trunc().to_u64()
}

/// Convert smallest units into a decimal value for display.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

// ---------------------------------------------------------------------------
// Cycle records
// ---------------------------------------------------------------------------

/// The orchestrator's only persisted control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Holding,
    Cooling,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Holding => "HOLDING",
            Phase::Cooling => "COOLING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(Phase::Idle),
            "HOLDING" => Ok(Phase::Holding),
            "COOLING" => Ok(Phase::Cooling),
            _ => Err(anyhow::anyhow!("Unknown phase: {s}")),
        }
    }
}

/// Operator-controlled settings, mutated by an external control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Mint of the asset each worker buys and sells.
    pub target_asset: String,
    /// Acquisition slippage tolerance in basis points.
    pub slippage_bps: u16,
    pub is_running: bool,
}

/// Persisted state machine record. Owned exclusively by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    pub phase: Phase,
    pub active_worker_index: usize,
    pub phase_started_at: DateTime<Utc>,
    /// Bumped on every committed transition.
    pub version: i64,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl CycleState {
    /// State written on the very first run.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Idle,
            active_worker_index: 0,
            phase_started_at: now,
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    /// Time spent in the current phase.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.phase_started_at
    }

    /// Whether a lease is held by someone at `now`.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            _ => false,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} worker=#{} since {} (v{})",
            self.phase,
            self.active_worker_index,
            self.phase_started_at.to_rfc3339(),
            self.version,
        )
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// An opaque signing secret (base58-encoded keypair). Never printed.
#[derive(Clone)]
pub struct Credential(Arc<SecretString>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::new(secret.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// A disposable worker: one position at a time while it is active.
#[derive(Debug, Clone)]
pub struct WorkerAccount {
    pub index: usize,
    pub address: String,
    pub credential: Credential,
}

/// The shared funding account.
#[derive(Debug, Clone)]
pub struct TreasuryAccount {
    pub address: String,
    pub credential: Credential,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// Treasury to worker transfer.
    Fund,
    Buy,
    Sell,
    /// Worker to treasury transfer.
    Sweep,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Fund => "fund",
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
            TradeKind::Sweep => "sweep",
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fund" => Ok(TradeKind::Fund),
            "buy" => Ok(TradeKind::Buy),
            "sell" => Ok(TradeKind::Sell),
            "sweep" => Ok(TradeKind::Sweep),
            _ => Err(anyhow::anyhow!("Unknown trade kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Success,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Success => "success",
            TradeStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TradeStatus::Success),
            "failed" => Ok(TradeStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown trade status: {s}")),
        }
    }
}

/// Append-only audit record. Never read for control decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLedgerEntry {
    pub worker_address: String,
    pub kind: TradeKind,
    /// Smallest units of the input side of the operation.
    pub amount: u64,
    pub status: TradeStatus,
    pub external_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TradeLedgerEntry {
    pub fn from_trade(worker_address: &str, kind: TradeKind, result: &TradeResult) -> Self {
        Self {
            worker_address: worker_address.to_string(),
            kind,
            amount: result.amount_in,
            status: if result.success { TradeStatus::Success } else { TradeStatus::Failed },
            external_ref: result.tx_ref.as_ref().map(|t| t.0.clone()),
            error: result.error.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn from_transfer(
        worker_address: &str,
        kind: TradeKind,
        amount: u64,
        outcome: &Result<TxRef, String>,
    ) -> Self {
        let (status, external_ref, error) = match outcome {
            Ok(tx) => (TradeStatus::Success, Some(tx.0.clone()), None),
            Err(e) => (TradeStatus::Failed, None, Some(e.clone())),
        };
        Self {
            worker_address: worker_address.to_string(),
            kind,
            amount,
            status,
            external_ref,
            error,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for TradeLedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} amount={} ref={}",
            self.status.as_str(),
            self.kind,
            self.worker_address,
            self.amount,
            self.external_ref.as_deref().unwrap_or("-"),
        )?;
        if let Some(err) = &self.error {
            write!(f, " error={err}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Signature / identifier of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized transaction awaiting signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx(pub Vec<u8>);

/// Serialized, fully signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx(pub Vec<u8>);

// ---------------------------------------------------------------------------
// Component results
// ---------------------------------------------------------------------------

/// Outcome of an acquire or liquidate attempt. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeResult {
    pub success: bool,
    pub amount_in: u64,
    /// Quoted output amount (smallest units of the output asset).
    pub amount_out: u64,
    pub tx_ref: Option<TxRef>,
    pub error: Option<String>,
}

impl TradeResult {
    pub fn confirmed(amount_in: u64, amount_out: u64, tx_ref: TxRef) -> Self {
        Self { success: true, amount_in, amount_out, tx_ref: Some(tx_ref), error: None }
    }

    pub fn failed(amount_in: u64, error: impl Into<String>) -> Self {
        Self { success: false, amount_in, amount_out: 0, tx_ref: None, error: Some(error.into()) }
    }

    /// Successful no-op (nothing to trade).
    pub fn nothing() -> Self {
        Self { success: true, amount_in: 0, amount_out: 0, tx_ref: None, error: None }
    }
}

/// Outcome of sweeping a worker back to the treasury.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    pub amount: u64,
    pub tx_ref: Option<TxRef>,
    pub error: Option<String>,
}

impl SweepResult {
    pub fn nothing() -> Self {
        Self { amount: 0, tx_ref: None, error: None }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Step report
// ---------------------------------------------------------------------------

/// Status returned to the trigger caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Halted,
    NotRunning,
    /// Another invocation holds the lease.
    Skipped,
    Error,
}

impl StepStatus {
    /// Process exit code for the CLI trigger.
    pub fn exit_code(&self) -> i32 {
        match self {
            StepStatus::Ok | StepStatus::NotRunning | StepStatus::Skipped => 0,
            StepStatus::Halted => 2,
            StepStatus::Error => 1,
        }
    }
}

/// Why a step halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    Configuration,
    InsufficientFunds,
}

/// What the step actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    None,
    EnterCycle,
    ExitCycle,
    /// Funding transfer failed; phase left as-is for the next invocation.
    FundingFailed,
    Wait,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub status: StepStatus,
    pub phase: Phase,
    pub active_worker_index: usize,
    pub action: StepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepReport {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} phase={} worker=#{} action={:?}",
            self.status, self.phase, self.active_worker_index, self.action,
        )?;
        if let Some(secs) = self.remaining_secs {
            write!(f, " remaining={secs}s")?;
        }
        if let Some(msg) = &self.message {
            write!(f, " ({msg})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for ROTOR.
#[derive(Debug, thiserror::Error)]
pub enum RotorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient funds: balance {balance}, reserve {reserve}, minimum trade {min_trade}")]
    InsufficientFunds { balance: u64, reserve: u64, min_trade: u64 },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Swap error: {0}")]
    Swap(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lease lost (owner {0})")]
    LeaseLost(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
