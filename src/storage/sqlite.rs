//! SQLite-backed cycle store.
//!
//! Timestamps are stored as epoch milliseconds so lease expiry can be
//! compared inside the conditional `UPDATE`. The lease claim and the commit
//! are each a single statement, which SQLite executes atomically.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::CycleStore;
use crate::types::{
    Credential, CycleConfig, CycleState, TradeKind, TradeLedgerEntry, TradeStatus, WorkerAccount,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cycle_config (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        target_asset TEXT NOT NULL,
        slippage_bps INTEGER NOT NULL,
        is_running INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS cycle_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        phase TEXT NOT NULL,
        active_worker_index INTEGER NOT NULL,
        phase_started_at INTEGER NOT NULL,
        version INTEGER NOT NULL,
        lease_owner TEXT,
        lease_expires_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS worker_accounts (
        idx INTEGER PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        secret_key TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS trade_ledger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        worker_address TEXT NOT NULL,
        kind TEXT NOT NULL,
        amount INTEGER NOT NULL,
        status TEXT NOT NULL,
        external_ref TEXT,
        error TEXT,
        created_at INTEGER NOT NULL
    )",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true);

        // Each in-memory connection is its own database; keep exactly one.
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {database_url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, "Cycle store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    async fn ensure_state(&self, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO cycle_state
                (id, phase, active_worker_index, phase_started_at, version)
             VALUES (1, 'IDLE', 0, ?, 0)",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to initialise cycle state")?;
        Ok(())
    }

    async fn fetch_state(&self) -> Result<CycleState> {
        let row = sqlx::query(
            "SELECT phase, active_worker_index, phase_started_at, version, lease_owner, lease_expires_at
             FROM cycle_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to read cycle state")?;
        state_from_row(&row)
    }

    /// Write the operator config (external control surface).
    pub async fn save_config(&self, config: &CycleConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO cycle_config (id, target_asset, slippage_bps, is_running)
             VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                target_asset = excluded.target_asset,
                slippage_bps = excluded.slippage_bps,
                is_running = excluded.is_running",
        )
        .bind(&config.target_asset)
        .bind(config.slippage_bps as i64)
        .bind(config.is_running)
        .execute(&self.pool)
        .await
        .context("Failed to save cycle config")?;
        Ok(())
    }

    /// Register a worker. Workers are immutable once created.
    pub async fn insert_worker(&self, index: usize, address: &str, credential: &Credential) -> Result<()> {
        sqlx::query("INSERT INTO worker_accounts (idx, address, secret_key) VALUES (?, ?, ?)")
            .bind(index as i64)
            .bind(address)
            .bind(credential.expose())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert worker #{index}"))?;
        Ok(())
    }
}

#[async_trait]
impl CycleStore for SqliteStore {
    async fn load_config(&self) -> Result<Option<CycleConfig>> {
        let row = sqlx::query("SELECT target_asset, slippage_bps, is_running FROM cycle_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read cycle config")?;

        row.map(|r| -> Result<CycleConfig> {
            let slippage: i64 = r.try_get("slippage_bps")?;
            Ok(CycleConfig {
                target_asset: r.try_get("target_asset")?,
                slippage_bps: u16::try_from(slippage).context("slippage_bps out of range")?,
                is_running: r.try_get("is_running")?,
            })
        })
        .transpose()
    }

    async fn load_state(&self, now: DateTime<Utc>) -> Result<CycleState> {
        self.ensure_state(now).await?;
        self.fetch_state().await
    }

    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Option<CycleState>> {
        self.ensure_state(now).await?;

        let claimed = sqlx::query(
            "UPDATE cycle_state SET lease_owner = ?, lease_expires_at = ?
             WHERE id = 1 AND (lease_owner IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= ?)",
        )
        .bind(owner)
        .bind((now + ttl).timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to claim lease")?
        .rows_affected();

        if claimed == 0 {
            debug!(owner, "Lease held elsewhere");
            return Ok(None);
        }
        Ok(Some(self.fetch_state().await?))
    }

    async fn renew_lease(&self, owner: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool> {
        let renewed = sqlx::query(
            "UPDATE cycle_state SET lease_expires_at = ?
             WHERE id = 1 AND lease_owner = ?",
        )
        .bind((now + ttl).timestamp_millis())
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to renew lease")?
        .rows_affected();

        Ok(renewed == 1)
    }

    async fn commit_state(&self, owner: &str, state: &CycleState) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE cycle_state SET
                phase = ?, active_worker_index = ?, phase_started_at = ?,
                version = version + 1, lease_owner = NULL, lease_expires_at = NULL
             WHERE id = 1 AND lease_owner = ?",
        )
        .bind(state.phase.as_str())
        .bind(state.active_worker_index as i64)
        .bind(state.phase_started_at.timestamp_millis())
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to commit cycle state")?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cycle_state SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = 1 AND lease_owner = ?",
        )
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to release lease")?;
        Ok(())
    }

    async fn load_workers(&self) -> Result<Vec<WorkerAccount>> {
        let rows = sqlx::query("SELECT idx, address, secret_key FROM worker_accounts ORDER BY idx ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read worker accounts")?;

        rows.iter()
            .map(|r| -> Result<WorkerAccount> {
                let idx: i64 = r.try_get("idx")?;
                let secret: String = r.try_get("secret_key")?;
                Ok(WorkerAccount {
                    index: usize::try_from(idx).context("negative worker index")?,
                    address: r.try_get("address")?,
                    credential: Credential::new(secret),
                })
            })
            .collect()
    }

    async fn append_ledger(&self, entry: &TradeLedgerEntry) -> Result<()> {
        let amount = i64::try_from(entry.amount)
            .with_context(|| format!("Ledger amount {} does not fit the amount column", entry.amount))?;
        sqlx::query(
            "INSERT INTO trade_ledger
                (worker_address, kind, amount, status, external_ref, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.worker_address)
        .bind(entry.kind.as_str())
        .bind(amount)
        .bind(entry.status.as_str())
        .bind(entry.external_ref.as_deref())
        .bind(entry.error.as_deref())
        .bind(entry.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to append ledger entry")?;
        Ok(())
    }

    async fn recent_ledger(&self, limit: usize) -> Result<Vec<TradeLedgerEntry>> {
        let rows = sqlx::query(
            "SELECT worker_address, kind, amount, status, external_ref, error, created_at
             FROM trade_ledger ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read ledger")?;

        rows.iter().map(ledger_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("Invalid timestamp: {ms}"))
}

fn state_from_row(row: &SqliteRow) -> Result<CycleState> {
    let phase: String = row.try_get("phase")?;
    let index: i64 = row.try_get("active_worker_index")?;
    let started: i64 = row.try_get("phase_started_at")?;
    let expires: Option<i64> = row.try_get("lease_expires_at")?;

    Ok(CycleState {
        phase: phase.parse()?,
        active_worker_index: usize::try_from(index).context("negative worker index")?,
        phase_started_at: millis_to_datetime(started)?,
        version: row.try_get("version")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: expires.map(millis_to_datetime).transpose()?,
    })
}

fn ledger_from_row(row: &SqliteRow) -> Result<TradeLedgerEntry> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let amount: i64 = row.try_get("amount")?;
    let created: i64 = row.try_get("created_at")?;

    Ok(TradeLedgerEntry {
        worker_address: row.try_get("worker_address")?,
        kind: kind.parse::<TradeKind>()?,
        amount: u64::try_from(amount).with_context(|| format!("Negative ledger amount: {amount}"))?,
        status: status.parse::<TradeStatus>()?,
        external_ref: row.try_get("external_ref")?,
        error: row.try_get("error")?,
        created_at: millis_to_datetime(created)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
