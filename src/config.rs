//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (signing keys, bot tokens, the trigger secret) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.
//! Native-currency amounts are written in SOL and converted to lamports
//! exactly once, here.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::ledger::rpc::RPC_TIMEOUT;
use crate::swap::jupiter::SWAP_TIMEOUT;
use crate::types::{sol_to_lamports, RotorError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub treasury: TreasuryConfig,
    pub trading: TradingConfig,
    pub ledger: LedgerConfig,
    pub swap: SwapConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Fixed worker-pool size. The persisted pool must have at least this many.
    pub pool_size: usize,
    pub hold_window_secs: u64,
    pub cycle_window_secs: u64,
    /// Must cover the slowest possible step; see `AppConfig::worst_case_step`.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    /// Internal ticker period. 0 = external trigger only.
    #[serde(default)]
    pub tick_interval_secs: u64,
}

fn default_lease_ttl() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct TreasuryConfig {
    pub address: String,
    pub secret_key_env: String,
    /// Reserve floor in SOL.
    pub min_reserve: Decimal,
    /// Fraction of the headroom disbursed per cycle (0, 1].
    pub safety_factor: Decimal,
    /// Smallest disbursement worth trading, in SOL.
    pub min_viable_trade: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    /// Mint used as the funding side of every swap (wrapped SOL).
    #[serde(default = "default_native_mint")]
    pub native_mint: String,
    /// Native currency held back from the buy for network fees, in SOL.
    pub buy_fee_buffer: Decimal,
    /// Native currency left in a worker after a sweep, in SOL.
    pub rent_buffer: Decimal,
    /// Liquidation slippage; wider than acquisition so sells are not blocked.
    pub liquidation_slippage_bps: u16,
    /// Token holdings below this (smallest units) are not worth selling.
    pub dust_threshold: u64,
    #[serde(default = "default_quote_attempts")]
    pub quote_attempts: u32,
    /// Pause before quote retry `n` is `n` times this.
    #[serde(default = "default_quote_backoff")]
    pub quote_backoff_ms: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_settle_delay")]
    pub funding_settle_ms: u64,
}

fn default_native_mint() -> String {
    "So11111111111111111111111111111111111111112".to_string()
}

fn default_quote_attempts() -> u32 {
    3
}

fn default_quote_backoff() -> u64 {
    500
}

fn default_confirm_timeout() -> u64 {
    60
}

fn default_settle_delay() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1_500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwapConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub trigger_secret_env: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

const MAX_QUOTE_ATTEMPTS: u32 = 10;

/// Lamport-denominated limits derived from the decimal config values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min_reserve: u64,
    pub min_viable_trade: u64,
    pub buy_fee_buffer: u64,
    pub rent_buffer: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the state machine cannot run with.
    pub fn validate(&self) -> Result<(), RotorError> {
        if self.bot.pool_size == 0 {
            return Err(RotorError::Configuration("bot.pool_size must be at least 1".into()));
        }
        if self.bot.hold_window_secs == 0 || self.bot.cycle_window_secs == 0 {
            return Err(RotorError::Configuration("hold and cycle windows must be non-zero".into()));
        }
        if self.bot.lease_ttl_secs == 0 {
            return Err(RotorError::Configuration("bot.lease_ttl_secs must be non-zero".into()));
        }
        if self.treasury.safety_factor <= Decimal::ZERO || self.treasury.safety_factor > Decimal::ONE {
            return Err(RotorError::Configuration(format!(
                "treasury.safety_factor must be in (0, 1], got {}",
                self.treasury.safety_factor
            )));
        }
        if !(1..=MAX_QUOTE_ATTEMPTS).contains(&self.trading.quote_attempts) {
            return Err(RotorError::Configuration(format!(
                "trading.quote_attempts must be between 1 and {MAX_QUOTE_ATTEMPTS}"
            )));
        }
        self.limits()?;
        let worst = self.worst_case_step();
        if Duration::from_secs(self.bot.lease_ttl_secs) < worst {
            return Err(RotorError::Configuration(format!(
                "bot.lease_ttl_secs = {} is shorter than the slowest possible step ({}s)",
                self.bot.lease_ttl_secs,
                worst.as_secs_f64().ceil()
            )));
        }
        Ok(())
    }

    /// Longest a single step can run when every remote call hits its
    /// timeout. Datastore calls are local and not counted.
    pub fn worst_case_step(&self) -> Duration {
        let rpc = RPC_TIMEOUT;
        // The last status poll can start just before the deadline.
        let confirmation = self.confirm_timeout() + rpc;
        // blockhash, submit, confirm
        let submission = rpc * 2 + confirmation;

        let attempts = self.trading.quote_attempts;
        let backoff_units = attempts * attempts.saturating_sub(1) / 2;
        let swap = SWAP_TIMEOUT * 2 * attempts + self.quote_backoff() * backoff_units + submission;

        // treasury balance, funding, settle, worker balance, buy
        let enter = rpc + submission + self.funding_settle_delay() + rpc + swap;
        // holding, sell, worker balance, sweep
        let exit = rpc + swap + rpc + submission;
        enter.max(exit)
    }

    /// Convert the SOL-denominated settings to lamports.
    pub fn limits(&self) -> Result<Limits, RotorError> {
        let convert = |name: &str, value: Decimal| {
            sol_to_lamports(value)
                .ok_or_else(|| RotorError::Configuration(format!("{name} out of range: {value}")))
        };
        Ok(Limits {
            min_reserve: convert("treasury.min_reserve", self.treasury.min_reserve)?,
            min_viable_trade: convert("treasury.min_viable_trade", self.treasury.min_viable_trade)?,
            buy_fee_buffer: convert("trading.buy_fee_buffer", self.trading.buy_fee_buffer)?,
            rent_buffer: convert("trading.rent_buffer", self.trading.rent_buffer)?,
        })
    }

    pub fn hold_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bot.hold_window_secs as i64)
    }

    pub fn cycle_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bot.cycle_window_secs as i64)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bot.lease_ttl_secs as i64)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.trading.confirm_timeout_secs)
    }

    pub fn funding_settle_delay(&self) -> Duration {
        Duration::from_millis(self.trading.funding_settle_ms)
    }

    pub fn quote_backoff(&self) -> Duration {
        Duration::from_millis(self.trading.quote_backoff_ms)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
