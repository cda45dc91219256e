//! ROTOR — wallet-rotation trading cycle orchestrator
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the ledger, swap and store adapters into the cycle scheduler,
//! and runs the requested command:
//!
//! ```text
//! rotor [serve]                      trigger server and/or internal ticker
//! rotor step                         run one step, exit 0 / 2 (halted) / 1 (error)
//! rotor import-workers <keys.json>   register the worker pool
//! rotor configure <mint> <bps>       write the cycle config
//! rotor start | stop                 toggle is_running
//! ```

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use rotor::api::{self, ApiState};
use rotor::config::AppConfig;
use rotor::engine::{
    CycleScheduler, ExecutorConfig, SchedulerConfig, SettlementAgent, TradeExecutor, TreasuryGuard,
    TreasuryPolicy, WorkerPool,
};
use rotor::ledger::rpc::RpcLedgerClient;
use rotor::ledger::signer::{address_of, KeypairSigner};
use rotor::ledger::{LedgerClient, TxSigner};
use rotor::notify::telegram::TelegramNotifier;
use rotor::notify::{NoopNotifier, Notifier};
use rotor::storage::sqlite::SqliteStore;
use rotor::storage::CycleStore;
use rotor::swap::jupiter::JupiterClient;
use rotor::types::{
    CycleConfig, CycleState, Credential, HaltReason, RotorError, StepAction, StepReport,
    StepStatus, TreasuryAccount,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path = std::env::var("ROTOR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("serve");

    info!(
        bot = %cfg.bot.name,
        command,
        pool_size = cfg.bot.pool_size,
        hold_window_secs = cfg.bot.hold_window_secs,
        cycle_window_secs = cfg.bot.cycle_window_secs,
        "ROTOR starting up"
    );

    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);

    match command {
        "serve" => serve(&cfg, store).await,
        "step" => {
            let report = run_single_step(&cfg, store).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(report.status.exit_code());
        }
        "import-workers" => {
            let path = args.get(1).context("usage: rotor import-workers <keys.json>")?;
            import_workers(&store, path).await
        }
        "configure" => {
            let (Some(asset), Some(bps)) = (args.get(1), args.get(2)) else {
                bail!("usage: rotor configure <target-mint> <slippage-bps>");
            };
            let slippage_bps: u16 = bps.parse().with_context(|| format!("Invalid slippage: {bps}"))?;
            if slippage_bps > cfg.trading.liquidation_slippage_bps {
                warn!(
                    slippage_bps,
                    liquidation_slippage_bps = cfg.trading.liquidation_slippage_bps,
                    "Acquisition slippage exceeds liquidation slippage; sells will use the acquisition tolerance"
                );
            }
            let is_running = store.load_config().await?.is_some_and(|c| c.is_running);
            store
                .save_config(&CycleConfig { target_asset: asset.clone(), slippage_bps, is_running })
                .await?;
            info!(target_asset = %asset, slippage_bps, is_running, "Cycle config written");
            Ok(())
        }
        "start" | "stop" => {
            let Some(mut config) = store.load_config().await? else {
                bail!("No cycle config yet; run `rotor configure` first");
            };
            config.is_running = command == "start";
            store.save_config(&config).await?;
            info!(is_running = config.is_running, "Cycle run flag updated");
            Ok(())
        }
        other => bail!("Unknown command: {other}"),
    }
}

/// Run the trigger server and/or the internal ticker until Ctrl+C.
async fn serve(cfg: &AppConfig, store: Arc<SqliteStore>) -> Result<()> {
    let scheduler = Arc::new(build_scheduler(cfg, store).await?);

    if !cfg.server.enabled && cfg.bot.tick_interval_secs == 0 {
        bail!("Nothing to run: enable [server] or set bot.tick_interval_secs");
    }

    if cfg.server.enabled {
        let secret = AppConfig::resolve_env(&cfg.server.trigger_secret_env)?;
        if secret.trim().is_empty() {
            bail!("{} is empty; refusing to expose the trigger", cfg.server.trigger_secret_env);
        }
        let state = Arc::new(ApiState::new(scheduler.clone(), SecretString::new(secret)));
        let port = cfg.server.port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, port).await {
                error!(error = %e, "Trigger server stopped");
            }
        });
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if cfg.bot.tick_interval_secs == 0 {
        info!("Waiting for external triggers. Press Ctrl+C to stop.");
        shutdown.await.context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received.");
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.bot.tick_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_secs = cfg.bot.tick_interval_secs,
        "Entering tick loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = scheduler.step().await;
                log_step_report(&report);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("ROTOR shut down cleanly.");
    Ok(())
}

/// One step for the CLI trigger. Wiring failures become a report so the
/// caller always gets a status and an exit code.
async fn run_single_step(cfg: &AppConfig, store: Arc<SqliteStore>) -> StepReport {
    match build_scheduler(cfg, store.clone()).await {
        Ok(scheduler) => {
            let report = scheduler.step().await;
            log_step_report(&report);
            report
        }
        Err(e) => {
            let (status, halt_reason) = match e.downcast_ref::<RotorError>() {
                Some(RotorError::Configuration(_)) => (StepStatus::Halted, Some(HaltReason::Configuration)),
                _ => (StepStatus::Error, None),
            };
            error!(error = %e, "Could not build the scheduler");
            let state = store
                .load_state(chrono::Utc::now())
                .await
                .unwrap_or_else(|_| CycleState::initial(chrono::Utc::now()));
            StepReport {
                status,
                phase: state.phase,
                active_worker_index: state.active_worker_index,
                action: StepAction::None,
                halt_reason,
                remaining_secs: None,
                message: Some(format!("{e:#}")),
            }
        }
    }
}

/// Wire every adapter into a scheduler. Pool and treasury problems surface
/// as `RotorError::Configuration`.
async fn build_scheduler(cfg: &AppConfig, store: Arc<SqliteStore>) -> Result<CycleScheduler> {
    let limits = cfg.limits()?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedgerClient::new(
        &cfg.ledger.rpc_url,
        Duration::from_millis(cfg.ledger.poll_interval_ms),
    )?);
    let signer: Arc<dyn TxSigner> = Arc::new(KeypairSigner);

    let swap_key = cfg.swap.api_key_env.as_deref().and_then(|env| std::env::var(env).ok());
    let swap = Arc::new(JupiterClient::new(&cfg.swap.base_url, swap_key)?);

    // Treasury credential must match the configured address.
    let treasury_secret = AppConfig::resolve_env(&cfg.treasury.secret_key_env)
        .map_err(|e| RotorError::Configuration(format!("{e:#}")))?;
    let treasury_credential = Credential::new(treasury_secret);
    let derived = address_of(&treasury_credential)
        .map_err(|e| RotorError::Configuration(format!("treasury key: {e:#}")))?;
    if derived != cfg.treasury.address {
        return Err(RotorError::Configuration(format!(
            "treasury key belongs to {derived}, not {}",
            cfg.treasury.address
        ))
        .into());
    }

    let pool = WorkerPool::load(store.as_ref(), cfg.bot.pool_size).await?;

    let treasury = TreasuryGuard::new(
        TreasuryAccount { address: cfg.treasury.address.clone(), credential: treasury_credential },
        TreasuryPolicy {
            min_reserve: limits.min_reserve,
            safety_factor: cfg.treasury.safety_factor,
            min_viable_trade: limits.min_viable_trade,
        },
        ledger.clone(),
        signer.clone(),
        cfg.confirm_timeout(),
    );

    let executor = TradeExecutor::new(
        swap,
        ledger.clone(),
        signer.clone(),
        ExecutorConfig {
            native_mint: cfg.trading.native_mint.clone(),
            buy_fee_buffer: limits.buy_fee_buffer,
            liquidation_slippage_bps: cfg.trading.liquidation_slippage_bps,
            dust_threshold: cfg.trading.dust_threshold,
            quote_attempts: cfg.trading.quote_attempts,
            retry_backoff: cfg.quote_backoff(),
            confirm_timeout: cfg.confirm_timeout(),
        },
    );

    let settlement = SettlementAgent::new(ledger.clone(), signer, limits.rent_buffer, cfg.confirm_timeout());

    Ok(CycleScheduler::new(
        store,
        pool,
        treasury,
        executor,
        settlement,
        ledger,
        build_notifier(cfg),
        SchedulerConfig {
            hold_window: cfg.hold_window(),
            cycle_window: cfg.cycle_window(),
            lease_ttl: cfg.lease_ttl(),
            funding_settle_delay: cfg.funding_settle_delay(),
        },
    ))
}

/// Telegram when both env vars resolve, otherwise silent.
fn build_notifier(cfg: &AppConfig) -> Arc<dyn Notifier> {
    let resolve = |env: &Option<String>| env.as_deref().and_then(|name| std::env::var(name).ok());
    match (
        resolve(&cfg.alerts.telegram_bot_token_env),
        resolve(&cfg.alerts.telegram_chat_id_env),
    ) {
        (Some(token), Some(chat_id)) => match TelegramNotifier::new(token, chat_id, &cfg.bot.name) {
            Ok(n) => {
                info!("Telegram notifications enabled");
                Arc::new(n)
            }
            Err(e) => {
                warn!(error = %e, "Telegram notifier unavailable; notifications disabled");
                Arc::new(NoopNotifier)
            }
        },
        _ => {
            info!("No notification channel configured");
            Arc::new(NoopNotifier)
        }
    }
}

/// Register workers from a JSON array of base58 secret keys, in order.
/// Addresses are derived from the keys.
async fn import_workers(store: &SqliteStore, path: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worker key file: {path}"))?;
    let keys: Vec<String> = serde_json::from_str(&contents)
        .with_context(|| format!("{path} must be a JSON array of secret keys"))?;

    let existing = store.load_workers().await?.len();
    for (offset, key) in keys.into_iter().enumerate() {
        let index = existing + offset;
        let credential = Credential::new(key);
        let address = address_of(&credential).with_context(|| format!("Worker key #{offset} is invalid"))?;
        store.insert_worker(index, &address, &credential).await?;
        info!(index, address = %address, "Worker registered");
    }
    Ok(())
}

/// Log a one-line step summary.
fn log_step_report(report: &StepReport) {
    match report.status {
        StepStatus::Error => error!(report = %report, "Step failed"),
        StepStatus::Halted => warn!(report = %report, "Step halted"),
        _ => info!(
            status = ?report.status,
            phase = %report.phase,
            index = report.active_worker_index,
            action = ?report.action,
            "Step complete"
        ),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_env("ROTOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("rotor=info"));

    let json_logging = std::env::var("ROTOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
