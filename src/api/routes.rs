//! Trigger and status route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::engine::CycleScheduler;
use crate::types::{Phase, StepReport, StepStatus, TradeLedgerEntry};

/// Header carrying the shared trigger secret.
pub const SECRET_HEADER: &str = "x-rotor-secret";

const DEFAULT_TRADES_LIMIT: usize = 50;
const MAX_TRADES_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub scheduler: Arc<CycleScheduler>,
    trigger_secret: SecretString,
    pub started_at: DateTime<Utc>,
    pub last_report: RwLock<Option<StepReport>>,
}

impl ApiState {
    pub fn new(scheduler: Arc<CycleScheduler>, trigger_secret: SecretString) -> Self {
        Self {
            scheduler,
            trigger_secret,
            started_at: Utc::now(),
            last_report: RwLock::new(None),
        }
    }

    /// An empty configured secret rejects every caller.
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = self.trigger_secret.expose_secret().as_bytes();
        let Some(given) = headers.get(SECRET_HEADER).map(|v| v.as_bytes()) else {
            return false;
        };
        !expected.is_empty()
            && given.len() == expected.len()
            && given.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub phase: Phase,
    pub active_worker_index: usize,
    pub phase_started_at: DateTime<Utc>,
    pub version: i64,
    pub step_in_progress: bool,
    pub pool_size: usize,
    pub is_running: bool,
    pub target_asset: Option<String>,
    pub last_step: Option<StepReport>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/step
pub async fn post_step(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<StepReport>), ApiError> {
    if !state.authorized(&headers) {
        warn!("Rejected step trigger with a bad secret");
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid trigger secret"));
    }

    let report = state.scheduler.step().await;
    info!(report = %report, "Step triggered over HTTP");
    *state.last_report.write().await = Some(report.clone());

    let code = match report.status {
        StepStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((code, Json(report)))
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let now = Utc::now();
    let store = state.scheduler.store();

    let cycle = store
        .load_state(now)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{e:#}")))?;
    let config = store
        .load_config()
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{e:#}")))?;

    Ok(Json(StatusResponse {
        phase: cycle.phase,
        active_worker_index: cycle.active_worker_index,
        phase_started_at: cycle.phase_started_at,
        version: cycle.version,
        step_in_progress: cycle.is_leased(now),
        pool_size: state.scheduler.pool().size(),
        is_running: config.as_ref().is_some_and(|c| c.is_running),
        target_asset: config.map(|c| c.target_asset),
        last_step: state.last_report.read().await.clone(),
        uptime_secs: (now - state.started_at).num_seconds(),
    }))
}

/// GET /api/trades?limit=N
pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeLedgerEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRADES_LIMIT).min(MAX_TRADES_LIMIT);
    state
        .scheduler
        .store()
        .recent_ledger(limit)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{e:#}")))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
