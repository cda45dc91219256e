//! HTTP trigger surface — Axum server for the periodic caller.
//!
//! `POST /api/step` runs one scheduler step when the shared secret matches.
//! The read-only endpoints expose the persisted phase and recent ledger.
//! CORS enabled for the operator console.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::{ApiState, AppState, SECRET_HEADER};

/// Bind `port` and serve until the listener fails.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind trigger port {port}"))?;
    info!(port, "Trigger server listening");

    axum::serve(listener, app).await.context("Trigger server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(SECRET_HEADER)]);

    Router::new()
        .route("/api/step", post(routes::post_step))
        .route("/api/status", get(routes::get_status))
        .route("/api/trades", get(routes::get_trades))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
