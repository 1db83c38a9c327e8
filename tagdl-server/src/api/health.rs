//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::config::DeliveryMode;
use crate::services::ResourceCounts;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Module name ("tagdl-server")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Temp resource lifecycle counters; `live` is non-zero only while
    /// requests are in flight
    pub temp_resources: ResourceCounts,
    /// Configured default delivery mode
    pub delivery_mode: DeliveryMode,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "tagdl-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        temp_resources: state.resources.snapshot(),
        delivery_mode: state.config.delivery.mode,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<crate::AppState> {
    Router::new().route("/health", get(health_check))
}
