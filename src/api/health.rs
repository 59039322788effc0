//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::manager::SystemMetrics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub pools: usize,
    pub connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let manager = state.pool_manager.manager();
    let pools = manager.pools();

    let status = if !pools.is_empty() && pools.iter().all(|p| p.is_active()) {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        pools: pools.len(),
        connections: manager.total_connections(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<SystemMetrics> {
    Json(state.pool_manager.system_metrics())
}
