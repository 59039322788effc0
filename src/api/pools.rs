//! Pool status endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::pool::{ConnectionFilter, ConnectionInfo, PoolStatus};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PoolListResponse {
    pub pools: Vec<PoolStatus>,
    pub total_pools: usize,
    pub total_connections: usize,
    pub strategy: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PoolConnectionsResponse {
    pub pool_id: String,
    pub connections: Vec<ConnectionInfo>,
}

/// GET /api/v1/pools - Status of every pool
pub async fn list_pools(State(state): State<AppState>) -> Json<PoolListResponse> {
    let manager = state.pool_manager.manager();
    let pools = manager.pool_statuses();

    Json(PoolListResponse {
        total_pools: pools.len(),
        total_connections: pools.iter().map(|p| p.connection_count).sum(),
        strategy: manager.balancer().name(),
        pools,
    })
}

/// GET /api/v1/pools/{id} - Status of one pool
pub async fn get_pool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PoolStatus>> {
    state
        .pool_manager
        .manager()
        .get_pool(&id)
        .map(|pool| Json(pool.status()))
        .ok_or_else(|| AppError::NotFound(format!("Pool '{}' not found", id)))
}

/// GET /api/v1/pools/{id}/connections - Open connections of one pool
pub async fn list_pool_connections(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PoolConnectionsResponse>> {
    let pool = state
        .pool_manager
        .manager()
        .get_pool(&id)
        .ok_or_else(|| AppError::NotFound(format!("Pool '{}' not found", id)))?;

    let connections = pool
        .matching_connections(&ConnectionFilter::All)
        .iter()
        .map(|conn| conn.info())
        .collect();

    Ok(Json(PoolConnectionsResponse {
        pool_id: id,
        connections,
    }))
}
