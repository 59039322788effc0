use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::broadcast::broadcast;
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::pools::{get_pool, list_pool_connections, list_pools};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/pools", get(list_pools))
                .route("/pools/{id}", get(get_pool))
                .route("/pools/{id}/connections", get(list_pool_connections))
                .route("/broadcast", post(broadcast))
                .layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
