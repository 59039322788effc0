//! API layer - HTTP endpoint handlers organized by concern.

mod broadcast;
mod health;
mod metrics;
mod pools;
mod routes;

pub use broadcast::{broadcast, BroadcastRequest, BroadcastResponse};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use pools::{get_pool, list_pool_connections, list_pools};
pub use routes::api_routes;
