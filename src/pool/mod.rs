//! Connection pool: admission, supervision and fan-out for one set of
//! connections.

mod config;
mod connection;
mod connection_pool;
mod error;
mod events;
mod filter;
mod maintenance;
mod metrics;

pub use config::{ConnectionPoolConfig, LoadBalancingStrategy, PoolConfigOverride};
pub use connection::{ConnectionId, ConnectionInfo, ConnectionRequest, PooledConnection};
pub use connection_pool::{
    ConnectionPool, HeartbeatReport, PoolShutdownReport, PoolState, PoolStatus,
};
pub use error::PoolError;
pub use events::{ManagerEvent, PoolEvent, EVENT_CHANNEL_CAPACITY};
pub use filter::ConnectionFilter;
pub use metrics::{AggregatedMetrics, PoolMetrics};
