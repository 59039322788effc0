use super::connection::{ConnectionId, ConnectionInfo};
use super::metrics::PoolMetrics;
use crate::transport::Payload;

/// Capacity of each pool's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications emitted by a pool, in emission order
#[derive(Debug, Clone)]
pub enum PoolEvent {
    ConnectionAdded(ConnectionInfo),
    ConnectionRemoved(ConnectionInfo),
    ConnectionUnhealthy(ConnectionInfo),
    MetricsUpdated(PoolMetrics),
    Message {
        connection_id: ConnectionId,
        payload: Payload,
    },
    Shutdown,
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionAdded(_) => "connectionAdded",
            Self::ConnectionRemoved(_) => "connectionRemoved",
            Self::ConnectionUnhealthy(_) => "connectionUnhealthy",
            Self::MetricsUpdated(_) => "metricsUpdated",
            Self::Message { .. } => "message",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Pool events re-emitted by the manager with the pool id attached
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Pool { pool_id: String, event: PoolEvent },
    Shutdown,
}
