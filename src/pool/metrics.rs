//! Pool metrics snapshots

use serde::Serialize;

/// Derived snapshot of one pool, recomputed on add/remove and on every
/// metrics tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub total_connections: usize,
    /// Connections currently flagged healthy
    pub active_connections: usize,
    pub connections_per_second: f64,
    pub messages_per_second: f64,
    /// Mean ping round trip over connections with a sample
    pub average_latency_ms: f64,
    /// Mean connection age in seconds
    pub connection_uptime_secs: f64,
    /// Percentage of connections flagged unhealthy
    pub error_rate: f64,
    /// Percentage of `max_connections` in use
    pub pool_utilization: f64,
}

/// Metrics reduced over every pool of a manager
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_connections: usize,
    pub active_connections: usize,
    pub connections_per_second: f64,
    pub messages_per_second: f64,
    pub average_latency_ms: f64,
    pub connection_uptime_secs: f64,
    pub error_rate: f64,
    pub pool_utilization: f64,
    pub pool_count: usize,
}

impl AggregatedMetrics {
    /// Counts and rates are summed, averaged fields are the mean across pools
    pub fn from_pools(metrics: &[PoolMetrics]) -> Self {
        let pool_count = metrics.len();
        if pool_count == 0 {
            return Self::default();
        }

        let mut aggregated = metrics.iter().fold(Self::default(), |mut acc, m| {
            acc.total_connections += m.total_connections;
            acc.active_connections += m.active_connections;
            acc.connections_per_second += m.connections_per_second;
            acc.messages_per_second += m.messages_per_second;
            acc.average_latency_ms += m.average_latency_ms;
            acc.connection_uptime_secs += m.connection_uptime_secs;
            acc.error_rate += m.error_rate;
            acc.pool_utilization += m.pool_utilization;
            acc
        });

        let n = pool_count as f64;
        aggregated.average_latency_ms /= n;
        aggregated.connection_uptime_secs /= n;
        aggregated.error_rate /= n;
        aggregated.pool_utilization /= n;
        aggregated.pool_count = pool_count;
        aggregated
    }
}
