//! Pool selection strategies for the pool manager

mod least_connections;
mod round_robin;
mod weighted;

use std::collections::HashMap;
use std::sync::Arc;

pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedBalancer;

use crate::pool::{LoadBalancingStrategy, PoolMetrics};

/// Picks the pool that receives the next connection
pub trait LoadBalancer: Send + Sync {
    /// Choose an index into `pool_ids`, or `None` when the slice is empty
    fn select(&self, pool_ids: &[&str]) -> Option<usize>;

    /// Record the latest metrics snapshot for a pool
    fn update_metrics(&self, pool_id: &str, metrics: &PoolMetrics);

    /// Forget everything tracked for a pool
    fn remove_pool(&self, _pool_id: &str) {}

    fn name(&self) -> &'static str;
}

/// Create a balancer for the configured strategy
pub fn create_balancer(
    strategy: LoadBalancingStrategy,
    weights: &HashMap<String, f64>,
) -> Arc<dyn LoadBalancer> {
    tracing::info!(strategy = strategy.as_str(), "Creating load balancer");

    match strategy {
        LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancingStrategy::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
        LoadBalancingStrategy::Weighted => {
            let balancer = WeightedBalancer::new();
            for (pool_id, weight) in weights {
                balancer.set_weight(pool_id, *weight);
            }
            Arc::new(balancer)
        }
    }
}
