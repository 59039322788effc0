use dashmap::DashMap;

use super::LoadBalancer;
use crate::pool::PoolMetrics;

/// Picks the pool with the fewest active connections last reported.
///
/// Pools that never reported count as empty. Ties go to the earlier pool.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer {
    active: DashMap<String, usize>,
}

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn active_connections(&self, pool_id: &str) -> usize {
        self.active.get(pool_id).map(|c| *c).unwrap_or(0)
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select(&self, pool_ids: &[&str]) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;

        for (index, pool_id) in pool_ids.iter().enumerate() {
            let count = self.active_connections(pool_id);
            match best {
                Some((_, lowest)) if count >= lowest => {}
                _ => best = Some((index, count)),
            }
        }

        best.map(|(index, _)| index)
    }

    fn update_metrics(&self, pool_id: &str, metrics: &PoolMetrics) {
        self.active
            .insert(pool_id.to_string(), metrics.active_connections);
    }

    fn remove_pool(&self, pool_id: &str) {
        self.active.remove(pool_id);
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(active: usize) -> PoolMetrics {
        PoolMetrics {
            total_connections: active,
            active_connections: active,
            ..Default::default()
        }
    }

    #[test]
    fn test_picks_lowest() {
        let balancer = LeastConnectionsBalancer::new();
        balancer.update_metrics("a", &metrics(5));
        balancer.update_metrics("b", &metrics(2));
        balancer.update_metrics("c", &metrics(7));

        assert_eq!(balancer.select(&["a", "b", "c"]), Some(1));
    }

    #[test]
    fn test_ties_favour_first_and_unknown_is_zero() {
        let balancer = LeastConnectionsBalancer::new();
        assert_eq!(balancer.select(&["a", "b"]), Some(0));

        balancer.update_metrics("a", &metrics(3));
        balancer.update_metrics("b", &metrics(3));
        assert_eq!(balancer.select(&["a", "b"]), Some(0));

        assert_eq!(balancer.select(&["a", "b", "fresh"]), Some(2));
    }

    #[test]
    fn test_remove_pool_forgets_metrics() {
        let balancer = LeastConnectionsBalancer::new();
        balancer.update_metrics("a", &metrics(4));
        balancer.update_metrics("b", &metrics(1));
        balancer.remove_pool("a");

        assert_eq!(balancer.select(&["a", "b"]), Some(0));
    }
}
