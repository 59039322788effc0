use parking_lot::Mutex;

use super::LoadBalancer;
use crate::pool::PoolMetrics;

/// Cycles through the candidate list
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    current: Mutex<usize>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, pool_ids: &[&str]) -> Option<usize> {
        if pool_ids.is_empty() {
            return None;
        }

        let mut current = self.current.lock();
        let selected = *current % pool_ids.len();
        *current = (*current + 1) % pool_ids.len();
        Some(selected)
    }

    fn update_metrics(&self, _pool_id: &str, _metrics: &PoolMetrics) {}

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_in_order() {
        let balancer = RoundRobinBalancer::new();
        let pools = ["a", "b", "c"];

        let picks: Vec<usize> = (0..6).filter_map(|_| balancer.select(&pools)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_shrinking_candidate_list() {
        let balancer = RoundRobinBalancer::new();
        assert_eq!(balancer.select(&["a", "b", "c"]), Some(0));
        assert_eq!(balancer.select(&["a", "b", "c"]), Some(1));
        // index 2 wraps into the two-element list
        assert_eq!(balancer.select(&["a", "b"]), Some(0));
        assert_eq!(balancer.select(&["a", "b"]), Some(1));
    }
}
