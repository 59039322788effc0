use dashmap::DashMap;

use super::LoadBalancer;
use crate::pool::PoolMetrics;

const DEFAULT_WEIGHT: f64 = 1.0;

/// Picks the pool with the highest weighted health score.
///
/// score = weight * (0.4 * free capacity + 0.3 * latency headroom
/// + 0.3 * success ratio), each term normalised to 0..=1. A pool without
/// metrics scores its bare weight.
#[derive(Debug, Default)]
pub struct WeightedBalancer {
    metrics: DashMap<String, PoolMetrics>,
    weights: DashMap<String, f64>,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weight(&self, pool_id: &str, weight: f64) {
        self.weights.insert(pool_id.to_string(), weight);
    }

    pub fn weight(&self, pool_id: &str) -> f64 {
        self.weights.get(pool_id).map(|w| *w).unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn score(&self, pool_id: &str) -> f64 {
        let weight = self.weight(pool_id);
        let Some(metrics) = self.metrics.get(pool_id) else {
            return weight;
        };

        let capacity = (100.0 - metrics.pool_utilization) / 100.0;
        let latency = ((1000.0 - metrics.average_latency_ms) / 1000.0).max(0.0);
        let success = ((100.0 - metrics.error_rate) / 100.0).max(0.0);

        weight * (0.4 * capacity + 0.3 * latency + 0.3 * success)
    }
}

impl LoadBalancer for WeightedBalancer {
    fn select(&self, pool_ids: &[&str]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (index, pool_id) in pool_ids.iter().enumerate() {
            let score = self.score(pool_id);
            match best {
                Some((_, highest)) if score <= highest => {}
                _ => best = Some((index, score)),
            }
        }

        best.map(|(index, _)| index)
    }

    fn update_metrics(&self, pool_id: &str, metrics: &PoolMetrics) {
        self.metrics.insert(pool_id.to_string(), metrics.clone());
    }

    fn remove_pool(&self, pool_id: &str) {
        self.metrics.remove(pool_id);
        self.weights.remove(pool_id);
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heavier_pool_wins_without_metrics() {
        let balancer = WeightedBalancer::new();
        balancer.set_weight("a", 1.0);
        balancer.set_weight("b", 2.0);

        assert_eq!(balancer.select(&["a", "b"]), Some(1));
        assert_eq!(balancer.score("unknown"), DEFAULT_WEIGHT);
    }

    #[test]
    fn test_score_formula() {
        let balancer = WeightedBalancer::new();
        balancer.set_weight("a", 2.0);
        balancer.update_metrics(
            "a",
            &PoolMetrics {
                pool_utilization: 50.0,
                average_latency_ms: 200.0,
                error_rate: 10.0,
                ..Default::default()
            },
        );

        // 2 * (0.4 * 0.5 + 0.3 * 0.8 + 0.3 * 0.9) = 1.42
        assert!((balancer.score("a") - 1.42).abs() < 1e-9);
    }

    #[test]
    fn test_latency_term_floors_at_zero() {
        let balancer = WeightedBalancer::new();
        balancer.update_metrics(
            "slow",
            &PoolMetrics {
                average_latency_ms: 5000.0,
                ..Default::default()
            },
        );

        assert!((balancer.score("slow") - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_loaded_pool_loses_despite_weight() {
        let balancer = WeightedBalancer::new();
        balancer.set_weight("busy", 1.2);
        balancer.update_metrics(
            "busy",
            &PoolMetrics {
                pool_utilization: 95.0,
                error_rate: 60.0,
                ..Default::default()
            },
        );
        balancer.update_metrics("idle", &PoolMetrics::default());

        assert_eq!(balancer.select(&["busy", "idle"]), Some(1));
    }

    #[test]
    fn test_ties_favour_first() {
        let balancer = WeightedBalancer::new();
        assert_eq!(balancer.select(&["a", "b", "c"]), Some(0));
    }
}
