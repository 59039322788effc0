use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::manager::ScaledPoolManager;

/// Background task for throttle cleanup and capacity monitoring
pub struct ScaleMonitorTask {
    manager: Arc<ScaledPoolManager>,
    shutdown: broadcast::Receiver<()>,
}

impl ScaleMonitorTask {
    pub fn new(manager: Arc<ScaledPoolManager>, shutdown: broadcast::Receiver<()>) -> Self {
        Self { manager, shutdown }
    }

    pub async fn run(mut self) {
        let config = self.manager.config().clone();
        // A zero period would panic in `interval`
        let cleanup_interval = Duration::from_secs(config.throttle_cleanup_interval_secs.max(1));
        let monitor_interval = Duration::from_secs(config.monitor_interval_secs.max(1));

        let mut cleanup_timer = tokio::time::interval(cleanup_interval);
        let mut monitor_timer = tokio::time::interval(monitor_interval);

        // Skip immediate first tick
        cleanup_timer.tick().await;
        monitor_timer.tick().await;

        tracing::info!(
            throttle_cleanup_interval_secs = config.throttle_cleanup_interval_secs,
            monitor_interval_secs = config.monitor_interval_secs,
            capacity_warning_percent = config.capacity_warning_percent,
            "Scale monitor task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Scale monitor task received shutdown signal");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_throttle();
                }
                _ = monitor_timer.tick() => {
                    self.check_capacity(config.capacity_warning_percent);
                }
            }
        }

        tracing::info!("Scale monitor task stopped");
    }

    fn cleanup_throttle(&self) {
        if let Some(throttle) = self.manager.throttle() {
            let removed = throttle.cleanup();
            tracing::debug!(
                removed = removed,
                tracked = throttle.tracked_addresses(),
                "Throttle cleanup completed"
            );
        }
    }

    /// Returns whether utilization is above the warning threshold
    fn check_capacity(&self, warning_percent: f64) -> bool {
        let metrics = self.manager.system_metrics();
        let capacity = &metrics.system_capacity;

        if capacity.current_utilization > warning_percent {
            tracing::warn!(
                utilization = capacity.current_utilization,
                total_connections = metrics.aggregated.total_connections,
                max_total_connections = capacity.max_total_connections,
                remaining = capacity.remaining_capacity,
                "System capacity above warning threshold"
            );
            return true;
        }

        tracing::debug!(
            utilization = capacity.current_utilization,
            queue_length = metrics.performance.queue_length,
            "Capacity check completed"
        );
        false
    }
}
