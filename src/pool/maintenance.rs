use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;

use super::connection_pool::{ConnectionPool, PoolState};

/// Per-pool background task driving the heartbeat and metrics timers.
///
/// Holds only a weak reference so a dropped pool ends the task. Also stops
/// as soon as the pool leaves `Active`.
pub(crate) struct PoolMaintenanceTask {
    pool: Weak<ConnectionPool>,
    pool_id: String,
    state: watch::Receiver<PoolState>,
    heartbeat_interval: Duration,
    metrics_interval: Duration,
    metrics_enabled: bool,
}

impl PoolMaintenanceTask {
    pub(crate) fn new(pool: &Arc<ConnectionPool>, state: watch::Receiver<PoolState>) -> Self {
        let config = pool.config();
        Self {
            pool: Arc::downgrade(pool),
            pool_id: pool.id().to_string(),
            state,
            heartbeat_interval: config.heartbeat_interval(),
            metrics_interval: config.metrics_interval(),
            metrics_enabled: config.metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut heartbeat_timer = tokio::time::interval(self.heartbeat_interval);
        let mut metrics_timer = tokio::time::interval(self.metrics_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        metrics_timer.tick().await;

        tracing::debug!(
            pool_id = %self.pool_id,
            heartbeat_interval_ms = self.heartbeat_interval.as_millis() as u64,
            metrics_interval_ms = self.metrics_interval.as_millis() as u64,
            metrics_enabled = self.metrics_enabled,
            "Pool maintenance started"
        );

        loop {
            tokio::select! {
                changed = self.state.changed() => {
                    if changed.is_err() || *self.state.borrow() != PoolState::Active {
                        break;
                    }
                }
                _ = heartbeat_timer.tick() => {
                    let Some(pool) = self.pool.upgrade() else { break };
                    pool.perform_heartbeat();
                }
                _ = metrics_timer.tick(), if self.metrics_enabled => {
                    let Some(pool) = self.pool.upgrade() else { break };
                    pool.refresh_metrics(true);
                }
            }
        }

        tracing::debug!(pool_id = %self.pool_id, "Pool maintenance stopped");
    }
}
