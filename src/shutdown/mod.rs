//! Graceful shutdown handling for the pool service.
//!
//! The sequence stops background tasks first, then drains the broadcast
//! queue, then shuts every pool down. An overall timeout bounds the pool
//! phase. Connections still open at that point are dropped with the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::manager::ScaledPoolManager;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for queued messages to be delivered (default: 5 seconds)
    pub queue_drain_timeout: Duration,
    /// Upper bound on closing every pool (default: 30 seconds)
    pub pool_shutdown_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            queue_drain_timeout: Duration::from_secs(5),
            pool_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ShutdownConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pool_shutdown_timeout: timeout,
            ..Default::default()
        }
    }
}

/// Handles graceful shutdown of the pool service
pub struct GracefulShutdown {
    manager: Arc<ScaledPoolManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(manager: Arc<ScaledPoolManager>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(manager, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        manager: Arc<ScaledPoolManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            manager,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.manager.manager().total_connections())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Draining message queue");
        result.queue_drained = self.drain_queue().await;

        tracing::info!("Phase 3: Shutting down pools");
        match timeout(self.config.pool_shutdown_timeout, self.manager.shutdown()).await {
            Ok(reports) => {
                result.pools_shut_down = reports.len();
                result.connections_closed = reports.iter().map(|r| r.closed_gracefully).sum();
                result.connections_dropped = reports.iter().map(|r| r.force_dropped).sum();
                result.success = true;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.pool_shutdown_timeout.as_secs(),
                    "Pool shutdown timed out"
                );
            }
        }

        result.duration = start.elapsed();

        tracing::info!(
            pools = result.pools_shut_down,
            connections_closed = result.connections_closed,
            connections_dropped = result.connections_dropped,
            queue_drained = result.queue_drained,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Wait for the broadcast queue to empty
    async fn drain_queue(&self) -> bool {
        let queue = self.manager.queue();
        if queue.is_empty() {
            return true;
        }

        tracing::info!(queued_messages = queue.len(), "Waiting for queued messages to be delivered");

        let drain_future = async {
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        match timeout(self.config.queue_drain_timeout, drain_future).await {
            Ok(_) => {
                tracing::info!("Message queue drained successfully");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining_messages = queue.len(),
                    "Queue drain timeout, some messages may be lost"
                );
                false
            }
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every pool finished shutting down in time
    pub success: bool,
    pub pools_shut_down: usize,
    /// Connections that acknowledged the close
    pub connections_closed: usize,
    /// Connections dropped after the close wait expired
    pub connections_dropped: usize,
    /// Whether the message queue was fully drained
    pub queue_drained: bool,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ScaleConfig;
    use crate::pool::{ConnectionPoolConfig, ConnectionRequest};
    use crate::transport::mock::MockTransport;

    fn create_test_manager() -> Arc<ScaledPoolManager> {
        let manager = Arc::new(ScaledPoolManager::new(
            ConnectionPoolConfig::default(),
            ScaleConfig::default(),
        ));
        manager.manager().create_pool("a", None).unwrap();
        manager
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let manager = create_test_manager();
        let (tx, mut rx) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(manager.clone(), tx);

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert!(result.queue_drained);
        assert_eq!(result.pools_shut_down, 1);
        assert_eq!(result.connections_closed, 0);
        assert!(rx.try_recv().is_ok());
        assert!(manager.manager().pools().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let manager = create_test_manager();
        let (transport, _events, events_rx) = MockTransport::open();
        manager
            .add_connection_with_scale(ConnectionRequest::new(transport.clone(), events_rx))
            .unwrap();

        let (tx, _rx) = broadcast::channel(1);
        let result = GracefulShutdown::new(manager, tx).execute("test").await;

        assert!(result.success);
        assert_eq!(result.connections_closed + result.connections_dropped, 1);
        assert_eq!(transport.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.queue_drain_timeout, Duration::from_secs(5));
        assert_eq!(config.pool_shutdown_timeout, Duration::from_secs(30));
        assert_eq!(
            ShutdownConfig::with_timeout(Duration::from_secs(3)).pool_shutdown_timeout,
            Duration::from_secs(3)
        );
    }
}
