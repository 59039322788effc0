//! Pool manager with admission throttling, a system-wide connection cap and
//! an optimized broadcast path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{PlacedConnection, PoolManager};
use crate::compression::compress_payload;
use crate::metrics::ConnectionMetrics;
use crate::pool::{
    AggregatedMetrics, ConnectionFilter, ConnectionPoolConfig, ConnectionRequest, PoolError,
    PoolShutdownReport,
};
use crate::queue::{Destination, MessageQueue};
use crate::throttle::ConnectionThrottle;
use crate::transport::Payload;

/// Settings for the scaled manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    /// Text payloads longer than this many bytes are compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    #[serde(default = "default_true")]
    pub throttle_enabled: bool,
    #[serde(default = "default_throttle_max_per_window")]
    pub throttle_max_per_window: u32,
    #[serde(default = "default_throttle_window_secs")]
    pub throttle_window_secs: u64,
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
    #[serde(default = "default_throttle_cleanup_interval_secs")]
    pub throttle_cleanup_interval_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// System utilization (percent) above which the monitor warns
    #[serde(default = "default_capacity_warning_percent")]
    pub capacity_warning_percent: f64,
}

fn default_max_total_connections() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_compression_threshold() -> usize {
    crate::compression::DEFAULT_COMPRESSION_THRESHOLD
}

fn default_throttle_max_per_window() -> u32 {
    crate::throttle::DEFAULT_MAX_PER_WINDOW
}

fn default_throttle_window_secs() -> u64 {
    crate::throttle::DEFAULT_WINDOW.as_secs()
}

fn default_queue_max_size() -> usize {
    crate::queue::DEFAULT_MAX_QUEUE_SIZE
}

fn default_queue_batch_size() -> usize {
    crate::queue::DEFAULT_BATCH_SIZE
}

fn default_throttle_cleanup_interval_secs() -> u64 {
    300
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_capacity_warning_percent() -> f64 {
    80.0
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            max_total_connections: default_max_total_connections(),
            compression_enabled: true,
            compression_threshold: default_compression_threshold(),
            throttle_enabled: true,
            throttle_max_per_window: default_throttle_max_per_window(),
            throttle_window_secs: default_throttle_window_secs(),
            queue_max_size: default_queue_max_size(),
            queue_batch_size: default_queue_batch_size(),
            throttle_cleanup_interval_secs: default_throttle_cleanup_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            capacity_warning_percent: default_capacity_warning_percent(),
        }
    }
}

/// Options for [`ScaledPoolManager::broadcast_optimized`]
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Defaults to the configured `compression_enabled`
    pub compress: Option<bool>,
    pub priority: i32,
    pub filter: ConnectionFilter,
    pub use_queue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityMetrics {
    pub max_total_connections: usize,
    pub current_utilization: f64,
    pub remaining_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub queue_length: usize,
    pub queue_processing: bool,
    pub compression_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// No pool has left the active state
    pub all_pools_healthy: bool,
    pub throttle_active: bool,
}

/// Aggregated pool metrics plus system capacity, queue and health sections
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    #[serde(flatten)]
    pub aggregated: AggregatedMetrics,
    pub system_capacity: CapacityMetrics,
    pub performance: PerformanceMetrics,
    pub health: HealthMetrics,
}

pub struct ScaledPoolManager {
    manager: Arc<PoolManager>,
    throttle: Option<ConnectionThrottle>,
    queue: Arc<MessageQueue>,
    config: ScaleConfig,
}

impl ScaledPoolManager {
    pub fn new(pool_config: ConnectionPoolConfig, config: ScaleConfig) -> Self {
        Self::with_manager(Arc::new(PoolManager::new(pool_config)), config)
    }

    pub fn with_manager(manager: Arc<PoolManager>, config: ScaleConfig) -> Self {
        let throttle = config.throttle_enabled.then(|| {
            ConnectionThrottle::new(
                config.throttle_max_per_window,
                Duration::from_secs(config.throttle_window_secs),
            )
        });
        let queue = Arc::new(MessageQueue::with_batch_size(
            config.queue_max_size,
            config.queue_batch_size,
        ));

        tracing::info!(
            max_total_connections = config.max_total_connections,
            throttle_enabled = config.throttle_enabled,
            compression_enabled = config.compression_enabled,
            "Scaled pool manager created"
        );

        Self {
            manager,
            throttle,
            queue,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    pub fn throttle(&self) -> Option<&ConnectionThrottle> {
        self.throttle.as_ref()
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    /// Admit a connection after the address throttle and the system-wide cap
    pub fn add_connection_with_scale(
        &self,
        request: ConnectionRequest,
    ) -> Result<PlacedConnection, PoolError> {
        if let (Some(throttle), Some(ip)) = (&self.throttle, request.remote_addr) {
            if !throttle.can_connect(ip) {
                let error = PoolError::Throttled(ip);
                ConnectionMetrics::record_rejected(error.code());
                return Err(error);
            }
        }

        let current = self.manager.total_connections();
        if current >= self.config.max_total_connections {
            let error = PoolError::SystemAtCapacity {
                current,
                max: self.config.max_total_connections,
            };
            ConnectionMetrics::record_rejected(error.code());
            tracing::warn!(current, max = self.config.max_total_connections, "System at capacity");
            return Err(error);
        }

        self.manager.add_connection(request)
    }

    /// Broadcast with optional compression and queuing.
    ///
    /// Returns the number of successful sends for a direct broadcast. With
    /// `use_queue` set it returns how many of this broadcast's messages are
    /// still queued, so entries evicted by the broadcast itself are not counted.
    pub async fn broadcast_optimized(&self, payload: Payload, options: BroadcastOptions) -> usize {
        let compress = options.compress.unwrap_or(self.config.compression_enabled);
        let payload = if compress {
            compress_payload(payload, self.config.compression_threshold)
        } else {
            payload
        };

        if !options.use_queue {
            return self.manager.broadcast_to_all(&payload, &options.filter);
        }

        let mut targeted = HashSet::new();
        let mut queued = 0usize;
        for pool in self.manager.pools() {
            for connection in pool.matching_connections(&options.filter) {
                let destination = Destination {
                    pool_id: pool.id().to_string(),
                    connection_id: connection.id,
                };
                targeted.insert(destination.clone());
                let evicted = self.queue.enqueue(destination, payload.clone(), options.priority);
                queued += 1;

                let own = evicted.is_some_and(|m| {
                    m.priority == options.priority
                        && m.payload == payload
                        && targeted.contains(&m.destination)
                });
                if own {
                    queued -= 1;
                }
            }
        }

        self.spawn_drain();

        tracing::debug!(queued, priority = options.priority, "Broadcast queued");
        queued
    }

    /// Drain the queue in a background task
    fn spawn_drain(&self) {
        let queue = self.queue.clone();
        let manager = self.manager.clone();

        tokio::spawn(async move {
            loop {
                queue
                    .process_queue(|destination, payload| {
                        manager.send_to_connection(
                            &destination.pool_id,
                            destination.connection_id,
                            payload,
                        )
                    })
                    .await;

                // Another drain owns the queue, or it is empty
                if queue.is_processing() || queue.is_empty() {
                    break;
                }
            }
        });
    }

    pub fn system_metrics(&self) -> SystemMetrics {
        let aggregated = self.manager.aggregated_metrics();
        let max = self.config.max_total_connections;
        let total = aggregated.total_connections;
        let current_utilization = if max == 0 {
            100.0
        } else {
            total as f64 / max as f64 * 100.0
        };
        ConnectionMetrics::set_system_utilization(current_utilization);

        SystemMetrics {
            system_capacity: CapacityMetrics {
                max_total_connections: max,
                current_utilization,
                remaining_capacity: max.saturating_sub(total),
            },
            performance: PerformanceMetrics {
                queue_length: self.queue.len(),
                queue_processing: self.queue.is_processing(),
                compression_enabled: self.config.compression_enabled,
            },
            health: HealthMetrics {
                all_pools_healthy: self.manager.pools().iter().all(|p| p.is_active()),
                throttle_active: self.throttle.is_some(),
            },
            aggregated,
        }
    }

    pub async fn shutdown(&self) -> Vec<PoolShutdownReport> {
        self.manager.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::transport::mock::MockTransport;

    fn scaled(config: ScaleConfig) -> ScaledPoolManager {
        let manager = ScaledPoolManager::new(ConnectionPoolConfig::default(), config);
        manager.manager().create_pool("a", None).unwrap();
        manager
    }

    fn request(ip: Option<IpAddr>) -> (ConnectionRequest, Arc<MockTransport>) {
        let (transport, _tx, rx) = MockTransport::open();
        let mut request = ConnectionRequest::new(transport.clone(), rx);
        request.remote_addr = ip;
        (request, transport)
    }

    #[tokio::test]
    async fn test_system_capacity_enforced() {
        let manager = scaled(ScaleConfig {
            max_total_connections: 2,
            ..Default::default()
        });

        manager.add_connection_with_scale(request(None).0).unwrap();
        manager.add_connection_with_scale(request(None).0).unwrap();
        assert_eq!(
            manager.add_connection_with_scale(request(None).0).unwrap_err(),
            PoolError::SystemAtCapacity { current: 2, max: 2 }
        );
    }

    #[tokio::test]
    async fn test_throttle_checked_before_capacity() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1));
        let manager = scaled(ScaleConfig {
            throttle_max_per_window: 1,
            ..Default::default()
        });

        manager.add_connection_with_scale(request(Some(ip)).0).unwrap();
        assert_eq!(
            manager.add_connection_with_scale(request(Some(ip)).0).unwrap_err(),
            PoolError::Throttled(ip)
        );
        // Unknown address bypasses the throttle
        assert!(manager.add_connection_with_scale(request(None).0).is_ok());
    }

    #[tokio::test]
    async fn test_throttle_disabled() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let manager = scaled(ScaleConfig {
            throttle_enabled: false,
            throttle_max_per_window: 1,
            ..Default::default()
        });

        assert!(manager.throttle().is_none());
        for _ in 0..3 {
            manager.add_connection_with_scale(request(Some(ip)).0).unwrap();
        }
    }

    #[tokio::test]
    async fn test_queued_broadcast_counts_surviving_messages() {
        let manager = scaled(ScaleConfig {
            queue_max_size: 2,
            throttle_enabled: false,
            ..Default::default()
        });
        for _ in 0..3 {
            manager.add_connection_with_scale(request(None).0).unwrap();
        }

        let queued = manager
            .broadcast_optimized(
                Payload::text("hello"),
                BroadcastOptions {
                    use_queue: true,
                    compress: Some(false),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn test_direct_broadcast_compresses_large_text() {
        let manager = scaled(ScaleConfig::default());
        let (req, transport) = request(None);
        manager.add_connection_with_scale(req).unwrap();

        let large = "a".repeat(2048);
        let sent = manager
            .broadcast_optimized(Payload::text(large.clone()), BroadcastOptions::default())
            .await;
        assert_eq!(sent, 1);
        assert!(matches!(transport.sent.lock()[0], Payload::Binary(_)));

        let sent = manager
            .broadcast_optimized(
                Payload::text(large),
                BroadcastOptions {
                    compress: Some(false),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(sent, 1);
        assert!(transport.sent.lock()[1].is_text());
    }

    #[tokio::test]
    async fn test_queued_broadcast_delivers_in_background() {
        let manager = scaled(ScaleConfig::default());
        let mut transports = Vec::new();
        for _ in 0..3 {
            let (req, transport) = request(None);
            manager.add_connection_with_scale(req).unwrap();
            transports.push(transport);
        }

        let queued = manager
            .broadcast_optimized(
                Payload::text("burst"),
                BroadcastOptions {
                    use_queue: true,
                    priority: 3,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(queued, 3);

        for _ in 0..10 {
            if manager.queue().is_empty() && !manager.queue().is_processing() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(manager.queue().is_empty());
        assert!(transports.iter().all(|t| t.sent_count() == 1));
    }

    #[tokio::test]
    async fn test_system_metrics_sections() {
        let manager = scaled(ScaleConfig {
            max_total_connections: 4,
            ..Default::default()
        });
        manager.add_connection_with_scale(request(None).0).unwrap();

        let metrics = manager.system_metrics();
        assert_eq!(metrics.aggregated.total_connections, 1);
        assert_eq!(metrics.system_capacity.remaining_capacity, 3);
        assert_eq!(metrics.system_capacity.current_utilization, 25.0);
        assert!(metrics.health.all_pools_healthy);
        assert!(metrics.health.throttle_active);
        assert!(metrics.performance.compression_enabled);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["total_connections"], 1);
        assert_eq!(json["pool_count"], 1);
    }
}
