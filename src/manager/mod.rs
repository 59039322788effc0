//! Pool manager: a registry of named pools behind a load balancer.

mod scaled;

pub use scaled::{
    BroadcastOptions, CapacityMetrics, HealthMetrics, PerformanceMetrics, ScaleConfig,
    ScaledPoolManager, SystemMetrics,
};

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::balancer::{create_balancer, LoadBalancer};
use crate::pool::{
    AggregatedMetrics, ConnectionFilter, ConnectionId, ConnectionPool, ConnectionPoolConfig,
    ConnectionRequest, ManagerEvent, PoolConfigOverride, PoolError, PoolEvent,
    PoolShutdownReport, PoolStatus, EVENT_CHANNEL_CAPACITY,
};
use crate::transport::Payload;

/// Where an admitted connection landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedConnection {
    pub pool_id: String,
    pub connection_id: ConnectionId,
}

/// Owns a set of pools and places new connections among them
pub struct PoolManager {
    config: ConnectionPoolConfig,
    /// Registration order is preserved
    pools: RwLock<Vec<Arc<ConnectionPool>>>,
    balancer: Arc<dyn LoadBalancer>,
    events: broadcast::Sender<ManagerEvent>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolManager {
    pub fn new(config: ConnectionPoolConfig) -> Self {
        let balancer = create_balancer(config.load_balancing, &config.weights);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            pools: RwLock::new(Vec::new()),
            balancer,
            events,
            forwarders: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.balancer
    }

    /// Create and register a pool. The override is merged onto the base
    /// config.
    pub fn create_pool(
        &self,
        pool_id: &str,
        overrides: Option<&PoolConfigOverride>,
    ) -> Result<Arc<ConnectionPool>, PoolError> {
        let mut pools = self.pools.write();
        if pools.iter().any(|p| p.id() == pool_id) {
            return Err(PoolError::DuplicatePool(pool_id.to_string()));
        }

        let config = match overrides {
            Some(o) => o.apply(&self.config),
            None => self.config.clone(),
        };
        let pool = ConnectionPool::new(pool_id, config);
        pools.push(pool.clone());
        drop(pools);

        let forwarder = self.spawn_forwarder(&pool);
        self.forwarders.lock().push(forwarder);

        tracing::info!(
            pool_id = %pool_id,
            balancer = self.balancer.name(),
            "Pool registered"
        );

        Ok(pool)
    }

    /// Re-emit pool events and feed metrics to the balancer
    fn spawn_forwarder(&self, pool: &Arc<ConnectionPool>) -> JoinHandle<()> {
        let mut rx = pool.subscribe_events();
        let pool_id = pool.id().to_string();
        let balancer = self.balancer.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let PoolEvent::MetricsUpdated(metrics) = &event {
                            balancer.update_metrics(&pool_id, metrics);
                        }
                        let done = matches!(event, PoolEvent::Shutdown);
                        let _ = events.send(ManagerEvent::Pool {
                            pool_id: pool_id.clone(),
                            event,
                        });
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(pool_id = %pool_id, skipped, "Pool event forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Admit a connection into the pool chosen by the balancer.
    ///
    /// Pools that are not active are never candidates.
    pub fn add_connection(
        &self,
        request: ConnectionRequest,
    ) -> Result<PlacedConnection, PoolError> {
        let candidates: Vec<Arc<ConnectionPool>> = self
            .pools
            .read()
            .iter()
            .filter(|p| p.is_active())
            .cloned()
            .collect();

        let ids: Vec<&str> = candidates.iter().map(|p| p.id()).collect();
        let pool = self
            .balancer
            .select(&ids)
            .and_then(|index| candidates.get(index))
            .ok_or(PoolError::NoPoolsAvailable)?;

        let connection_id = pool.add_connection(request)?;
        self.balancer.update_metrics(pool.id(), &pool.metrics());

        Ok(PlacedConnection {
            pool_id: pool.id().to_string(),
            connection_id,
        })
    }

    pub fn get_pool(&self, pool_id: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.read().iter().find(|p| p.id() == pool_id).cloned()
    }

    pub fn pools(&self) -> Vec<Arc<ConnectionPool>> {
        self.pools.read().clone()
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        self.pools.read().iter().map(|p| p.status()).collect()
    }

    pub fn total_connections(&self) -> usize {
        self.pools.read().iter().map(|p| p.connection_count()).sum()
    }

    pub fn send_to_connection(
        &self,
        pool_id: &str,
        connection_id: ConnectionId,
        payload: &Payload,
    ) -> bool {
        self.get_pool(pool_id)
            .is_some_and(|pool| pool.send_to_connection(connection_id, payload))
    }

    /// Broadcast through every pool, returning the total successful sends
    pub fn broadcast_to_all(&self, payload: &Payload, filter: &ConnectionFilter) -> usize {
        self.pools()
            .iter()
            .map(|pool| pool.broadcast(payload, filter))
            .sum()
    }

    pub fn aggregated_metrics(&self) -> AggregatedMetrics {
        let metrics: Vec<_> = self.pools.read().iter().map(|p| p.metrics()).collect();
        AggregatedMetrics::from_pools(&metrics)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Shut every pool down concurrently and clear the registry
    pub async fn shutdown(&self) -> Vec<PoolShutdownReport> {
        let pools = self.pools();
        tracing::info!(pools = pools.len(), "Shutting down pool manager");

        let reports = join_all(pools.iter().map(|pool| pool.shutdown())).await;

        self.pools.write().clear();
        for pool in &pools {
            self.balancer.remove_pool(pool.id());
        }
        for forwarder in self.forwarders.lock().drain(..) {
            forwarder.abort();
        }

        let _ = self.events.send(ManagerEvent::Shutdown);
        tracing::info!("Pool manager shut down");

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::LoadBalancingStrategy;
    use crate::transport::mock::MockTransport;

    fn manager(strategy: LoadBalancingStrategy) -> PoolManager {
        PoolManager::new(ConnectionPoolConfig {
            load_balancing: strategy,
            ..Default::default()
        })
    }

    fn request() -> ConnectionRequest {
        let (transport, _tx, rx) = MockTransport::open();
        ConnectionRequest::new(transport, rx)
    }

    #[tokio::test]
    async fn test_duplicate_pool_rejected() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        manager.create_pool("a", None).unwrap();

        assert_eq!(
            manager.create_pool("a", None).unwrap_err(),
            PoolError::DuplicatePool("a".to_string())
        );
        assert_eq!(manager.pools().len(), 1);
    }

    #[tokio::test]
    async fn test_override_applied_to_pool() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        let small = PoolConfigOverride {
            max_connections: Some(3),
            ..Default::default()
        };
        let pool = manager.create_pool("small", Some(&small)).unwrap();

        assert_eq!(pool.config().max_connections, 3);
        assert_eq!(
            pool.config().max_connections_per_user,
            manager.config().max_connections_per_user
        );
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        for id in ["a", "b", "c"] {
            manager.create_pool(id, None).unwrap();
        }

        let placed: Vec<String> = (0..6)
            .map(|_| manager.add_connection(request()).unwrap().pool_id)
            .collect();
        assert_eq!(placed, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_least_connections_fills_emptiest() {
        let manager = manager(LoadBalancingStrategy::LeastConnections);
        manager.create_pool("a", None).unwrap();
        manager.create_pool("b", None).unwrap();

        let placed: Vec<String> = (0..4)
            .map(|_| manager.add_connection(request()).unwrap().pool_id)
            .collect();
        assert_eq!(placed, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_no_pools_available() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        assert_eq!(
            manager.add_connection(request()).unwrap_err(),
            PoolError::NoPoolsAvailable
        );
    }

    #[tokio::test]
    async fn test_shut_down_pool_skipped() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        let a = manager.create_pool("a", None).unwrap();
        manager.create_pool("b", None).unwrap();
        a.shutdown().await;

        for _ in 0..3 {
            assert_eq!(manager.add_connection(request()).unwrap().pool_id, "b");
        }
    }

    #[tokio::test]
    async fn test_broadcast_and_aggregate() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        manager.create_pool("a", None).unwrap();
        manager.create_pool("b", None).unwrap();
        let placed = manager.add_connection(request()).unwrap();
        manager.add_connection(request()).unwrap();
        manager.add_connection(request()).unwrap();

        assert_eq!(manager.total_connections(), 3);
        assert_eq!(
            manager.broadcast_to_all(&Payload::text("all"), &ConnectionFilter::All),
            3
        );
        assert!(manager.send_to_connection(
            &placed.pool_id,
            placed.connection_id,
            &Payload::text("one")
        ));
        assert!(!manager.send_to_connection("missing", placed.connection_id, &Payload::text("x")));

        let aggregated = manager.aggregated_metrics();
        assert_eq!(aggregated.pool_count, 2);
        assert_eq!(aggregated.total_connections, 3);
        assert_eq!(manager.pool_statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_events_forwarded_with_pool_id() {
        let manager = manager(LoadBalancingStrategy::RoundRobin);
        let mut events = manager.subscribe_events();
        manager.create_pool("a", None).unwrap();
        let placed = manager.add_connection(request()).unwrap();

        loop {
            match events.recv().await.unwrap() {
                ManagerEvent::Pool {
                    pool_id,
                    event: PoolEvent::ConnectionAdded(info),
                } => {
                    assert_eq!(pool_id, "a");
                    assert_eq!(info.id, placed.connection_id);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let manager = manager(LoadBalancingStrategy::LeastConnections);
        let mut events = manager.subscribe_events();
        manager.create_pool("a", None).unwrap();
        manager.create_pool("b", None).unwrap();
        manager.add_connection(request()).unwrap();

        let reports = manager.shutdown().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.iter().map(|r| r.closed_gracefully).sum::<usize>(), 1);
        assert!(manager.pools().is_empty());
        assert_eq!(
            manager.add_connection(request()).unwrap_err(),
            PoolError::NoPoolsAvailable
        );

        let mut saw_shutdown = false;
        while let Ok(event) = events.try_recv() {
            saw_shutdown |= matches!(event, ManagerEvent::Shutdown);
        }
        assert!(saw_shutdown);
    }
}
