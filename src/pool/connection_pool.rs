use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::config::ConnectionPoolConfig;
use super::connection::{ConnectionId, ConnectionRequest, PooledConnection};
use super::error::PoolError;
use super::events::{PoolEvent, EVENT_CHANNEL_CAPACITY};
use super::filter::ConnectionFilter;
use super::maintenance::PoolMaintenanceTask;
use super::metrics::PoolMetrics;
use crate::metrics::{ConnectionMetrics, HeartbeatMetrics, MessageMetrics};
use crate::transport::{Payload, TransportEvent};

/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Active,
    ShuttingDown,
    Closed,
}

/// Point-in-time view of a pool for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool_id: String,
    pub state: PoolState,
    pub connection_count: usize,
    pub max_connections: usize,
    pub utilization: f64,
    pub healthy_connections: usize,
    pub metrics: PoolMetrics,
}

/// Outcome of one heartbeat round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub removed: usize,
}

/// Outcome of a pool shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolShutdownReport {
    pub pool_id: String,
    /// Connections that acknowledged the close in time
    pub closed_gracefully: usize,
    /// Connections dropped after the close wait expired
    pub force_dropped: usize,
    /// Connections that were no longer open
    pub already_closed: usize,
    /// Another caller had already started the shutdown
    pub already_shut_down: bool,
}

enum CloseOutcome {
    Graceful,
    Forced,
    AlreadyClosed,
}

/// Counter values at the previous rate sample
struct RateWindow {
    at: Instant,
    connections_added: u64,
    messages_total: u64,
}

/// A bounded set of live connections with per-user limits, heartbeat
/// supervision and derived metrics.
pub struct ConnectionPool {
    id: String,
    config: ConnectionPoolConfig,
    /// connection_id -> connection
    connections: DashMap<ConnectionId, Arc<PooledConnection>>,
    /// user_id -> Set<connection_id>
    user_index: DashMap<String, HashSet<ConnectionId>>,
    /// Serializes admission checks, inserts and the shutdown transition
    admission: Mutex<()>,
    state: watch::Sender<PoolState>,
    metrics: RwLock<PoolMetrics>,
    rate_window: Mutex<RateWindow>,
    connections_added: AtomicU64,
    messages_total: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create an active pool and start its maintenance task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(id: impl Into<String>, config: ConnectionPoolConfig) -> Arc<Self> {
        let (state, _) = watch::channel(PoolState::Active);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pool = Arc::new(Self {
            id: id.into(),
            config,
            connections: DashMap::new(),
            user_index: DashMap::new(),
            admission: Mutex::new(()),
            state,
            metrics: RwLock::new(PoolMetrics::default()),
            rate_window: Mutex::new(RateWindow {
                at: Instant::now(),
                connections_added: 0,
                messages_total: 0,
            }),
            connections_added: AtomicU64::new(0),
            messages_total: AtomicU64::new(0),
            events,
            maintenance: Mutex::new(None),
        });

        let task = PoolMaintenanceTask::new(&pool, pool.state.subscribe());
        *pool.maintenance.lock() = Some(tokio::spawn(task.run()));

        tracing::info!(
            pool_id = %pool.id,
            max_connections = pool.config.max_connections,
            max_connections_per_user = pool.config.max_connections_per_user,
            "Connection pool created"
        );

        pool
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    /// Admit a connection.
    ///
    /// Checks (in order) pool state, pool capacity and the per-user limit,
    /// then registers the connection and starts pumping its transport events.
    pub fn add_connection(
        self: &Arc<Self>,
        request: ConnectionRequest,
    ) -> Result<ConnectionId, PoolError> {
        let ConnectionRequest {
            transport,
            events,
            user_id,
            remote_addr,
        } = request;

        let connection = {
            let _admission = self.admission.lock();

            if *self.state.borrow() != PoolState::Active {
                return Err(self.reject(PoolError::ShuttingDown {
                    pool_id: self.id.clone(),
                }));
            }

            let current = self.connections.len();
            if current >= self.config.max_connections {
                return Err(self.reject(PoolError::PoolFull {
                    pool_id: self.id.clone(),
                    current,
                    max: self.config.max_connections,
                }));
            }

            if let Some(user_id) = &user_id {
                let user_count = self.user_connection_count(user_id);
                if user_count >= self.config.max_connections_per_user {
                    return Err(self.reject(PoolError::UserLimitExceeded {
                        user_id: user_id.clone(),
                        current: user_count,
                        max: self.config.max_connections_per_user,
                    }));
                }
            }

            let connection = Arc::new(PooledConnection::new(
                self.id.clone(),
                user_id,
                remote_addr,
                transport,
            ));
            self.connections.insert(connection.id, connection.clone());
            if let Some(user_id) = &connection.user_id {
                self.user_index
                    .entry(user_id.clone())
                    .or_default()
                    .insert(connection.id);
            }
            connection
        };

        self.connections_added.fetch_add(1, Ordering::Relaxed);
        ConnectionMetrics::record_opened(&self.id);
        self.refresh_metrics(false);
        self.emit(PoolEvent::ConnectionAdded(connection.info()));

        let pump = self.spawn_event_pump(connection.clone(), events);
        connection.set_pump(pump.abort_handle());

        tracing::info!(
            pool_id = %self.id,
            connection_id = %connection.id,
            user_id = connection.user_id.as_deref().unwrap_or("-"),
            "Connection added"
        );

        Ok(connection.id)
    }

    fn reject(&self, error: PoolError) -> PoolError {
        ConnectionMetrics::record_rejected(error.code());
        tracing::debug!(pool_id = %self.id, error = %error, "Connection rejected");
        error
    }

    /// Route transport events for one connection until it closes
    fn spawn_event_pump(
        self: &Arc<Self>,
        connection: Arc<PooledConnection>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(pool) = pool.upgrade() else {
                    return;
                };

                match event {
                    TransportEvent::Message(payload) => {
                        connection.record_received();
                        pool.messages_total.fetch_add(1, Ordering::Relaxed);
                        MessageMetrics::record_received();
                        pool.emit(PoolEvent::Message {
                            connection_id: connection.id,
                            payload,
                        });
                    }
                    TransportEvent::Pong => connection.record_pong(),
                    TransportEvent::Error(error) => {
                        tracing::warn!(
                            pool_id = %pool.id,
                            connection_id = %connection.id,
                            error = %error,
                            "Transport error"
                        );
                        pool.mark_unhealthy(&connection);
                    }
                    TransportEvent::Close => break,
                }
            }

            // Close event or end of stream
            if let Some(pool) = pool.upgrade() {
                pool.remove_connection(connection.id);
            }
        })
    }

    /// Remove a connection. Returns false if it was not registered.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> bool {
        let Some((_, connection)) = self.connections.remove(&connection_id) else {
            return false;
        };

        if let Some(user_id) = &connection.user_id {
            if let Some(mut user_conns) = self.user_index.get_mut(user_id) {
                user_conns.remove(&connection_id);
                if user_conns.is_empty() {
                    drop(user_conns);
                    self.user_index.remove_if(user_id, |_, conns| conns.is_empty());
                }
            }
        }

        if connection.is_open() {
            connection.transport().close();
        }
        connection.release();
        connection.abort_pump();

        ConnectionMetrics::record_removed(&self.id);
        self.refresh_metrics(false);
        self.emit(PoolEvent::ConnectionRemoved(connection.info()));

        tracing::info!(
            pool_id = %self.id,
            connection_id = %connection_id,
            uptime_secs = connection.uptime().as_secs(),
            "Connection removed"
        );

        true
    }

    pub fn get_connection(&self, connection_id: ConnectionId) -> Option<Arc<PooledConnection>> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    pub fn get_user_connections(&self, user_id: &str) -> Vec<Arc<PooledConnection>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.user_index.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Open connections matching the filter
    pub fn matching_connections(&self, filter: &ConnectionFilter) -> Vec<Arc<PooledConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.is_open() && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn subscribe(&self, connection_id: ConnectionId, topic: &str) -> bool {
        let subscribed = self
            .get_connection(connection_id)
            .is_some_and(|c| c.subscribe(topic));
        if subscribed {
            tracing::debug!(pool_id = %self.id, connection_id = %connection_id, topic, "Subscribed to topic");
        }
        subscribed
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId, topic: &str) -> bool {
        let unsubscribed = self
            .get_connection(connection_id)
            .is_some_and(|c| c.unsubscribe(topic));
        if unsubscribed {
            tracing::debug!(pool_id = %self.id, connection_id = %connection_id, topic, "Unsubscribed from topic");
        }
        unsubscribed
    }

    /// Send to every open connection matching the filter.
    ///
    /// Returns the number of successful sends. A failed send marks that
    /// connection unhealthy and does not stop the broadcast.
    pub fn broadcast(&self, payload: &Payload, filter: &ConnectionFilter) -> usize {
        let targets = self.matching_connections(filter);
        let sent = targets
            .iter()
            .filter(|connection| self.deliver(connection, payload))
            .count();

        MessageMetrics::record_sent("broadcast", sent as u64);
        tracing::debug!(
            pool_id = %self.id,
            targets = targets.len(),
            sent,
            "Broadcast completed"
        );
        sent
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, payload: &Payload) -> bool {
        let Some(connection) = self.get_connection(connection_id) else {
            return false;
        };
        if !connection.is_open() {
            return false;
        }

        let sent = self.deliver(&connection, payload);
        if sent {
            MessageMetrics::record_sent("direct", 1);
        }
        sent
    }

    fn deliver(&self, connection: &PooledConnection, payload: &Payload) -> bool {
        match connection.transport().send(payload) {
            Ok(()) => {
                connection.record_sent();
                self.messages_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(
                    pool_id = %self.id,
                    connection_id = %connection.id,
                    error = %e,
                    "Failed to send to connection"
                );
                MessageMetrics::record_failed();
                self.mark_unhealthy(connection);
                false
            }
        }
    }

    fn mark_unhealthy(&self, connection: &PooledConnection) {
        connection.set_healthy(false);
        ConnectionMetrics::record_unhealthy();
        self.emit(PoolEvent::ConnectionUnhealthy(connection.info()));
    }

    /// Ping every open connection and drop the dead or idle ones
    pub fn perform_heartbeat(&self) -> HeartbeatReport {
        let start = Instant::now();
        let idle_limit = self.config.connection_timeout();
        let connections: Vec<Arc<PooledConnection>> =
            self.connections.iter().map(|c| c.value().clone()).collect();

        let mut report = HeartbeatReport::default();
        let mut stale = Vec::new();

        for connection in &connections {
            if !connection.is_open() {
                stale.push(connection.id);
                continue;
            }

            if matches!(idle_limit, Some(limit) if connection.idle_for() > limit) {
                tracing::debug!(
                    pool_id = %self.id,
                    connection_id = %connection.id,
                    idle_ms = connection.idle_for().as_millis() as u64,
                    "Connection idle past timeout"
                );
                stale.push(connection.id);
                continue;
            }

            match connection.transport().ping() {
                Ok(()) => {
                    connection.record_ping_sent();
                    report.pinged += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        pool_id = %self.id,
                        connection_id = %connection.id,
                        error = %e,
                        "Ping failed"
                    );
                    stale.push(connection.id);
                }
            }
        }

        for connection_id in stale {
            if self.remove_connection(connection_id) {
                report.removed += 1;
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        HeartbeatMetrics::record_removals(report.removed as u64);

        tracing::debug!(
            pool_id = %self.id,
            total = connections.len(),
            pinged = report.pinged,
            removed = report.removed,
            duration_ms = elapsed_ms,
            "Heartbeat completed"
        );

        report
    }

    /// Recompute the metrics snapshot and emit `MetricsUpdated`.
    ///
    /// Rates are only resampled when `with_rates` is set; otherwise the
    /// previous rates are carried over.
    pub(crate) fn refresh_metrics(&self, with_rates: bool) {
        let snapshot = {
            let mut metrics = self.metrics.write();
            let mut next = self.compute_metrics();

            if with_rates {
                let (connections_per_second, messages_per_second) = self.sample_rates();
                next.connections_per_second = connections_per_second;
                next.messages_per_second = messages_per_second;
            } else {
                next.connections_per_second = metrics.connections_per_second;
                next.messages_per_second = metrics.messages_per_second;
            }

            *metrics = next.clone();
            next
        };

        self.emit(PoolEvent::MetricsUpdated(snapshot));
    }

    fn compute_metrics(&self) -> PoolMetrics {
        let mut total = 0usize;
        let mut healthy = 0usize;
        let mut latency_sum = 0.0;
        let mut latency_samples = 0usize;
        let mut uptime_sum = 0.0;

        for entry in self.connections.iter() {
            let connection = entry.value();
            total += 1;
            if connection.is_healthy() {
                healthy += 1;
            }
            if let Some(latency) = connection.latency() {
                latency_sum += latency.as_secs_f64() * 1000.0;
                latency_samples += 1;
            }
            uptime_sum += connection.uptime().as_secs_f64();
        }

        let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };

        PoolMetrics {
            total_connections: total,
            active_connections: healthy,
            connections_per_second: 0.0,
            messages_per_second: 0.0,
            average_latency_ms: mean(latency_sum, latency_samples),
            connection_uptime_secs: mean(uptime_sum, total),
            error_rate: mean((total - healthy) as f64 * 100.0, total),
            pool_utilization: if self.config.max_connections == 0 {
                100.0
            } else {
                total as f64 / self.config.max_connections as f64 * 100.0
            },
        }
    }

    /// Counter deltas since the previous sample divided by elapsed seconds
    fn sample_rates(&self) -> (f64, f64) {
        let mut window = self.rate_window.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(window.at).as_secs_f64();

        let connections_added = self.connections_added.load(Ordering::Relaxed);
        let messages_total = self.messages_total.load(Ordering::Relaxed);

        let rates = if elapsed > 0.0 {
            (
                (connections_added - window.connections_added) as f64 / elapsed,
                (messages_total - window.messages_total) as f64 / elapsed,
            )
        } else {
            (0.0, 0.0)
        };

        *window = RateWindow {
            at: now,
            connections_added,
            messages_total,
        };
        rates
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.read().clone()
    }

    pub fn status(&self) -> PoolStatus {
        let metrics = self.metrics();
        PoolStatus {
            pool_id: self.id.clone(),
            state: self.state(),
            connection_count: self.connection_count(),
            max_connections: self.config.max_connections,
            utilization: metrics.pool_utilization,
            healthy_connections: metrics.active_connections,
            metrics,
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PoolState::Active
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() != PoolState::Active
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PoolEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Close every connection and stop the pool.
    ///
    /// Each close waits for the transport's acknowledgement up to
    /// `close_timeout_ms`. Calling this again waits for the first shutdown to
    /// finish and reports `already_shut_down`.
    pub async fn shutdown(&self) -> PoolShutdownReport {
        let started = {
            let _admission = self.admission.lock();
            self.state.send_if_modified(|state| {
                if *state == PoolState::Active {
                    *state = PoolState::ShuttingDown;
                    true
                } else {
                    false
                }
            })
        };

        if !started {
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|s| *s == PoolState::Closed).await;
            return PoolShutdownReport {
                pool_id: self.id.clone(),
                already_shut_down: true,
                ..Default::default()
            };
        }

        tracing::info!(
            pool_id = %self.id,
            connections = self.connection_count(),
            "Shutting down connection pool"
        );

        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        let connections: Vec<Arc<PooledConnection>> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        let close_timeout = self.config.close_timeout();

        let outcomes = join_all(
            connections
                .into_iter()
                .map(|connection| self.close_connection(connection, close_timeout)),
        )
        .await;

        let mut report = PoolShutdownReport {
            pool_id: self.id.clone(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                CloseOutcome::Graceful => report.closed_gracefully += 1,
                CloseOutcome::Forced => report.force_dropped += 1,
                CloseOutcome::AlreadyClosed => report.already_closed += 1,
            }
        }

        let remaining: Vec<ConnectionId> = self.connections.iter().map(|c| *c.key()).collect();
        for connection_id in remaining {
            self.remove_connection(connection_id);
        }
        self.user_index.clear();
        ConnectionMetrics::reset_pool(&self.id);

        self.refresh_metrics(false);
        self.state.send_replace(PoolState::Closed);
        self.emit(PoolEvent::Shutdown);

        tracing::info!(
            pool_id = %self.id,
            closed_gracefully = report.closed_gracefully,
            force_dropped = report.force_dropped,
            already_closed = report.already_closed,
            "Connection pool shut down"
        );

        report
    }

    async fn close_connection(
        &self,
        connection: Arc<PooledConnection>,
        close_timeout: Duration,
    ) -> CloseOutcome {
        if !connection.is_open() {
            self.remove_connection(connection.id);
            return CloseOutcome::AlreadyClosed;
        }

        let mut released = connection.released();
        connection.transport().close();

        let acked = tokio::time::timeout(close_timeout, released.wait_for(|r| *r))
            .await
            .is_ok();
        if acked {
            return CloseOutcome::Graceful;
        }

        tracing::warn!(
            pool_id = %self.id,
            connection_id = %connection.id,
            timeout_ms = close_timeout.as_millis() as u64,
            "Connection did not acknowledge close, forcing drop"
        );
        self.remove_connection(connection.id);
        CloseOutcome::Forced
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}
