//! Pooled connection handle and related types

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::transport::{Transport, TransportEvent};

pub type ConnectionId = Uuid;

/// Ping bookkeeping for round-trip latency
#[derive(Debug, Default)]
struct PingState {
    sent_at: Option<Instant>,
    latency: Option<Duration>,
}

/// A connection owned by exactly one pool
pub struct PooledConnection {
    pub id: ConnectionId,
    pub pool_id: String,
    pub user_id: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub connected_at: DateTime<Utc>,
    started: Instant,
    /// Last activity (Unix milliseconds)
    last_activity: AtomicI64,
    subscriptions: RwLock<HashSet<String>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    healthy: AtomicBool,
    ping: Mutex<PingState>,
    transport: Arc<dyn Transport>,
    /// Flips to true once the pool has released the connection
    released: watch::Sender<bool>,
    pump: Mutex<Option<AbortHandle>>,
}

impl PooledConnection {
    pub(crate) fn new(
        pool_id: String,
        user_id: Option<String>,
        remote_addr: Option<IpAddr>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let now = Utc::now();
        let (released, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            pool_id,
            user_id,
            remote_addr,
            connected_at: now,
            started: Instant::now(),
            last_activity: AtomicI64::new(now.timestamp_millis()),
            subscriptions: RwLock::new(HashSet::new()),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            ping: Mutex::new(PingState::default()),
            transport,
            released,
            pump: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let elapsed = Utc::now().timestamp_millis() - self.last_activity.load(Ordering::Relaxed);
        Duration::from_millis(elapsed.max(0) as u64)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.update_activity();
    }

    pub(crate) fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.update_activity();
    }

    pub(crate) fn record_ping_sent(&self) {
        self.ping.lock().sent_at = Some(Instant::now());
    }

    /// Pong received: refresh activity, restore health, sample latency
    pub(crate) fn record_pong(&self) {
        {
            let mut ping = self.ping.lock();
            if let Some(sent_at) = ping.sent_at.take() {
                ping.latency = Some(sent_at.elapsed());
            }
        }
        self.update_activity();
        self.set_healthy(true);
    }

    /// Last measured ping round trip
    pub fn latency(&self) -> Option<Duration> {
        self.ping.lock().latency
    }

    pub fn subscribe(&self, topic: &str) -> bool {
        self.subscriptions.write().insert(topic.to_string())
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions.write().remove(topic)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.read().contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub(crate) fn set_pump(&self, handle: AbortHandle) {
        *self.pump.lock() = Some(handle);
    }

    pub(crate) fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn release(&self) {
        self.released.send_replace(true);
    }

    pub(crate) fn released(&self) -> watch::Receiver<bool> {
        self.released.subscribe()
    }

    /// Serializable snapshot
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            pool_id: self.pool_id.clone(),
            user_id: self.user_id.clone(),
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
            last_activity: self.last_activity(),
            subscriptions: self.subscriptions(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
            healthy: self.is_healthy(),
            latency_ms: self.latency().map(|l| l.as_secs_f64() * 1000.0),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("user_id", &self.user_id)
            .field("remote_addr", &self.remote_addr)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

/// Snapshot of a connection carried by events and API responses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub pool_id: String,
    pub user_id: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub subscriptions: Vec<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub healthy: bool,
    pub latency_ms: Option<f64>,
}

/// Everything a pool needs to admit a connection
pub struct ConnectionRequest {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub user_id: Option<String>,
    pub remote_addr: Option<IpAddr>,
}

impl ConnectionRequest {
    pub fn new(transport: Arc<dyn Transport>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            transport,
            events,
            user_id: None,
            remote_addr: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_optional_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn connection() -> PooledConnection {
        let (transport, _tx, _rx) = MockTransport::open();
        PooledConnection::new("pool-a".to_string(), Some("user-1".to_string()), None, transport)
    }

    #[test]
    fn test_counters_and_activity() {
        let conn = connection();
        conn.record_sent();
        conn.record_sent();
        conn.record_received();

        assert_eq!(conn.messages_sent(), 2);
        assert_eq!(conn.messages_received(), 1);
        assert!(conn.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_pong_restores_health_and_samples_latency() {
        let conn = connection();
        conn.set_healthy(false);
        assert!(conn.latency().is_none());

        conn.record_ping_sent();
        conn.record_pong();

        assert!(conn.is_healthy());
        assert!(conn.latency().is_some());
    }

    #[test]
    fn test_subscriptions_sorted_in_snapshot() {
        let conn = connection();
        assert!(conn.subscribe("zeta"));
        assert!(conn.subscribe("alpha"));
        assert!(!conn.subscribe("alpha"));
        assert!(conn.unsubscribe("zeta"));

        let info = conn.info();
        assert_eq!(info.subscriptions, vec!["alpha".to_string()]);
        assert_eq!(info.pool_id, "pool-a");
        assert_eq!(info.user_id.as_deref(), Some("user-1"));
    }
}
