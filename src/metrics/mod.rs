//! Prometheus metrics for the pool service.
//!
//! - Connection metrics (per-pool gauges, opened/removed/rejected counters)
//! - Message metrics (sent by path, failed, received)
//! - Heartbeat metrics
//! - Throttle and queue metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, HeartbeatMetrics, MessageMetrics, QueueMetrics,
    ThrottleMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ws_pool";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently held, by pool
    pub static ref POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections", METRIC_PREFIX),
        "Connections currently held by each pool",
        &["pool"]
    ).unwrap();

    /// Total connections admitted
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections admitted into a pool"
    ).unwrap();

    /// Total connections removed
    pub static ref CONNECTIONS_REMOVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_removed_total", METRIC_PREFIX),
        "Total connections removed from a pool"
    ).unwrap();

    /// Admissions rejected, by reason code
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connection admissions rejected",
        &["reason"]
    ).unwrap();

    /// Connections flagged unhealthy
    pub static ref CONNECTIONS_UNHEALTHY_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_unhealthy_total", METRIC_PREFIX),
        "Total times a connection was flagged unhealthy"
    ).unwrap();

    /// System-wide utilization against the total connection cap (percent)
    pub static ref SYSTEM_UTILIZATION: Gauge = register_gauge!(
        format!("{}_system_utilization_percent", METRIC_PREFIX),
        "Connections in use as a percentage of the system-wide cap"
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages sent, by path (broadcast, direct, queued)
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages written to a transport",
        &["path"]
    ).unwrap();

    /// Transport send failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total transport send failures"
    ).unwrap();

    /// Messages received from clients
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total messages received from clients"
    ).unwrap();

    /// Payloads compressed on the optimized broadcast path
    pub static ref MESSAGES_COMPRESSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_compressed_total", METRIC_PREFIX),
        "Total broadcast payloads gzip-compressed"
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 1000.0]
    ).unwrap();

    /// Connections removed by the heartbeat
    pub static ref HEARTBEAT_REMOVALS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_removals_total", METRIC_PREFIX),
        "Total connections removed by the heartbeat"
    ).unwrap();

    // ============================================================================
    // Throttle Metrics
    // ============================================================================

    /// Connections allowed by the address throttle
    pub static ref THROTTLE_ALLOWED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_throttle_allowed_total", METRIC_PREFIX),
        "Total connection attempts allowed by the address throttle"
    ).unwrap();

    /// Connections denied by the address throttle
    pub static ref THROTTLE_DENIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_throttle_denied_total", METRIC_PREFIX),
        "Total connection attempts denied by the address throttle"
    ).unwrap();

    /// Addresses with a live throttle window
    pub static ref THROTTLE_TRACKED_ADDRESSES: IntGauge = register_int_gauge!(
        format!("{}_throttle_tracked_addresses", METRIC_PREFIX),
        "Addresses with a live throttle window"
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Messages waiting in the burst queue
    pub static ref QUEUE_SIZE: IntGauge = register_int_gauge!(
        format!("{}_queue_size", METRIC_PREFIX),
        "Messages waiting in the burst queue"
    ).unwrap();

    /// Messages evicted from a full queue
    pub static ref QUEUE_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_dropped_total", METRIC_PREFIX),
        "Total lowest-priority messages evicted from a full queue"
    ).unwrap();

    /// Queued messages whose delivery failed
    pub static ref QUEUE_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_failed_total", METRIC_PREFIX),
        "Total queued messages that could not be delivered"
    ).unwrap();
}
