//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_OPENED_TOTAL, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_REMOVED_TOTAL,
    CONNECTIONS_UNHEALTHY_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_REMOVALS_TOTAL,
    MESSAGES_COMPRESSED_TOTAL, MESSAGES_FAILED_TOTAL, MESSAGES_RECEIVED_TOTAL,
    MESSAGES_SENT_TOTAL, POOL_CONNECTIONS, QUEUE_DROPPED_TOTAL, QUEUE_FAILED_TOTAL, QUEUE_SIZE,
    SYSTEM_UTILIZATION, THROTTLE_ALLOWED_TOTAL, THROTTLE_DENIED_TOTAL,
    THROTTLE_TRACKED_ADDRESSES,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(pool_id: &str) {
        CONNECTIONS_OPENED_TOTAL.inc();
        POOL_CONNECTIONS.with_label_values(&[pool_id]).inc();
    }

    pub fn record_removed(pool_id: &str) {
        CONNECTIONS_REMOVED_TOTAL.inc();
        POOL_CONNECTIONS.with_label_values(&[pool_id]).dec();
    }

    /// Reset a pool's gauge after shutdown clears it
    pub fn reset_pool(pool_id: &str) {
        POOL_CONNECTIONS.with_label_values(&[pool_id]).set(0);
    }

    pub fn record_rejected(reason: &str) {
        CONNECTIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_unhealthy() {
        CONNECTIONS_UNHEALTHY_TOTAL.inc();
    }

    pub fn set_system_utilization(percent: f64) {
        SYSTEM_UTILIZATION.set(percent);
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record successful sends on a path ("broadcast", "direct", "queued")
    pub fn record_sent(path: &str, count: u64) {
        if count > 0 {
            MESSAGES_SENT_TOTAL.with_label_values(&[path]).inc_by(count);
        }
    }

    pub fn record_failed() {
        MESSAGES_FAILED_TOTAL.inc();
    }

    pub fn record_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
    }

    pub fn record_compressed() {
        MESSAGES_COMPRESSED_TOTAL.inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(duration_ms: f64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms);
    }

    pub fn record_removals(count: u64) {
        HEARTBEAT_REMOVALS_TOTAL.inc_by(count);
    }
}

/// Helper struct for throttle metrics
pub struct ThrottleMetrics;

impl ThrottleMetrics {
    pub fn record_allowed() {
        THROTTLE_ALLOWED_TOTAL.inc();
    }

    pub fn record_denied() {
        THROTTLE_DENIED_TOTAL.inc();
    }

    pub fn set_tracked(count: usize) {
        THROTTLE_TRACKED_ADDRESSES.set(count as i64);
    }
}

/// Helper struct for queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn set_size(size: usize) {
        QUEUE_SIZE.set(size as i64);
    }

    pub fn record_dropped() {
        QUEUE_DROPPED_TOTAL.inc();
    }

    pub fn record_failed(count: u64) {
        if count > 0 {
            QUEUE_FAILED_TOTAL.inc_by(count);
        }
    }
}
