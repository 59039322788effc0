//! Connection pool configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy used by the pool manager to place new connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    #[default]
    LeastConnections,
    Weighted,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::Weighted => "weighted",
        }
    }
}

/// Configuration for a single connection pool.
///
/// Immutable once the pool is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    /// Maximum connections held by one pool
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum connections per user within one pool
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    /// Idle time (no pong, message or send) after which the heartbeat drops a
    /// connection. Zero disables the idle check.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Heartbeat (ping) interval
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Metrics refresh interval
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Upper bound on waiting for a close acknowledgement during shutdown
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Reserved, not consulted by any send or connect path
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Reserved, not consulted by any send or connect path
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    /// Periodic metrics refresh. Counts are still recomputed on add/remove.
    #[serde(default = "default_metrics_enabled")]
    pub metrics: bool,
    /// Per-pool weights for the weighted strategy (pool id -> weight)
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

fn default_max_connections() -> usize {
    2000
}

fn default_max_connections_per_user() -> usize {
    5
}

fn default_connection_timeout_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_metrics_interval_ms() -> u64 {
    10_000
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            connection_timeout_ms: default_connection_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            load_balancing: LoadBalancingStrategy::default(),
            metrics: default_metrics_enabled(),
            weights: HashMap::new(),
        }
    }
}

impl ConnectionPoolConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        (self.connection_timeout_ms > 0).then(|| Duration::from_millis(self.connection_timeout_ms))
    }
}

/// Partial configuration merged onto a manager's base config when a pool is
/// created
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PoolConfigOverride {
    pub max_connections: Option<usize>,
    pub max_connections_per_user: Option<usize>,
    pub connection_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub metrics_interval_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub metrics: Option<bool>,
}

impl PoolConfigOverride {
    pub fn apply(&self, base: &ConnectionPoolConfig) -> ConnectionPoolConfig {
        let mut config = base.clone();
        if let Some(v) = self.max_connections {
            config.max_connections = v;
        }
        if let Some(v) = self.max_connections_per_user {
            config.max_connections_per_user = v;
        }
        if let Some(v) = self.connection_timeout_ms {
            config.connection_timeout_ms = v;
        }
        if let Some(v) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = v;
        }
        if let Some(v) = self.metrics_interval_ms {
            config.metrics_interval_ms = v;
        }
        if let Some(v) = self.close_timeout_ms {
            config.close_timeout_ms = v;
        }
        if let Some(v) = self.retry_attempts {
            config.retry_attempts = v;
        }
        if let Some(v) = self.retry_delay_ms {
            config.retry_delay_ms = v;
        }
        if let Some(v) = self.metrics {
            config.metrics = v;
        }
        config
    }
}
