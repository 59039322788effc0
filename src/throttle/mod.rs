//! Fixed-window connection throttle keyed by remote address

use std::net::IpAddr;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::metrics::ThrottleMetrics;

pub const DEFAULT_MAX_PER_WINDOW: u32 = 20;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Attempts seen for one address in the current window
#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStats {
    pub tracked_addresses: usize,
    pub max_per_window: u32,
    pub window_secs: u64,
}

/// Limits how many connection attempts one address may make per window
pub struct ConnectionThrottle {
    windows: DashMap<IpAddr, WindowRecord>,
    max_per_window: u32,
    window: Duration,
}

impl Default for ConnectionThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW)
    }
}

impl ConnectionThrottle {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_per_window,
            window,
        }
    }

    /// Record an attempt and report whether it may proceed.
    ///
    /// The first attempt of a window opens it with a count of one. Once the
    /// count reaches the limit every attempt is refused until the window
    /// passes.
    pub fn can_connect(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let fresh = WindowRecord {
            count: 1,
            reset_at: now + self.window,
        };

        let allowed = match self.windows.entry(ip) {
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                true
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now > record.reset_at {
                    *record = fresh;
                    true
                } else if record.count >= self.max_per_window {
                    false
                } else {
                    record.count += 1;
                    true
                }
            }
        };

        if allowed {
            ThrottleMetrics::record_allowed();
        } else {
            ThrottleMetrics::record_denied();
            tracing::debug!(ip = %ip, limit = self.max_per_window, "Connection attempt throttled");
        }

        allowed
    }

    /// Drop windows that have expired
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, record| now <= record.reset_at);
        let removed = before.saturating_sub(self.windows.len());

        ThrottleMetrics::set_tracked(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired throttle windows");
        }

        removed
    }

    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            tracked_addresses: self.tracked_addresses(),
            max_per_window: self.max_per_window,
            window_secs: self.window.as_secs(),
        }
    }
}
