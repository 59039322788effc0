use std::net::IpAddr;

use thiserror::Error;

/// Errors surfaced synchronously to callers of admission operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool {pool_id} is shutting down")]
    ShuttingDown { pool_id: String },

    #[error("Connection pool {pool_id} at maximum capacity ({current}/{max})")]
    PoolFull {
        pool_id: String,
        current: usize,
        max: usize,
    },

    #[error("User {user_id} has reached maximum connection limit ({current}/{max})")]
    UserLimitExceeded {
        user_id: String,
        current: usize,
        max: usize,
    },

    #[error("No available connection pools")]
    NoPoolsAvailable,

    #[error("Pool {0} already exists")]
    DuplicatePool(String),

    #[error("Pool {0} not found")]
    PoolNotFound(String),

    #[error("Connection rate limit exceeded for {0}")]
    Throttled(IpAddr),

    #[error("System at maximum capacity ({current}/{max})")]
    SystemAtCapacity { current: usize, max: usize },
}

impl PoolError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ShuttingDown { .. } | Self::NoPoolsAvailable => "POOL_UNAVAILABLE",
            Self::PoolFull { .. } | Self::SystemAtCapacity { .. } => "CAPACITY_EXCEEDED",
            Self::UserLimitExceeded { .. } => "USER_LIMIT_EXCEEDED",
            Self::DuplicatePool(_) => "DUPLICATE_POOL",
            Self::PoolNotFound(_) => "POOL_NOT_FOUND",
            Self::Throttled(_) => "RATE_LIMITED",
        }
    }

    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::PoolFull { .. } | Self::UserLimitExceeded { .. } | Self::SystemAtCapacity { .. }
        )
    }
}
