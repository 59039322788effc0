//! Broadcast target selection

use std::net::IpAddr;

use serde::Deserialize;

use super::connection::{ConnectionId, PooledConnection};

/// Which connections a broadcast reaches
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConnectionFilter {
    #[default]
    All,
    User(String),
    Users(Vec<String>),
    Topic(String),
    Healthy,
    Address(IpAddr),
    Exclude(ConnectionId),
}

impl ConnectionFilter {
    pub fn matches(&self, connection: &PooledConnection) -> bool {
        match self {
            Self::All => true,
            Self::User(user_id) => connection.user_id.as_deref() == Some(user_id.as_str()),
            Self::Users(user_ids) => connection
                .user_id
                .as_ref()
                .is_some_and(|id| user_ids.iter().any(|u| u == id)),
            Self::Topic(topic) => connection.is_subscribed(topic),
            Self::Healthy => connection.is_healthy(),
            Self::Address(addr) => connection.remote_addr == Some(*addr),
            Self::Exclude(id) => connection.id != *id,
        }
    }
}
