use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::Payload;

/// Control messages sent from client to server.
///
/// Text frames that do not parse as one of these are delivered to the pool
/// as ordinary messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        connection_id: Uuid,
        pool_id: String,
    },
    Subscribed {
        topics: Vec<String>,
    },
    Unsubscribed {
        topics: Vec<String>,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(topics: Vec<String>) -> Self {
        Self::Subscribed { topics }
    }

    pub fn unsubscribed(topics: Vec<String>) -> Self {
        Self::Unsubscribed { topics }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        self.to_json().map(Payload::Text)
    }
}
