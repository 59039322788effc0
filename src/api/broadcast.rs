//! Broadcast endpoint.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::manager::BroadcastOptions;
use crate::pool::ConnectionFilter;
use crate::server::AppState;
use crate::transport::Payload;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Strings are sent verbatim, other JSON values serialized
    pub message: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub compress: Option<bool>,
    #[serde(default)]
    pub use_queue: bool,
    pub user_id: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    /// Direct sends, or messages queued when `queued` is set
    pub delivered: usize,
    pub queued: bool,
}

impl BroadcastRequest {
    fn payload(&self) -> Result<Payload> {
        let text = match &self.message {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if text.is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }
        Ok(Payload::Text(text))
    }

    fn filter(&self) -> Result<ConnectionFilter> {
        match (&self.user_id, &self.topic) {
            (Some(_), Some(_)) => Err(AppError::Validation(
                "user_id and topic are mutually exclusive".to_string(),
            )),
            (Some(user_id), None) => Ok(ConnectionFilter::User(user_id.clone())),
            (None, Some(topic)) => Ok(ConnectionFilter::Topic(topic.clone())),
            (None, None) => Ok(ConnectionFilter::All),
        }
    }
}

/// POST /api/v1/broadcast - Broadcast across every pool
#[tracing::instrument(
    name = "api.broadcast",
    skip(state, request),
    fields(priority = request.priority, use_queue = request.use_queue)
)]
pub async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    let payload = request.payload()?;
    let filter = request.filter()?;

    let options = BroadcastOptions {
        compress: request.compress,
        priority: request.priority,
        filter,
        use_queue: request.use_queue,
    };

    let delivered = state
        .pool_manager
        .broadcast_optimized(payload, options)
        .await;

    tracing::info!(delivered = delivered, "Broadcast completed");

    Ok(Json(BroadcastResponse {
        delivered,
        queued: request.use_queue,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> BroadcastRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_payload_from_string_and_object() {
        let req = request(serde_json::json!({ "message": "hello" }));
        assert_eq!(req.payload().unwrap(), Payload::text("hello"));

        let req = request(serde_json::json!({ "message": { "price": 10 } }));
        assert_eq!(req.payload().unwrap(), Payload::text(r#"{"price":10}"#));
    }

    #[test]
    fn test_empty_message_rejected() {
        let req = request(serde_json::json!({ "message": "" }));
        assert!(matches!(req.payload(), Err(AppError::Validation(_))));

        let req = request(serde_json::json!({ "message": null }));
        assert!(matches!(req.payload(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_filter_selection() {
        let req = request(serde_json::json!({ "message": "m", "user_id": "u1" }));
        assert_eq!(req.filter().unwrap(), ConnectionFilter::User("u1".into()));

        let req = request(serde_json::json!({ "message": "m", "topic": "news" }));
        assert_eq!(req.filter().unwrap(), ConnectionFilter::Topic("news".into()));

        let req = request(serde_json::json!({ "message": "m" }));
        assert_eq!(req.filter().unwrap(), ConnectionFilter::All);

        let req = request(serde_json::json!({ "message": "m", "user_id": "u", "topic": "t" }));
        assert!(req.filter().is_err());
    }
}
