use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Claims;
use crate::metrics::WS_CONNECTION_DURATION;
use crate::pool::{ConnectionId, ConnectionPool, ConnectionRequest};
use crate::server::AppState;
use crate::transport::{ChannelTransport, OutboundFrame, Payload, Transport, TransportEvent};

use super::message::{ClientMessage, ServerMessage};

/// Inbound events buffered between the socket reader and the pool
const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(remote_addr = %addr, has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);

    let claims = match &state.jwt_validator {
        Some(validator) => match validator.authenticate(token.as_deref()) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket authentication failed");
                return e.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims, addr.ip()))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, claims),
    fields(user_id = claims.as_ref().map(|c| c.sub.as_str()).unwrap_or("-"))
)]
async fn handle_socket(socket: WebSocket, state: AppState, claims: Option<Claims>, ip: IpAddr) {
    let connection_start = std::time::Instant::now();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (transport, mut outbound) = ChannelTransport::new(state.settings.server.ws_send_buffer);
    let transport = Arc::new(transport);
    let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_BUFFER_SIZE);

    let request = ConnectionRequest::new(transport.clone(), events_rx)
        .with_optional_user(claims.as_ref().map(|c| c.sub.clone()))
        .with_remote_addr(ip);

    let placed = match state.pool_manager.add_connection_with_scale(request) {
        Ok(placed) => placed,
        Err(e) => {
            tracing::warn!(remote_addr = %ip, error = %e, "Connection rejected");
            if let Ok(json) = ServerMessage::error(e.code(), e.to_string()).to_json() {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = placed.connection_id;

    let Some(pool) = state.pool_manager.manager().get_pool(&placed.pool_id) else {
        tracing::error!(pool_id = %placed.pool_id, "Pool vanished after admission");
        let _ = ws_sender.close().await;
        return;
    };

    if let Some(claims) = &claims {
        for topic in claim_topics(claims) {
            pool.subscribe(connection_id, topic);
        }
    }

    tracing::info!(
        connection_id = %connection_id,
        pool_id = %placed.pool_id,
        remote_addr = %ip,
        "WebSocket connection established"
    );

    send_server_message(
        transport.as_ref(),
        &ServerMessage::Connected {
            connection_id,
            pool_id: placed.pool_id.clone(),
        },
    );

    // Task for writing outbound frames to the socket. The stream ends once
    // the transport is closed, and the socket is always sent a close frame.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                OutboundFrame::Payload(Payload::Text(text)) => Message::Text(text.into()),
                OutboundFrame::Payload(Payload::Binary(bytes)) => Message::Binary(bytes.into()),
                OutboundFrame::Ping => Message::Ping(Bytes::new()),
                OutboundFrame::Close => break,
            };

            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Task for turning socket frames into transport events
    let recv_pool = pool.clone();
    let recv_transport = transport.clone();
    let recv_events = events_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            let event = match result {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(control) => {
                            handle_client_message(
                                control,
                                &recv_pool,
                                recv_transport.as_ref(),
                                connection_id,
                            );
                            continue;
                        }
                        Err(_) => TransportEvent::Message(Payload::Text(text.to_string())),
                    }
                }
                Ok(Message::Binary(bytes)) => TransportEvent::Message(Payload::Binary(bytes.to_vec())),
                Ok(Message::Pong(_)) => TransportEvent::Pong,
                // Pings are answered by axum
                Ok(Message::Ping(_)) => continue,
                Ok(Message::Close(_)) => break,
                Err(e) => TransportEvent::Error(e.to_string()),
            };

            let fatal = matches!(event, TransportEvent::Error(_));
            if recv_events.send(event).await.is_err() || fatal {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }
    send_task.abort();
    recv_task.abort();

    transport.mark_closed();
    // Acknowledge the close to the pool's event pump
    let _ = events_tx.try_send(TransportEvent::Close);
    pool.remove_connection(connection_id);

    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        pool_id = %placed.pool_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

fn send_server_message(transport: &dyn Transport, message: &ServerMessage) {
    match message.to_payload() {
        Ok(payload) => {
            if let Err(e) = transport.send(&payload) {
                tracing::debug!(error = %e, "Failed to send server message");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize server message"),
    }
}

/// Handle a parsed client control message
fn handle_client_message(
    msg: ClientMessage,
    pool: &ConnectionPool,
    transport: &dyn Transport,
    connection_id: ConnectionId,
) {
    match msg {
        ClientMessage::Subscribe { topics } => {
            let (valid, invalid): (Vec<String>, Vec<String>) =
                topics.into_iter().partition(|t| is_valid_topic_name(t));

            for topic in &valid {
                pool.subscribe(connection_id, topic);
            }
            if !valid.is_empty() {
                send_server_message(transport, &ServerMessage::subscribed(valid));
            }
            if !invalid.is_empty() {
                send_server_message(
                    transport,
                    &ServerMessage::error(
                        "INVALID_TOPIC",
                        format!("Invalid topic names: {}", invalid.join(", ")),
                    ),
                );
            }
        }
        ClientMessage::Unsubscribe { topics } => {
            for topic in &topics {
                pool.unsubscribe(connection_id, topic);
            }
            send_server_message(transport, &ServerMessage::unsubscribed(topics));
        }
        ClientMessage::Ping => send_server_message(transport, &ServerMessage::Pong),
    }
}

/// Topics from the token claims that pass name validation
fn claim_topics(claims: &Claims) -> Vec<&str> {
    claims
        .topics
        .iter()
        .map(String::as_str)
        .filter(|topic| {
            let valid = is_valid_topic_name(topic);
            if !valid {
                tracing::warn!(user_id = %claims.sub, topic = %topic, "Ignoring invalid topic in token claims");
            }
            valid
        })
        .collect()
}

/// Validate topic name
fn is_valid_topic_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPoolConfig;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_valid_topic_names() {
        assert!(is_valid_topic_name("orders"));
        assert!(is_valid_topic_name("system-alerts"));
        assert!(is_valid_topic_name("v1.events"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("topic with spaces"));
        assert!(!is_valid_topic_name(&"a".repeat(65)));
    }

    #[test]
    fn test_claim_topics_skips_invalid_names() {
        let claims = Claims {
            sub: "user-1".into(),
            exp: 0,
            iat: 0,
            topics: vec![
                "orders".into(),
                "bad topic".into(),
                String::new(),
                "x".repeat(65),
                "v1.events".into(),
            ],
        };

        assert_eq!(claim_topics(&claims), vec!["orders", "v1.events"]);
    }

    #[test]
    fn test_extract_token_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());

        let query = WsQuery {
            token: Some("from-query".into()),
        };
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-query"));

        let query = WsQuery { token: None };
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-header"));
        assert_eq!(extract_token(&query, &HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_control_messages_update_subscriptions() {
        let pool = ConnectionPool::new("p", ConnectionPoolConfig::default());
        let (transport, _tx, rx) = MockTransport::open();
        let id = pool
            .add_connection(ConnectionRequest::new(transport.clone(), rx))
            .unwrap();

        handle_client_message(
            ClientMessage::Subscribe {
                topics: vec!["prices".into(), "bad topic".into()],
            },
            &pool,
            transport.as_ref(),
            id,
        );
        assert!(pool.get_connection(id).unwrap().is_subscribed("prices"));

        // subscribed confirmation plus invalid-topic error
        assert_eq!(transport.sent_count(), 2);

        handle_client_message(
            ClientMessage::Unsubscribe {
                topics: vec!["prices".into()],
            },
            &pool,
            transport.as_ref(),
            id,
        );
        assert!(!pool.get_connection(id).unwrap().is_subscribed("prices"));
    }
}
