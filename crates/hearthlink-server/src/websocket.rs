//! WebSocket handler for realtime event delivery
//!
//! A single endpoint serves both roles: client connections are registered in
//! the notification registry for targeted pushes, admin connections follow
//! the admin broadcast stream. Authentication happens before the upgrade via
//! the same gate the HTTP layer uses.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use hearthlink_auth::Principal;
use hearthlink_core::{Event, EventKind};
use hearthlink_notify::{ConnectionHandle, Outbound};
use hearthlink_store::ClientId;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Query parameters for WebSocket connections
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer credential (alternative to the Authorization header)
    #[serde(default)]
    token: Option<String>,
}

/// Extract the credential from query or Authorization header
fn extract_credential(query: &WsQuery, headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(token) = &query.token {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Realtime endpoint handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    let credential = extract_credential(&query, &headers);
    let principal = match state.gate.authenticate(credential.as_deref()).await {
        Ok(principal) => principal,
        Err(_) => {
            warn!("WebSocket connection rejected");
            return (StatusCode::UNAUTHORIZED, "Authentication required").into_response();
        }
    };

    match principal {
        Principal::Client { client_id, .. } => ws
            .on_upgrade(move |socket| handle_client_socket(socket, state, client_id))
            .into_response(),
        Principal::Admin { username } => ws
            .on_upgrade(move |socket| handle_admin_socket(socket, state, username))
            .into_response(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

/// Handle an authenticated client connection
pub async fn handle_client_socket(socket: WebSocket, state: Arc<AppState>, client_id: ClientId) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut outbound_rx) = ConnectionHandle::new();
    let conn_id = handle.conn_id;
    state.registry.register(client_id.clone(), handle).await;
    info!("Client {} connected", client_id);

    let connected = Event::new(EventKind::Connected {
        subject: client_id.to_string(),
        role: "client".to_string(),
    });
    if send_event(&mut sender, &connected).await.is_err() {
        warn!("Failed to send connected event to client {}", client_id);
        state.registry.unregister(&client_id, conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Event(event)) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    // Channel closed: this connection was replaced
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring message from client {}", client_id);
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(&client_id, conn_id).await;
    info!("Client {} disconnected", client_id);
}

/// Handle an authenticated admin connection
pub async fn handle_admin_socket(socket: WebSocket, state: Arc<AppState>, username: String) {
    let (mut sender, mut receiver) = socket.split();

    let mut events = state.registry.subscribe_admins();
    info!("Admin {} connected", username);

    let connected = Event::new(EventKind::Connected {
        subject: username.clone(),
        role: "admin".to_string(),
    });
    if send_event(&mut sender, &connected).await.is_err() {
        warn!("Failed to send connected event to admin {}", username);
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Admin {} lagged {} events", username, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("Admin {} disconnected", username);
}
