//! `GET /ws/trades?token=<jwt>`
//!
//! Streams the user's trade events as JSON text frames. The first frame is
//! a `connected` greeting; a `ping` text frame is answered with `pong`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::application::services::broadcaster::{EventBroadcaster, TradeEvent};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn trades_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let user_id = match state.jwt.verify(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("WebSocket subscription rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let broadcaster = state.processor.broadcaster().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, broadcaster))
}

fn is_ping(text: &str) -> bool {
    let text = text.trim();
    if text.eq_ignore_ascii_case("ping") {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false)
}

fn frame(event: &TradeEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!("Cannot serialize {} event: {}", event.kind(), e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, user_id: String, broadcaster: Arc<EventBroadcaster>) {
    let mut subscription = broadcaster.subscribe(&user_id);
    let (mut sender, mut receiver) = socket.split();
    info!("Subscriber {} connected for user {}", subscription.id, user_id);

    let greeting = TradeEvent::Connected {
        user_id: user_id.clone(),
    };
    if let Some(message) = frame(&greeting) {
        if sender.send(message).await.is_err() {
            broadcaster.unsubscribe(&user_id, subscription.id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                // None: the broadcaster dropped this subscriber
                let Some(event) = event else { break };
                let Some(message) = frame(&event) else { continue };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if is_ping(&text) => {
                        if let Some(message) = frame(&TradeEvent::Pong) {
                            if sender.send(message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Subscriber {} socket error: {}", subscription.id, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    broadcaster.unsubscribe(&user_id, subscription.id);
    info!("Subscriber {} for user {} disconnected", subscription.id, user_id);
}
