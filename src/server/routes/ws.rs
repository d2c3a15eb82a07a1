//! WebSocket endpoint: the transport behind the push fabric.
//!
//! One live socket per user. The socket pump forwards fabric envelopes to
//! the client, answers client-level pings, sends transport pings on the
//! configured cadence, and closes when the read deadline passes without any
//! inbound traffic or when the fabric replaces the binding.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::kernel::push_fabric::{Envelope, PushFabric};
use crate::server::app::AppState;
use crate::server::routes::error_response;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: String,
}

/// GET /ws?user_id=… — upgrade to the push channel.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing user_id parameter");
    }

    let push = state.push.clone();
    ws.on_upgrade(move |socket| client_session(socket, push, query.user_id))
}

/// Inbound client message; only the type tag matters to the transport.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

async fn client_session(socket: WebSocket, push: PushFabric, user_id: String) {
    let heartbeat = push.heartbeat().clone();
    let bound = push.bind(&user_id).await;
    let generation = bound.generation;
    let closed = bound.closed;
    let mut outbox = bound.rx;

    tracing::debug!(user_id = %user_id, "push channel connected");

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(heartbeat.ping_interval);
    ping.tick().await; // skip the immediate tick

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                // replaced by a newer binding for the same user
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            envelope = outbox.recv() => {
                let Some(envelope) = envelope else { break };
                match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, error = %e, "failed to encode envelope");
                    }
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            inbound = tokio::time::timeout(heartbeat.read_deadline, stream.next()) => {
                match inbound {
                    Err(_) => {
                        tracing::debug!(user_id = %user_id, "read deadline passed, closing channel");
                        break;
                    }
                    Ok(None) | Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(message))) => {
                        push.note_received(&user_id).await;
                        match message {
                            Message::Text(text) => {
                                if let Some(reply) = client_reply(&user_id, &text) {
                                    match serde_json::to_string(&reply) {
                                        Ok(text) => {
                                            if sink.send(Message::Text(text.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(e) => {
                                            tracing::error!(user_id = %user_id, error = %e, "failed to encode reply");
                                        }
                                    }
                                }
                            }
                            Message::Close(_) => break,
                            // transport pongs reset the deadline by arriving
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    push.unbind(&user_id, generation).await;
    tracing::debug!(user_id = %user_id, "push channel disconnected");
}

fn client_reply(user_id: &str, text: &str) -> Option<Envelope> {
    let message: ClientMessage = serde_json::from_str(text).ok()?;
    match message.kind.as_str() {
        "ping" => Some(Envelope::new("pong", json!({ "user_id": user_id }))),
        other => {
            tracing::debug!(user_id = %user_id, kind = %other, "ignoring client message");
            None
        }
    }
}
