//! WebSocket upgrade endpoint for topic subscriptions.
//!
//! `GET /ws?code=123456&userId=u1&userName=Alice`. The edge trusts the
//! caller-supplied identity; authenticating that identity is the caller's
//! job, not this crate's.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::orchestrator::SessionOrchestrator;
use crate::topic::TopicSubscription;
use crate::types::{Envelope, SessionCode, UserId};

use super::types::ClientMessage;

#[derive(Debug, Deserialize)]
pub struct WsSubscribeParams {
    code: String,
    user_id: String,
    user_name: String,
}

pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Query(params): Query<WsSubscribeParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator, params))
}

async fn handle_socket(
    socket: WebSocket,
    orchestrator: Arc<SessionOrchestrator>,
    params: WsSubscribeParams,
) {
    let code = SessionCode::from_raw(params.code);
    let user = UserId(params.user_id);

    let mut subscription = TopicSubscription::open(orchestrator.clone(), code.clone(), user.clone());

    let (mut writer, mut reader) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);

    if let Ok(snapshot) = orchestrator.snapshot_for(&code, &user).await {
        let _ = out_tx.send(snapshot).await;
    }

    let forward_handle = tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            if out_tx.send(envelope).await.is_err() {
                break;
            }
        }
    });

    let writer_handle = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if writer.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound envelope");
                }
            }
        }
    });

    while let Some(msg) = reader.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "websocket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                orchestrator.touch_activity(code.clone(), user.clone());
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) | Err(_) => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    forward_handle.abort();
    writer_handle.abort();
    tracing::info!(session = %code, user = %user.0, "topic subscription closed");
}
