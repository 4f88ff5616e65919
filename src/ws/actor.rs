//! Actor-per-connection WebSocket handling.
//!
//! Each authenticated socket gets one actor: a writer task that owns the
//! sink and drains an mpsc channel, and a reader loop that decodes client
//! events and dispatches them. Any part of the system can push frames to
//! the client by cloning the channel sender out of the room registry.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::presence;
use crate::error::ApiError;
use crate::groups::crud::group_rooms_of_user;
use crate::lock_db;
use crate::state::AppState;
use crate::ws::protocol::{self, ClientEvent, ServerEvent};
use crate::ws::{send_event, ConnectionSender};

/// Liveness probe cadence. A peer that misses a pong gets closed, so
/// abrupt disconnects cannot leak registry entries.
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one authenticated connection until the peer goes away.
///
/// On entry the connection is registered (which joins `user:<id>`), added to
/// the room of every group the user belongs to, and the user's ONLINE
/// transition is broadcast. The reverse happens on exit, with OFFLINE only
/// broadcast when this was the user's last live connection.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = state.rooms.register(&user_id, tx.clone());
    join_group_rooms(&state, &user_id, conn_id).await;

    if let Err(e) = presence::broadcast_presence(&state, &user_id, true).await {
        tracing::warn!(user_id = %user_id, error = %e, "Presence broadcast failed");
    }

    tracing::info!(user_id = %user_id, connection_id = conn_id, "WebSocket actor started");

    let writer = tokio::spawn(drain_outbound(sink, rx));
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let pinger = tokio::spawn(liveness_probe(tx.clone(), pong_rx));

    // Reader loop: everything inbound funnels through here
    while let Some(incoming) = stream.next().await {
        let msg = match incoming {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                handle_text_frame(&state, &user_id, &tx, &text).await;
            }
            Message::Pong(_) => {
                let _ = pong_tx.send(());
            }
            Message::Ping(payload) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Message::Binary(_) => {
                tracing::debug!(user_id = %user_id, "Ignoring binary frame (protocol is JSON text)");
            }
            Message::Close(frame) => {
                tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                break;
            }
        }
    }

    writer.abort();
    pinger.abort();

    // Drops the connection out of every room in one sweep
    state.rooms.unregister(conn_id);

    if state.rooms.user_connection_count(&user_id) == 0 {
        if let Err(e) = presence::broadcast_presence(&state, &user_id, false).await {
            tracing::warn!(user_id = %user_id, error = %e, "Presence broadcast failed");
        }
    }

    tracing::info!(user_id = %user_id, connection_id = conn_id, "WebSocket actor stopped");
}

/// Join the conversation room of every group this user belongs to, so group
/// fan-out starts flowing without any extra handshake.
async fn join_group_rooms(state: &AppState, user_id: &str, conn_id: crate::ws::ConnectionId) {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let rooms = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        group_rooms_of_user(&conn, &uid)
    })
    .await
    .unwrap_or_else(|e| Err(ApiError::Internal(e.to_string())));

    match rooms {
        Ok(rooms) => {
            for room in rooms {
                state.rooms.join(&room, conn_id);
            }
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to join group rooms");
        }
    }
}

/// Decode one JSON text frame and dispatch it.
async fn handle_text_frame(state: &AppState, user_id: &str, tx: &ConnectionSender, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => {
            protocol::handle_client_event(state, user_id, tx, event).await;
        }
        Err(e) => {
            tracing::debug!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client event: {}",
                text.chars().take(100).collect::<String>()
            );
            send_event(
                tx,
                &ServerEvent::Errors {
                    message: "Invalid event payload".to_string(),
                },
            );
        }
    }
}

/// Writer task: owns the sink; everything outbound goes through the channel.
async fn drain_outbound(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}

/// Periodic ping with a pong deadline; pushes a close frame when it lapses.
async fn liveness_probe(tx: ConnectionSender, mut pong_rx: mpsc::UnboundedReceiver<()>) {
    let mut ticker = interval(PING_INTERVAL);
    ticker.tick().await; // the first tick fires immediately

    loop {
        ticker.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            break; // writer gone, nothing left to probe
        }

        if !matches!(timeout(PONG_TIMEOUT, pong_rx.recv()).await, Ok(Some(()))) {
            tracing::warn!("Pong timeout, closing connection");
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: 1001,
                reason: "Pong timeout".into(),
            })));
            break;
        }
    }
}
