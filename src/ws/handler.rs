//! WebSocket upgrade endpoint.
//!
//! Browsers cannot attach headers to an upgrade request, so the token rides
//! in a `?token=` query parameter. A bad token still completes the upgrade
//! and is then closed immediately with a close code the client can act on.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// GET /ws?token=JWT
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match jwt::validate_access_token(&state.jwt_secret, &query.token) {
        Ok(claims) => {
            tracing::info!(user_id = %claims.sub, "WebSocket authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub))
        }
        Err(err) => {
            let (code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code = %code, reason, "WebSocket auth rejected");
            ws.on_upgrade(move |socket| close_unauthenticated(socket, code, reason))
        }
    }
}

async fn close_unauthenticated(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
