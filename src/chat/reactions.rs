//! Message reactions: at most one per user per message.
//!
//! Repeating the identical reaction toggles it off; a different reaction
//! replaces the existing one in place. Each outcome is a single SQL
//! statement, so two users reacting concurrently cannot clobber each other.

use axum::{
    extract::{Path, State},
    Json,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::conversations::is_participant;
use crate::chat::messages::message_by_id;
use crate::chat::view::{self, MessageResponse};
use crate::db::models::{Message, ReactKind};
use crate::error::{ApiError, Result};
use crate::lock_db;
use crate::state::AppState;

/// Apply the toggle/replace rule for one user's reaction on a message.
/// Returns the message row (for fan-out targeting). Idempotent in the sense
/// that repeating an identical call always lands on the opposite state of a
/// clean toggle: react, un-react, react again.
pub fn toggle_reaction(
    conn: &Connection,
    message_id: &str,
    actor: &str,
    react: ReactKind,
) -> Result<Message> {
    let message = message_by_id(conn, message_id)?;
    if !is_participant(conn, &message.conversation_id, actor)? {
        return Err(ApiError::Permission(
            "You can only react to your messages".to_string(),
        ));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT react FROM message_reacts WHERE message_id = ?1 AND user_id = ?2",
            rusqlite::params![message.id, actor],
            |row| row.get(0),
        )
        .ok();

    match existing {
        Some(current) if current == react.as_str() => {
            // Same reaction again: toggle off
            conn.execute(
                "DELETE FROM message_reacts WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message.id, actor],
            )?;
        }
        Some(_) => {
            conn.execute(
                "UPDATE message_reacts SET react = ?3 WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message.id, actor, react.as_str()],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO message_reacts (message_id, user_id, react) VALUES (?1, ?2, ?3)",
                rusqlite::params![message.id, actor, react.as_str()],
            )?;
        }
    }

    Ok(message)
}

// --- REST handler ---

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub react: ReactKind,
}

#[derive(Debug, Serialize)]
pub struct ReactResponseBody {
    pub success: bool,
    pub message: MessageResponse,
}

/// POST /api/chat/message/{message_id}/react — Toggle/replace the caller's
/// reaction and broadcast the message's current reaction list.
pub async fn add_message_reaction(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ReactRequest>,
) -> Result<Json<ReactResponseBody>> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let mid = message_id.clone();

    let (message_row, message) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let row = toggle_reaction(&conn, &mid, &user_id, body.react)?;
        let projected = view::message_response(&conn, &row)?;
        Ok::<_, ApiError>((row, projected))
    })
    .await??;

    broadcast::reaction_changed(&state, &message_row, &claims.sub, &message.reacts);

    Ok(Json(ReactResponseBody {
        success: true,
        message,
    }))
}
