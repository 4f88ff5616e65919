//! In-memory presence tracking and typing indicators.
//!
//! Presence is process-scoped, rebuilt empty on start and lost on restart.
//! Reconnect races are last-writer-wins. A user's `online_visibility`
//! preference gates every transition: `none` suppresses tracking and
//! broadcast entirely, `friends` narrows the fan-out to accepted friends.

use chrono::Utc;

use crate::chat::conversations::resolve_private;
use crate::db::models::OnlineVisibility;
use crate::error::{ApiError, Result};
use crate::friends::gate;
use crate::lock_db;
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Best-effort view of whether a user is currently connected.
pub fn is_online(state: &AppState, user_id: &str) -> bool {
    state
        .presence
        .get(user_id)
        .map(|v| *v.value())
        .unwrap_or(false)
}

/// Record a presence transition and fan it out according to the user's
/// visibility preference. Called on connect and on last-connection close.
pub async fn broadcast_presence(state: &AppState, user_id: &str, online: bool) -> Result<()> {
    let db = state.db.clone();
    let uid = user_id.to_string();

    let (visibility, friends) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let visibility: String = conn
            .query_row(
                "SELECT online_visibility FROM users WHERE id = ?1",
                rusqlite::params![uid],
                |row| row.get(0),
            )
            .map_err(|_| ApiError::NotFound("No user with this id".to_string()))?;
        let visibility =
            OnlineVisibility::from_str(&visibility).unwrap_or(OnlineVisibility::Everyone);

        let friends = if visibility == OnlineVisibility::Friends {
            gate::accepted_friends(&conn, &uid)?
        } else {
            Vec::new()
        };
        Ok::<_, ApiError>((visibility, friends))
    })
    .await??;

    if visibility == OnlineVisibility::None {
        return Ok(());
    }

    state.presence.insert(user_id.to_string(), online);

    let event = ServerEvent::UserIsOnline {
        user_id: user_id.to_string(),
        is_online: online,
    };
    match visibility {
        OnlineVisibility::Everyone => state.rooms.emit_to_all(&event),
        OnlineVisibility::Friends => {
            let rooms: Vec<String> = friends
                .iter()
                .map(|f| crate::ws::user_room(f))
                .collect();
            state.rooms.emit_to_rooms(&rooms, &event);
        }
        OnlineVisibility::None => {}
    }

    Ok(())
}

/// Relay a typing indicator into the recipient's personal room.
/// Runs the relationship gate like every other private-path operation.
pub async fn send_typing(state: &AppState, from: &str, to: &str, is_typing: bool) -> Result<()> {
    let db = state.db.clone();
    let from_id = from.to_string();
    let to_id = to.to_string();
    let now = Utc::now().timestamp_millis();

    let conversation_id = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        crate::chat::view::user_summary(&conn, &to_id)?;
        gate::ensure_can_interact(&conn, &from_id, &to_id)?;
        let conv = resolve_private(&conn, &from_id, &to_id, now)?;
        Ok::<_, ApiError>(conv.id)
    })
    .await??;

    emit_typing(state, to, &conversation_id, is_typing);
    Ok(())
}

/// Low-level typing emit (also used to clear the indicator after a send).
pub fn emit_typing(state: &AppState, to: &str, conversation_id: &str, is_typing: bool) {
    state.rooms.send_to_user(
        to,
        &ServerEvent::Typing {
            conversation_id: conversation_id.to_string(),
            is_typing,
        },
    );
}
