//! Conversation resolution and per-user conversation state.
//!
//! Private conversations are keyed by the sorted pair of participant ids.
//! The UNIQUE constraint on that key is the serialization point for
//! concurrent first contact: whichever insert loses the race falls back to
//! one retried lookup, invisibly to the caller.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::chat::view::{self, ConversationResponse};
use crate::db::models::{Conversation, ConversationKind, GroupInfo, GroupSettings};
use crate::error::{ApiError, Result};
use crate::lock_db;
use crate::state::AppState;

/// Column list matching `conversation_from_row`.
pub const CONVERSATION_COLUMNS: &str = "id, kind, participant_key, last_message_id, admin_id, \
     group_name, group_desc, group_image, link_token, members_edit_group_data, \
     members_send_messages, members_add_members, members_invite_via_link, \
     admin_approve_new_members, created_at, updated_at";

pub fn conversation_from_row(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let kind: String = row.get(1)?;
    let admin_id: Option<String> = row.get(4)?;

    let (kind, group) = if kind == "group" {
        let group = admin_id
            .map(|admin_id| -> rusqlite::Result<GroupInfo> {
                Ok(GroupInfo {
                    admin_id,
                    group_name: row
                        .get::<_, Option<String>>(5)?
                        .unwrap_or_default(),
                    group_desc: row
                        .get::<_, Option<String>>(6)?
                        .unwrap_or_default(),
                    group_image: row
                        .get::<_, Option<String>>(7)?
                        .unwrap_or_default(),
                    settings: GroupSettings {
                        link_token: row.get(8)?,
                        members_edit_group_data: row.get::<_, i64>(9)? != 0,
                        members_send_messages: row.get::<_, i64>(10)? != 0,
                        members_add_members: row.get::<_, i64>(11)? != 0,
                        members_invite_via_link: row.get::<_, i64>(12)? != 0,
                        admin_approve_new_members: row.get::<_, i64>(13)? != 0,
                    },
                })
            })
            .transpose()?;
        (ConversationKind::Group, group)
    } else {
        (ConversationKind::Private, None)
    };

    Ok(Conversation {
        id: row.get(0)?,
        kind,
        participant_key: row.get(2)?,
        last_message_id: row.get(3)?,
        group,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Canonical key for a private conversation: the sorted id pair.
pub fn participant_key(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{}:{}", user_a, user_b)
    } else {
        format!("{}:{}", user_b, user_a)
    }
}

pub fn conversation_by_id(conn: &Connection, id: &str) -> Result<Conversation> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
        rusqlite::params![id],
        conversation_from_row,
    )
    .map_err(|_| ApiError::NotFound("No conversation with this id".to_string()))
}

fn private_by_key(conn: &Connection, key: &str) -> Result<Option<Conversation>> {
    match conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE participant_key = ?1",
            CONVERSATION_COLUMNS
        ),
        rusqlite::params![key],
        conversation_from_row,
    ) {
        Ok(conv) => Ok(Some(conv)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Get or lazily create the private conversation for an unordered user pair.
/// Symmetric in its arguments; never creates a duplicate for the same pair.
pub fn resolve_private(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
    now: i64,
) -> Result<Conversation> {
    if user_a == user_b {
        return Err(ApiError::Validation(
            "Can't open a conversation with yourself".to_string(),
        ));
    }

    let key = participant_key(user_a, user_b);
    if let Some(conv) = private_by_key(conn, &key)? {
        return Ok(conv);
    }

    let conv_id = uuid::Uuid::now_v7().to_string();
    let insert = conn.execute(
        "INSERT INTO conversations (id, kind, participant_key, created_at, updated_at)
         VALUES (?1, 'private', ?2, ?3, ?3)",
        rusqlite::params![conv_id, key, now],
    );

    match insert {
        Ok(_) => {
            let (first, second) = if user_a <= user_b {
                (user_a, user_b)
            } else {
                (user_b, user_a)
            };
            conn.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position)
                 VALUES (?1, ?2, 0), (?1, ?3, 1)",
                rusqlite::params![conv_id, first, second],
            )?;
            conversation_by_id(conn, &conv_id)
        }
        // Lost the creation race: another handler inserted the same key.
        Err(e) if is_unique_violation(&e) => private_by_key(conn, &key)?.ok_or_else(|| {
            ApiError::Internal("conversation vanished after unique-key conflict".to_string())
        }),
        Err(e) => Err(e.into()),
    }
}

/// Look up a group conversation; a private id here is a not-found error.
pub fn resolve_group(conn: &Connection, conversation_id: &str) -> Result<Conversation> {
    let conv = conversation_by_id(conn, conversation_id)?;
    if !conv.is_group() {
        return Err(ApiError::NotFound("No group with this id".to_string()));
    }
    Ok(conv)
}

/// Participant ids in display order (insertion order for groups).
pub fn participants(conn: &Connection, conversation_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 ORDER BY position",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![conversation_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

pub fn is_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conversation_participants
         WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// The other side of a private conversation.
pub fn other_participant(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<Option<String>> {
    let ids = participants(conn, conversation_id)?;
    Ok(ids.into_iter().find(|id| id != user_id))
}

/// Per-user history watermark in unix millis; epoch when never cleared.
pub fn watermark(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<i64> {
    let value: i64 = conn
        .query_row(
            "SELECT messages_cleared_at FROM conversation_user_settings
             WHERE conversation_id = ?1 AND user_id = ?2",
            rusqlite::params![conversation_id, user_id],
            |row| row.get(0),
        )
        .unwrap_or(0);
    Ok(value)
}

/// Move the caller's watermark to `now`. Message rows are untouched and the
/// other participants' views are unaffected.
pub fn set_watermark(conn: &Connection, conversation_id: &str, user_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_user_settings (conversation_id, user_id, messages_cleared_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(conversation_id, user_id) DO UPDATE SET messages_cleared_at = ?3",
        rusqlite::params![conversation_id, user_id, now],
    )?;
    Ok(())
}

/// Point the conversation at its newest message and touch updated_at.
pub fn touch_last_message(
    conn: &Connection,
    conversation_id: &str,
    message_id: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![conversation_id, message_id, now],
    )?;
    Ok(())
}

// --- REST handlers ---

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub success: bool,
    pub conversations: Vec<ConversationResponse>,
}

/// GET /api/chat/conversations — All of the caller's conversations, most
/// recently active first. Conversations whose last message predates the
/// caller's watermark are hidden (their data stays put).
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ConversationListResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let conversations = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations c
             WHERE EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = c.id AND p.user_id = ?1)
             ORDER BY c.updated_at DESC",
            CONVERSATION_COLUMNS
        ))?;
        let convs: Vec<Conversation> = stmt
            .query_map(rusqlite::params![user_id], conversation_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        let mut out = Vec::with_capacity(convs.len());
        for conv in convs {
            let cutoff = watermark(&conn, &conv.id, &user_id)?;
            let visible = match &conv.last_message_id {
                Some(id) => match crate::chat::messages::message_by_id(&conn, id) {
                    Ok(m) => m.created_at > cutoff,
                    Err(_) => false,
                },
                // A group with no traffic yet still shows up for its members.
                None => conv.is_group(),
            };
            if visible {
                out.push(view::conversation_response(&conn, &conv)?);
            }
        }
        Ok::<_, ApiError>(out)
    })
    .await??;

    Ok(Json(ConversationListResponse {
        success: true,
        conversations,
    }))
}

#[derive(Debug, Serialize)]
pub struct SingleConversationResponse {
    pub success: bool,
    pub conversation: ConversationResponse,
}

/// GET /api/chat/conversations/user/{user_id} — Get (or lazily create) the
/// caller's private conversation with another user.
pub async fn get_user_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_user_id): Path<String>,
) -> Result<Json<SingleConversationResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let now = Utc::now().timestamp_millis();

    let conversation = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        // 404 before creating anything when the peer doesn't exist
        view::user_summary(&conn, &other_user_id)?;
        let conv = resolve_private(&conn, &user_id, &other_user_id, now)?;
        view::conversation_response(&conn, &conv)
    })
    .await??;

    Ok(Json(SingleConversationResponse {
        success: true,
        conversation,
    }))
}

#[derive(Debug, Serialize)]
pub struct ClearConversationResponse {
    pub success: bool,
    pub msg: String,
}

/// DELETE /api/chat/conversations/{conversation_id} — "Delete" a conversation
/// for the caller only: moves their watermark to now. Not retroactive for
/// messages sent afterwards, invisible to the other participants.
pub async fn delete_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<ClearConversationResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let now = Utc::now().timestamp_millis();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let conv = conversation_by_id(&conn, &conversation_id)?;
        if !is_participant(&conn, &conv.id, &user_id)? {
            return Err(ApiError::Permission(
                "You can only delete your conversations".to_string(),
            ));
        }
        set_watermark(&conn, &conv.id, &user_id, now)
    })
    .await??;

    Ok(Json(ClearConversationResponse {
        success: true,
        msg: "Conversation deleted successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_key_is_symmetric() {
        assert_eq!(participant_key("alice", "bob"), participant_key("bob", "alice"));
        assert_eq!(participant_key("alice", "bob"), "alice:bob");
    }
}
