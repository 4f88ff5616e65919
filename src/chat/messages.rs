//! Message store: send, paginate, mark seen, delete, forward.
//!
//! Mutations are single SQL statements under the connection mutex, so
//! concurrent operations on one conversation cannot corrupt the last-message
//! pointer or the reaction list. Media is uploaded before anything is
//! persisted: an upload failure leaves no message row behind.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::conversations::{
    conversation_by_id, is_participant, other_participant, resolve_group, resolve_private,
    touch_last_message, watermark,
};
use crate::chat::view::{self, ConversationResponse, MessageResponse};
use crate::db::models::{Conversation, Message, ReadReceipts};
use crate::error::{ApiError, Result};
use crate::friends::gate;
use crate::groups::permissions;
use crate::lock_db;
use crate::media::{self, MediaPayload, UploadedMedia, ValidatedMedia};
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 20;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 50;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, from_user, to_user, body, media_url, media_type, reply_to_id, seen, \
     created_at, updated_at";

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        from_user: row.get(2)?,
        to_user: row.get(3)?,
        body: row.get(4)?,
        media_url: row.get(5)?,
        media_type: row.get(6)?,
        reply_to_id: row.get(7)?,
        seen: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn message_by_id(conn: &Connection, id: &str) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
        rusqlite::params![id],
        message_from_row,
    )
    .map_err(|_| ApiError::NotFound("No message with this id".to_string()))
}

/// A message must carry exactly one of text / media.
/// Returns the trimmed text (whitespace-only counts as absent).
fn validate_content(
    text: Option<String>,
    media: &Option<MediaPayload>,
) -> Result<Option<String>> {
    let text = text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    match (&text, media) {
        (None, None) => Err(ApiError::Validation(
            "Message text or media is required".to_string(),
        )),
        (Some(_), Some(_)) => Err(ApiError::Validation(
            "Message takes either text or media, not both".to_string(),
        )),
        _ => Ok(text),
    }
}

/// Insert a message row and point the conversation at it.
pub fn insert_message(
    conn: &Connection,
    message_id: &str,
    conversation_id: &str,
    from: &str,
    to: Option<&str>,
    text: Option<&str>,
    media: Option<&UploadedMedia>,
    reply_to: Option<&str>,
    now: i64,
) -> Result<Message> {
    let (media_url, media_type) = match media {
        Some(m) => (m.url.as_str(), m.kind.as_str()),
        None => ("", ""),
    };

    conn.execute(
        "INSERT INTO messages (id, conversation_id, from_user, to_user, body, media_url, \
         media_type, reply_to_id, seen, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
        rusqlite::params![
            message_id,
            conversation_id,
            from,
            to,
            text,
            media_url,
            media_type,
            reply_to,
            now
        ],
    )?;

    touch_last_message(conn, conversation_id, message_id, now)?;

    message_by_id(conn, message_id)
}

async fn upload_media(
    state: &AppState,
    media: Option<ValidatedMedia>,
    owner_id: &str,
    message_id: &str,
) -> Result<Option<UploadedMedia>> {
    let Some(media) = media else { return Ok(None) };
    let store = state.media.clone();
    let owner = owner_id.to_string();
    let entity = message_id.to_string();
    let uploaded = tokio::task::spawn_blocking(move || {
        store.upload(&media, "message", &owner, &entity)
    })
    .await??;
    Ok(Some(uploaded))
}

/// Send a private message. The relationship gate runs before the conversation
/// is resolved; the media upload runs before the message row is written.
pub async fn send_private(
    state: &AppState,
    from: &str,
    to: &str,
    text: Option<String>,
    media: Option<MediaPayload>,
) -> Result<(MessageResponse, ConversationResponse)> {
    let text = validate_content(text, &media)?;
    let validated = media
        .as_ref()
        .map(|m| media::validate_media(m, state.max_upload_size_mb))
        .transpose()?;

    let now = Utc::now().timestamp_millis();
    let message_id = uuid::Uuid::now_v7().to_string();

    // Gate + resolve before any side effect
    let conversation: Conversation = {
        let db = state.db.clone();
        let from = from.to_string();
        let to = to.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = lock_db!(db);
            view::user_summary(&conn, &to)?;
            gate::ensure_can_interact(&conn, &from, &to)?;
            resolve_private(&conn, &from, &to, now)
        })
        .await??
    };

    let uploaded = upload_media(state, validated, from, &message_id).await?;

    let db = state.db.clone();
    let from = from.to_string();
    let to = to.to_string();
    let conv_id = conversation.id.clone();
    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let message = insert_message(
            &conn,
            &message_id,
            &conv_id,
            &from,
            Some(&to),
            text.as_deref(),
            uploaded.as_ref(),
            None,
            now,
        )?;
        let conv = conversation_by_id(&conn, &conv_id)?;
        Ok::<_, ApiError>((
            view::message_response(&conn, &message)?,
            view::conversation_response(&conn, &conv)?,
        ))
    })
    .await?
}

/// Send a message into a group. Pairwise blocks are not consulted — only
/// membership and the group's send permission.
pub async fn send_group(
    state: &AppState,
    from: &str,
    conversation_id: &str,
    text: Option<String>,
    media: Option<MediaPayload>,
    reply_message: Option<String>,
) -> Result<(MessageResponse, ConversationResponse)> {
    let text = validate_content(text, &media)?;
    let validated = media
        .as_ref()
        .map(|m| media::validate_media(m, state.max_upload_size_mb))
        .transpose()?;

    let now = Utc::now().timestamp_millis();
    let message_id = uuid::Uuid::now_v7().to_string();

    {
        let db = state.db.clone();
        let from = from.to_string();
        let conv_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = lock_db!(db);
            let group = resolve_group(&conn, &conv_id)?;
            if !is_participant(&conn, &group.id, &from)? {
                return Err(ApiError::Permission(
                    "Can't send message to this group".to_string(),
                ));
            }
            let info = group.group.as_ref().expect("group conversation has group info");
            if !permissions::can_send_message(info, &from) {
                return Err(ApiError::Permission(
                    "Sending messages is restricted in this group".to_string(),
                ));
            }
            Ok(())
        })
        .await??;
    }

    let uploaded = upload_media(state, validated, from, &message_id).await?;

    let db = state.db.clone();
    let from = from.to_string();
    let conv_id = conversation_id.to_string();
    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let message = insert_message(
            &conn,
            &message_id,
            &conv_id,
            &from,
            None,
            text.as_deref(),
            uploaded.as_ref(),
            reply_message.as_deref(),
            now,
        )?;
        let conv = conversation_by_id(&conn, &conv_id)?;
        Ok::<_, ApiError>((
            view::message_response(&conn, &message)?,
            view::conversation_response(&conn, &conv)?,
        ))
    })
    .await?
}

/// Bulk-mark every unseen message addressed to `reader` in the private
/// conversation with `other` as seen. One UPDATE, atomic per conversation.
/// Returns None (and does nothing) when the reader disabled read receipts.
pub async fn see_all_messages(
    state: &AppState,
    reader: &str,
    other: &str,
) -> Result<Option<String>> {
    let db = state.db.clone();
    let reader = reader.to_string();
    let other = other.to_string();
    let now = Utc::now().timestamp_millis();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);

        let receipts: String = conn
            .query_row(
                "SELECT read_receipts FROM users WHERE id = ?1",
                rusqlite::params![reader],
                |row| row.get(0),
            )
            .map_err(|_| ApiError::NotFound("No user with this id".to_string()))?;
        if ReadReceipts::from_str(&receipts) == Some(ReadReceipts::Disable) {
            return Ok(None);
        }

        view::user_summary(&conn, &other)?;
        gate::ensure_can_interact(&conn, &reader, &other)?;
        let conv = resolve_private(&conn, &reader, &other, now)?;

        conn.execute(
            "UPDATE messages SET seen = 1, updated_at = ?3
             WHERE conversation_id = ?1 AND to_user = ?2 AND seen = 0",
            rusqlite::params![conv.id, reader, now],
        )?;

        Ok(Some(conv.id))
    })
    .await?
}

/// One page of history, newest first, bounded below by the reader's watermark
/// and above by the optional `before` cursor.
pub fn list_page(
    conn: &Connection,
    conversation: &Conversation,
    reader: &str,
    before: Option<i64>,
    limit: u32,
) -> Result<(Vec<MessageResponse>, bool)> {
    let limit = limit.clamp(1, MAX_LIMIT);
    let cutoff = watermark(conn, &conversation.id, reader)?;
    let before = before.unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages
         WHERE conversation_id = ?1 AND created_at > ?2 AND created_at < ?3
         ORDER BY created_at DESC
         LIMIT ?4",
        MESSAGE_COLUMNS
    ))?;

    let rows: Vec<Message> = stmt
        .query_map(
            rusqlite::params![conversation.id, cutoff, before, limit],
            message_from_row,
        )?
        .filter_map(|r| r.ok())
        .collect();

    let has_more = rows.len() as u32 == limit;
    let mut messages = Vec::with_capacity(rows.len());
    for row in &rows {
        messages.push(view::message_response(conn, row)?);
    }

    Ok((messages, has_more))
}

/// Hard-delete a message (sender only). When the deleted message was the
/// conversation's last, the pointer moves to the newest survivor or NULL.
pub fn delete_message_row(conn: &Connection, message_id: &str, actor: &str, now: i64) -> Result<Message> {
    let message = message_by_id(conn, message_id)?;
    if message.from_user != actor {
        return Err(ApiError::Permission(
            "You can only delete your messages".to_string(),
        ));
    }

    let conv = conversation_by_id(conn, &message.conversation_id)?;
    conn.execute(
        "DELETE FROM messages WHERE id = ?1",
        rusqlite::params![message.id],
    )?;

    if conv.last_message_id.as_deref() == Some(message.id.as_str()) {
        let newest: Option<String> = conn
            .query_row(
                "SELECT id FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                rusqlite::params![conv.id],
                |row| row.get(0),
            )
            .ok();
        conn.execute(
            "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![conv.id, newest, now],
        )?;
    }

    Ok(message)
}

/// Copy a message's content into another conversation the actor belongs to.
/// Reply pointers and reactions do not travel; the copy starts unseen.
pub fn forward_message_row(
    conn: &Connection,
    message_id: &str,
    actor: &str,
    target: &Conversation,
    now: i64,
) -> Result<Message> {
    if !is_participant(conn, &target.id, actor)? {
        return Err(ApiError::Permission(
            "You can't forward this message".to_string(),
        ));
    }
    let source = message_by_id(conn, message_id)?;

    let to_user = if target.is_group() {
        None
    } else {
        other_participant(conn, &target.id, actor)?
    };

    let new_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, from_user, to_user, body, media_url, \
         media_type, reply_to_id, seen, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 0, ?8, ?8)",
        rusqlite::params![
            new_id,
            target.id,
            actor,
            to_user,
            source.body,
            source.media_url,
            source.media_type,
            now
        ],
    )?;
    touch_last_message(conn, &target.id, &new_id, now)?;

    message_by_id(conn, &new_id)
}

// --- REST handlers ---

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub success: bool,
    pub messages: Vec<MessageResponse>,
    pub has_more: bool,
}

/// GET /api/chat/conversations/messages/{user_id}?before={millis}&limit={n}
/// Page through the private conversation with another user. As a side
/// effect, an unseen inbound last message is marked seen.
pub async fn conversation_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let before = query.before;
    let now = Utc::now().timestamp_millis();

    let (messages, has_more) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        view::user_summary(&conn, &other_user_id)?;
        let conv = resolve_private(&conn, &user_id, &other_user_id, now)?;

        // Opening the conversation counts as seeing its newest inbound message
        if let Some(last_id) = &conv.last_message_id {
            if let Ok(last) = message_by_id(&conn, last_id) {
                if !last.seen && last.from_user != user_id {
                    conn.execute(
                        "UPDATE messages SET seen = 1, updated_at = ?2 WHERE id = ?1",
                        rusqlite::params![last.id, now],
                    )?;
                }
            }
        }

        list_page(&conn, &conv, &user_id, before, limit)
    })
    .await??;

    Ok(Json(HistoryResponse {
        success: true,
        messages,
        has_more,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub success: bool,
    pub message: String,
}

/// DELETE /api/chat/message/{message_id} — Sender-only hard delete.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<Json<DeleteMessageResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let now = Utc::now().timestamp_millis();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        delete_message_row(&conn, &message_id, &user_id, now)
    })
    .await??;

    Ok(Json(DeleteMessageResponse {
        success: true,
        message: "Message deleted successfully".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardMessageRequest {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ForwardMessageResponse {
    pub success: bool,
    pub message: MessageResponse,
    pub conversation: ConversationResponse,
}

/// POST /api/chat/message/forward/{message_id} — Forward a message into
/// another conversation the caller participates in.
pub async fn forward_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ForwardMessageRequest>,
) -> Result<Json<ForwardMessageResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let target_id = body.conversation_id;
    let now = Utc::now().timestamp_millis();

    let (message, conversation) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let target = conversation_by_id(&conn, &target_id)?;
        let forwarded = forward_message_row(&conn, &message_id, &user_id, &target, now)?;
        let target = conversation_by_id(&conn, &target.id)?;
        Ok::<_, ApiError>((
            view::message_response(&conn, &forwarded)?,
            view::conversation_response(&conn, &target)?,
        ))
    })
    .await??;

    // Forwarded messages fan out like freshly sent ones
    if conversation.kind == crate::db::models::ConversationKind::Group {
        broadcast::group_message_sent(&state, &message, &conversation);
    } else {
        broadcast::private_message_sent(&state, &message, &conversation);
    }

    Ok(Json(ForwardMessageResponse {
        success: true,
        message,
        conversation,
    }))
}
