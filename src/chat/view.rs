//! Wire projections of chat entities.
//!
//! Every payload that leaves the server — REST bodies, socket acks and room
//! broadcasts — is built from these types, and always from the value a
//! mutation just returned, never from a fresh re-query.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::models::{Conversation, ConversationKind, Message, ReactKind};
use crate::error::{ApiError, Result};

/// Minimal user card embedded in conversation/message payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub profile_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactResponse {
    pub user: UserSummary,
    pub react: ReactKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub media_url: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_message: Option<String>,
    pub seen: bool,
    pub reacts: Vec<ReactResponse>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: String,
    pub kind: ConversationKind,
    /// Insertion order for groups; canonical sorted order for private.
    pub participants: Vec<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Box<MessageResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_image: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Look up the user card for an id.
pub fn user_summary(conn: &Connection, user_id: &str) -> Result<UserSummary> {
    conn.query_row(
        "SELECT id, name, profile_image FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                profile_image: row.get(2)?,
            })
        },
    )
    .map_err(|_| ApiError::NotFound("No user with this id".to_string()))
}

/// Load the current reaction list for a message, joined with user cards.
pub fn load_reacts(conn: &Connection, message_id: &str) -> Result<Vec<ReactResponse>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.profile_image, r.react
         FROM message_reacts r
         JOIN users u ON u.id = r.user_id
         WHERE r.message_id = ?1
         ORDER BY r.created_at",
    )?;

    let reacts = stmt
        .query_map(rusqlite::params![message_id], |row| {
            let react_str: String = row.get(3)?;
            Ok((
                UserSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    profile_image: row.get(2)?,
                },
                react_str,
            ))
        })?
        .filter_map(|r| r.ok())
        .filter_map(|(user, react_str)| {
            ReactKind::from_str(&react_str).map(|react| ReactResponse { user, react })
        })
        .collect();

    Ok(reacts)
}

/// Project a message row, loading its reaction list.
pub fn message_response(conn: &Connection, message: &Message) -> Result<MessageResponse> {
    Ok(MessageResponse {
        id: message.id.clone(),
        conversation_id: message.conversation_id.clone(),
        from: message.from_user.clone(),
        to: message.to_user.clone(),
        text: message.body.clone(),
        media_url: message.media_url.clone(),
        media_type: message.media_type.clone(),
        reply_message: message.reply_to_id.clone(),
        seen: message.seen,
        reacts: load_reacts(conn, &message.id)?,
        created_at: message.created_at,
        updated_at: message.updated_at,
    })
}

/// Project a conversation row, loading participants and the last message.
pub fn conversation_response(conn: &Connection, conv: &Conversation) -> Result<ConversationResponse> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.profile_image
         FROM conversation_participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.conversation_id = ?1
         ORDER BY p.position",
    )?;
    let participants: Vec<UserSummary> = stmt
        .query_map(rusqlite::params![conv.id], |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                profile_image: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let last_message = match &conv.last_message_id {
        Some(id) => match crate::chat::messages::message_by_id(conn, id) {
            Ok(m) => Some(Box::new(message_response(conn, &m)?)),
            Err(ApiError::NotFound(_)) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };

    let group = conv.group.as_ref();

    Ok(ConversationResponse {
        id: conv.id.clone(),
        kind: conv.kind,
        participants,
        last_message,
        admin: group.map(|g| g.admin_id.clone()),
        group_name: group.map(|g| g.group_name.clone()),
        group_desc: group.map(|g| g.group_desc.clone()),
        group_image: group.map(|g| g.group_image.clone()),
        created_at: conv.created_at,
        updated_at: conv.updated_at,
    })
}
