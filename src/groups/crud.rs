//! Group lifecycle: create, delete, membership changes, link joins.
//!
//! Room membership is changed in the same code path as the participant row,
//! so fan-out targets never drift from stored membership.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::conversations::{
    conversation_by_id, is_participant, participants, resolve_group,
};
use crate::chat::view::{self, ConversationResponse, UserSummary};
use crate::db::models::Conversation;
use crate::error::{ApiError, Result};
use crate::groups::permissions;
use crate::lock_db;
use crate::state::AppState;
use crate::ws::conversation_room;

/// Create a group owned by `admin`. The admin is the first participant and
/// settings start from the defaults; the link token is generated lazily on
/// first request.
pub fn create_group_row(
    conn: &Connection,
    admin: &str,
    name: &str,
    desc: &str,
    now: i64,
) -> Result<Conversation> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".to_string()));
    }

    let group_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO conversations (id, kind, admin_id, group_name, group_desc, group_image, \
         created_at, updated_at)
         VALUES (?1, 'group', ?2, ?3, ?4, '', ?5, ?5)",
        rusqlite::params![group_id, admin, name, desc, now],
    )?;
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, user_id, position)
         VALUES (?1, ?2, 0)",
        rusqlite::params![group_id, admin],
    )?;

    conversation_by_id(conn, &group_id)
}

fn next_position(conn: &Connection, conversation_id: &str) -> Result<i64> {
    let pos: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM conversation_participants
         WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(pos)
}

/// Add `target` on behalf of `actor`, enforcing the permission engine.
pub fn add_member_row(
    conn: &Connection,
    group: &Conversation,
    actor: &str,
    target: &str,
) -> Result<()> {
    let info = group.group.as_ref().expect("group conversation has group info");
    let members = participants(conn, &group.id)?;
    if !permissions::can_add_member(info, &members, actor, target) {
        return Err(ApiError::Permission(
            "You can't add members to this group".to_string(),
        ));
    }
    let position = next_position(conn, &group.id)?;
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, user_id, position)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![group.id, target, position],
    )?;
    Ok(())
}

/// Remove `target` (admin only).
pub fn remove_member_row(
    conn: &Connection,
    group: &Conversation,
    actor: &str,
    target: &str,
) -> Result<()> {
    let info = group.group.as_ref().expect("group conversation has group info");
    if !permissions::can_remove_member(info, actor) {
        return Err(ApiError::Permission(
            "only admin can remove users".to_string(),
        ));
    }
    let removed = conn.execute(
        "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![group.id, target],
    )?;
    if removed == 0 {
        return Err(ApiError::NotFound(
            "User is not a member of this group".to_string(),
        ));
    }
    Ok(())
}

/// Join through an invite link token.
pub fn join_via_link_row(
    conn: &Connection,
    group: &Conversation,
    actor: &str,
    token: &str,
) -> Result<()> {
    let info = group.group.as_ref().expect("group conversation has group info");
    let members = participants(conn, &group.id)?;
    if !permissions::can_join(info, &members, actor, token) {
        return Err(ApiError::Permission(
            "Invalid invite link for this group".to_string(),
        ));
    }
    let position = next_position(conn, &group.id)?;
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, user_id, position)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![group.id, actor, position],
    )?;
    Ok(())
}

/// Hard-delete a group and everything hanging off it (admin only).
/// Private conversations are never deletable; callers go through
/// `resolve_group` first.
pub fn delete_group_row(conn: &Connection, group: &Conversation, actor: &str) -> Result<()> {
    if group.admin_id() != Some(actor) {
        return Err(ApiError::Permission("Can't delete this group".to_string()));
    }
    conn.execute(
        "DELETE FROM conversations WHERE id = ?1",
        rusqlite::params![group.id],
    )?;
    Ok(())
}

fn user_by_id_or_email(conn: &Connection, needle: &str) -> Result<UserSummary> {
    conn.query_row(
        "SELECT id, name, profile_image FROM users WHERE id = ?1 OR email = ?1",
        rusqlite::params![needle],
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

// --- REST handlers ---

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub success: bool,
    pub group: ConversationResponse,
}

/// POST /api/groups — Create a group; the caller becomes its admin.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<Json<GroupResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let now = Utc::now().timestamp_millis();

    let group = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let conv = create_group_row(&conn, &user_id, &body.name, &body.desc, now)?;
        view::conversation_response(&conn, &conv)
    })
    .await??;

    // The admin's live connections start receiving group traffic immediately
    state
        .rooms
        .join_user(&conversation_room(&group.id), &claims.sub);

    Ok(Json(GroupResponse {
        success: true,
        group,
    }))
}

#[derive(Debug, Serialize)]
pub struct MsgResponse {
    pub success: bool,
    pub msg: String,
}

/// DELETE /api/groups/{group_id} — Admin-only hard delete.
pub async fn delete_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<MsgResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let gid = group_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        delete_group_row(&conn, &group, &user_id)
    })
    .await??;

    state.rooms.remove_room(&conversation_room(&group_id));

    Ok(Json(MsgResponse {
        success: true,
        msg: "Group deleted successfully".to_string(),
    }))
}

/// POST /api/groups/{group_id}/leave
pub async fn leave_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<MsgResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let gid = group_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        conn.execute(
            "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            rusqlite::params![group.id, user_id],
        )?;
        Ok::<_, ApiError>(())
    })
    .await??;

    state
        .rooms
        .leave_user(&conversation_room(&group_id), &claims.sub);

    Ok(Json(MsgResponse {
        success: true,
        msg: "You are no longer a member".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub user_id_or_email: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

/// POST /api/groups/{group_id}/members — Add a member (admin, or any
/// participant when the group's settings allow it).
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<MemberRequest>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let gid = group_id.clone();

    let (invited, group) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        let invited = user_by_id_or_email(&conn, &body.user_id_or_email)?;
        add_member_row(&conn, &group, &actor, &invited.id)?;
        let group = conversation_by_id(&conn, &group.id)?;
        Ok::<_, ApiError>((invited, view::conversation_response(&conn, &group)?))
    })
    .await??;

    // Join the new member's connections before announcing, so their own
    // devices get the announcement too
    state
        .rooms
        .join_user(&conversation_room(&group_id), &invited.id);
    broadcast::added_to_group(&state, &invited, &group);

    Ok(Json(OkResponse { success: true }))
}

/// DELETE /api/groups/{group_id}/members — Remove a member (admin only).
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<MemberRequest>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let gid = group_id.clone();

    let removed = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        let removed = user_by_id_or_email(&conn, &body.user_id_or_email)?;
        remove_member_row(&conn, &group, &actor, &removed.id)?;
        Ok::<_, ApiError>(removed)
    })
    .await??;

    state
        .rooms
        .leave_user(&conversation_room(&group_id), &removed.id);
    broadcast::removed_from_group(&state, &removed, &group_id);

    Ok(Json(OkResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest {
    pub token: String,
}

/// POST /api/groups/{group_id}/join — Join through an invite link token.
pub async fn join_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<JoinGroupRequest>,
) -> Result<Json<GroupResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let gid = group_id.clone();

    let (joined, group) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        join_via_link_row(&conn, &group, &actor, &body.token)?;
        let joined = view::user_summary(&conn, &actor)?;
        let group = conversation_by_id(&conn, &group.id)?;
        Ok::<_, ApiError>((joined, view::conversation_response(&conn, &group)?))
    })
    .await??;

    state
        .rooms
        .join_user(&conversation_room(&group_id), &claims.sub);
    broadcast::added_to_group(&state, &joined, &group);

    Ok(Json(GroupResponse {
        success: true,
        group,
    }))
}

/// Conversation rooms a user should sit in: one per group they belong to.
/// Used when a connection comes up.
pub fn group_rooms_of_user(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM conversations c
         JOIN conversation_participants p ON p.conversation_id = c.id
         WHERE p.user_id = ?1 AND c.kind = 'group'",
    )?;
    let rooms = stmt
        .query_map(rusqlite::params![user_id], |row| {
            row.get::<_, String>(0)
        })?
        .filter_map(|r| r.ok())
        .map(|id| conversation_room(&id))
        .collect();
    Ok(rooms)
}

/// Membership check shared with the settings handlers.
pub fn ensure_participant(conn: &Connection, group: &Conversation, user_id: &str) -> Result<()> {
    if !is_participant(conn, &group.id, user_id)? {
        return Err(ApiError::Permission(
            "You are not a member of this group".to_string(),
        ));
    }
    Ok(())
}
