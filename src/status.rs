//! Ephemeral 24-hour statuses.
//!
//! A status is soft-deleted and never purged; "active" means unexpired and
//! not deleted, and every read path applies that filter. Creation and
//! deletion fan out to accepted friends' personal rooms.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::view::UserSummary;
use crate::db::models::Status;
use crate::error::{ApiError, Result};
use crate::friends::gate;
use crate::lock_db;
use crate::media::{self, MediaPayload};
use crate::state::AppState;

/// Statuses expire 24 hours after creation.
const STATUS_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

const STATUS_COLUMNS: &str =
    "id, user_id, content, media_url, media_type, expires_at, is_deleted, created_at, updated_at";

fn status_from_row(row: &rusqlite::Row) -> rusqlite::Result<Status> {
    Ok(Status {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        media_url: row.get(3)?,
        media_type: row.get(4)?,
        expires_at: row.get(5)?,
        is_deleted: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub media_url: String,
    pub media_type: String,
    pub expires_at: i64,
    pub created_at: i64,
    /// Owner view only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<Vec<UserSummary>>,
    /// Friend view only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_seen: Option<bool>,
}

fn status_response(status: &Status) -> StatusResponse {
    StatusResponse {
        id: status.id.clone(),
        user_id: status.user_id.clone(),
        content: status.content.clone(),
        media_url: status.media_url.clone(),
        media_type: status.media_type.clone(),
        expires_at: status.expires_at,
        created_at: status.created_at,
        viewers: None,
        is_seen: None,
    }
}

fn load_viewers(conn: &Connection, status_id: &str) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.profile_image
         FROM status_viewers v JOIN users u ON u.id = v.user_id
         WHERE v.status_id = ?1 ORDER BY v.viewed_at",
    )?;
    let viewers = stmt
        .query_map(rusqlite::params![status_id], |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                profile_image: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(viewers)
}

pub fn status_by_id(conn: &Connection, id: &str) -> Result<Status> {
    conn.query_row(
        &format!("SELECT {} FROM statuses WHERE id = ?1", STATUS_COLUMNS),
        rusqlite::params![id],
        status_from_row,
    )
    .map_err(|_| ApiError::NotFound("Status not found".to_string()))
}

/// Insert a status expiring 24h from `now`.
pub fn insert_status(
    conn: &Connection,
    status_id: &str,
    user_id: &str,
    content: Option<&str>,
    media_url: &str,
    media_type: &str,
    now: i64,
) -> Result<Status> {
    conn.execute(
        "INSERT INTO statuses (id, user_id, content, media_url, media_type, expires_at, \
         is_deleted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
        rusqlite::params![
            status_id,
            user_id,
            content,
            media_url,
            media_type,
            now + STATUS_TTL_MILLIS,
            now
        ],
    )?;
    status_by_id(conn, status_id)
}

/// A user's own active statuses, oldest first, with viewer lists.
pub fn own_statuses(conn: &Connection, user_id: &str, now: i64) -> Result<Vec<StatusResponse>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statuses
         WHERE user_id = ?1 AND expires_at > ?2 AND is_deleted = 0
         ORDER BY created_at",
        STATUS_COLUMNS
    ))?;
    let rows: Vec<Status> = stmt
        .query_map(rusqlite::params![user_id, now], status_from_row)?
        .filter_map(|r| r.ok())
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for status in &rows {
        let mut resp = status_response(status);
        resp.viewers = Some(load_viewers(conn, &status.id)?);
        out.push(resp);
    }
    Ok(out)
}

/// Active statuses of all accepted friends, oldest first, flagged with
/// whether the caller has already seen each one.
pub fn friends_statuses(conn: &Connection, user_id: &str, now: i64) -> Result<Vec<StatusResponse>> {
    let friends = gate::accepted_friends(conn, user_id)?;
    let mut out = Vec::new();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statuses
         WHERE user_id = ?1 AND expires_at > ?2 AND is_deleted = 0
         ORDER BY created_at",
        STATUS_COLUMNS
    ))?;

    for friend in &friends {
        let rows: Vec<Status> = stmt
            .query_map(rusqlite::params![friend, now], status_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for status in &rows {
            let seen: i64 = conn.query_row(
                "SELECT COUNT(*) FROM status_viewers WHERE status_id = ?1 AND user_id = ?2",
                rusqlite::params![status.id, user_id],
                |row| row.get(0),
            )?;
            let mut resp = status_response(status);
            resp.is_seen = Some(seen > 0);
            out.push(resp);
        }
    }

    out.sort_by_key(|s| s.created_at);
    Ok(out)
}

/// Record a view. Viewing your own status is rejected; the viewer set is
/// add-once, so repeat views don't duplicate.
pub fn see_status(conn: &Connection, status_id: &str, viewer: &str, now: i64) -> Result<Status> {
    let status = status_by_id(conn, status_id)?;
    if !status.is_active(now) {
        return Err(ApiError::NotFound("Status not found".to_string()));
    }
    if status.user_id == viewer {
        return Err(ApiError::Validation(
            "You cannot see your own status".to_string(),
        ));
    }
    conn.execute(
        "INSERT OR IGNORE INTO status_viewers (status_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![status.id, viewer],
    )?;
    Ok(status)
}

/// Soft delete (owner only, active only). The row stays for the TTL window.
pub fn soft_delete_status(conn: &Connection, status_id: &str, owner: &str, now: i64) -> Result<Status> {
    let status = status_by_id(conn, status_id)?;
    if status.user_id != owner || !status.is_active(now) {
        return Err(ApiError::NotFound("Status not found".to_string()));
    }
    conn.execute(
        "UPDATE statuses SET is_deleted = 1, updated_at = ?2 WHERE id = ?1",
        rusqlite::params![status.id, now],
    )?;
    Ok(status)
}

// --- REST handlers ---

#[derive(Debug, Serialize)]
pub struct StatusListResponse {
    pub success: bool,
    pub statuses: Vec<StatusResponse>,
}

/// GET /api/status — Caller's own active statuses with viewer lists.
pub async fn get_own_statuses(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<StatusListResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let now = Utc::now().timestamp_millis();

    let statuses = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        own_statuses(&conn, &user_id, now)
    })
    .await??;

    Ok(Json(StatusListResponse {
        success: true,
        statuses,
    }))
}

/// GET /api/status/friends — Active statuses of accepted friends.
pub async fn get_friends_statuses(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<StatusListResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let now = Utc::now().timestamp_millis();

    let statuses = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        friends_statuses(&conn, &user_id, now)
    })
    .await??;

    Ok(Json(StatusListResponse {
        success: true,
        statuses,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStatusRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Option<MediaPayload>,
}

#[derive(Debug, Serialize)]
pub struct SingleStatusResponse {
    pub success: bool,
    pub status: StatusResponse,
}

/// POST /api/status — Publish a status (text and/or media). The media upload
/// runs before the row is written; an upload failure persists nothing.
pub async fn create_status(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateStatusRequest>,
) -> Result<Json<SingleStatusResponse>> {
    let content = body
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if content.is_none() && body.media.is_none() {
        return Err(ApiError::Validation(
            "Content or media is required".to_string(),
        ));
    }

    let validated = body
        .media
        .as_ref()
        .map(|m| media::validate_media(m, state.max_upload_size_mb))
        .transpose()?;

    let user_id = claims.sub.clone();
    let status_id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now().timestamp_millis();

    let uploaded = match validated {
        Some(v) => {
            let store = state.media.clone();
            let owner = user_id.clone();
            let entity = status_id.clone();
            Some(
                tokio::task::spawn_blocking(move || store.upload(&v, "status", &owner, &entity))
                    .await??,
            )
        }
        None => None,
    };
    let (media_url, media_type) = match &uploaded {
        Some(m) => (m.url.clone(), m.kind.as_str().to_string()),
        None => (String::new(), String::new()),
    };

    let db = state.db.clone();
    let uid = user_id.clone();
    let (status, friends) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let status = insert_status(
            &conn,
            &status_id,
            &uid,
            content.as_deref(),
            &media_url,
            &media_type,
            now,
        )?;
        let friends = gate::accepted_friends(&conn, &uid)?;
        Ok::<_, ApiError>((status_response(&status), friends))
    })
    .await??;

    broadcast::status_created(&state, &friends, &status);

    Ok(Json(SingleStatusResponse {
        success: true,
        status,
    }))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

/// POST /api/status/{status_id}/seen — Record that the caller viewed a
/// friend's status; notifies the owner.
pub async fn see_status_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(status_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let viewer = claims.sub.clone();
    let sid = status_id.clone();
    let now = Utc::now().timestamp_millis();

    let status = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        see_status(&conn, &sid, &viewer, now)
    })
    .await??;

    broadcast::status_seen(&state, &status.user_id, &status.id, &claims.sub);

    Ok(Json(OkResponse { success: true }))
}

/// DELETE /api/status/{status_id} — Soft-delete own status; friends are told
/// to drop it from their reels.
pub async fn delete_status_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(status_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let owner = claims.sub.clone();
    let sid = status_id.clone();
    let now = Utc::now().timestamp_millis();

    let (status, friends) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let status = soft_delete_status(&conn, &sid, &owner, now)?;
        let friends = gate::accepted_friends(&conn, &owner)?;
        Ok::<_, ApiError>((status, friends))
    })
    .await??;

    broadcast::status_deleted(&state, &friends, &status.id, &status.user_id);

    Ok(Json(OkResponse { success: true }))
}
