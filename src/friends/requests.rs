//! Friend-request lifecycle over the single-edge-per-pair model, plus the
//! block-list endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use rusqlite::Connection;
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::view::{self, UserSummary};
use crate::db::models::FriendStatus;
use crate::error::{ApiError, Result};
use crate::friends::gate;
use crate::lock_db;
use crate::state::AppState;

/// Send (or re-send) a friend request. A rejected edge is reset in place
/// with the new direction; pending and accepted edges refuse the request.
pub fn add_friend(conn: &Connection, actor: &str, target: &str) -> Result<()> {
    if actor == target {
        return Err(ApiError::Validation(
            "Can't add yourself as a friend".to_string(),
        ));
    }
    view::user_summary(conn, target)?;
    if gate::is_blocked(conn, actor, target)? {
        return Err(ApiError::Validation(
            "you can't add blocked user".to_string(),
        ));
    }
    if gate::is_blocked(conn, target, actor)? {
        return Err(ApiError::Permission(
            "can't add this user to friend".to_string(),
        ));
    }

    match gate::friend_edge(conn, actor, target)? {
        None => {
            conn.execute(
                "INSERT INTO friend_requests (id, from_user, to_user, status, pair_key)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                rusqlite::params![
                    uuid::Uuid::now_v7().to_string(),
                    actor,
                    target,
                    gate::pair_key(actor, target)
                ],
            )?;
            Ok(())
        }
        Some(edge) => match edge.status {
            FriendStatus::Accepted => {
                Err(ApiError::Validation("You are already friends".to_string()))
            }
            FriendStatus::Pending => Err(ApiError::Validation(
                "Friend request already sent".to_string(),
            )),
            FriendStatus::Rejected => {
                conn.execute(
                    "UPDATE friend_requests
                     SET from_user = ?2, to_user = ?3, status = 'pending',
                         updated_at = datetime('now')
                     WHERE id = ?1",
                    rusqlite::params![edge.id, actor, target],
                )?;
                Ok(())
            }
        },
    }
}

/// Accept a pending request addressed to `actor`.
pub fn accept_friend(conn: &Connection, actor: &str, from: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE friend_requests SET status = 'accepted', updated_at = datetime('now')
         WHERE from_user = ?1 AND to_user = ?2 AND status = 'pending'",
        rusqlite::params![from, actor],
    )?;
    if updated == 0 {
        return Err(ApiError::NotFound("Friend request not found".to_string()));
    }
    Ok(())
}

/// Cancel/decline a pending request in either direction.
pub fn cancel_friend_request(conn: &Connection, actor: &str, other: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE friend_requests SET status = 'rejected', updated_at = datetime('now')
         WHERE pair_key = ?1 AND status = 'pending'",
        rusqlite::params![gate::pair_key(actor, other)],
    )?;
    if updated == 0 {
        return Err(ApiError::NotFound("Friend request not found".to_string()));
    }
    Ok(())
}

/// Unfriend: demote an accepted edge to rejected.
pub fn delete_friend(conn: &Connection, actor: &str, other: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE friend_requests SET status = 'rejected', updated_at = datetime('now')
         WHERE pair_key = ?1 AND status = 'accepted'",
        rusqlite::params![gate::pair_key(actor, other)],
    )?;
    if updated == 0 {
        return Err(ApiError::NotFound("No friend with this id".to_string()));
    }
    Ok(())
}

fn summaries(conn: &Connection, ids: &[String]) -> Result<Vec<UserSummary>> {
    ids.iter().map(|id| view::user_summary(conn, id)).collect()
}

// --- REST handlers ---

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

const OK: OkResponse = OkResponse { success: true };

/// POST /api/friends/{user_id} — Send or re-send a friend request.
pub async fn add_friend_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let target = user_id.clone();

    let me = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        add_friend(&conn, &actor, &target)?;
        view::user_summary(&conn, &actor)
    })
    .await??;

    broadcast::new_friend_request(&state, &user_id, &me);
    Ok(Json(OK))
}

/// POST /api/friends/{user_id}/accept — Accept a pending request from that user.
pub async fn accept_friend_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let from = user_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        accept_friend(&conn, &actor, &from)
    })
    .await??;

    broadcast::friend_accepted(&state, &user_id, &claims.sub);
    Ok(Json(OK))
}

/// POST /api/friends/{user_id}/cancel — Cancel/decline a pending request.
pub async fn cancel_friend_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let other = user_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        cancel_friend_request(&conn, &actor, &other)
    })
    .await??;

    broadcast::friend_request_cancelled(&state, &user_id, &claims.sub);
    Ok(Json(OK))
}

/// DELETE /api/friends/{user_id} — Unfriend.
pub async fn delete_friend_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let other = user_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        delete_friend(&conn, &actor, &other)
    })
    .await??;

    broadcast::friend_deleted(&state, &user_id, &claims.sub);
    Ok(Json(OK))
}

#[derive(Debug, Serialize)]
pub struct FriendsListResponse {
    pub success: bool,
    pub friends: Vec<UserSummary>,
}

/// GET /api/friends — Accepted friends.
pub async fn friends_list_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<FriendsListResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let friends = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let ids = gate::accepted_friends(&conn, &actor)?;
        summaries(&conn, &ids)
    })
    .await??;

    Ok(Json(FriendsListResponse {
        success: true,
        friends,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestsResponse {
    pub success: bool,
    pub friend_requests: Vec<UserSummary>,
}

/// GET /api/friends/requests — Incoming pending requests.
pub async fn friend_requests_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<FriendRequestsResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let friend_requests = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let mut stmt = conn.prepare(
            "SELECT from_user FROM friend_requests
             WHERE to_user = ?1 AND status = 'pending'",
        )?;
        let ids: Vec<String> = stmt
            .query_map(rusqlite::params![actor], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        summaries(&conn, &ids)
    })
    .await??;

    Ok(Json(FriendRequestsResponse {
        success: true,
        friend_requests,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRequestsResponse {
    pub success: bool,
    pub sent_requests: Vec<UserSummary>,
}

/// GET /api/friends/requests/sent — Outgoing pending requests.
pub async fn sent_requests_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<SentRequestsResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let sent_requests = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let mut stmt = conn.prepare(
            "SELECT to_user FROM friend_requests
             WHERE from_user = ?1 AND status = 'pending'",
        )?;
        let ids: Vec<String> = stmt
            .query_map(rusqlite::params![actor], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        summaries(&conn, &ids)
    })
    .await??;

    Ok(Json(SentRequestsResponse {
        success: true,
        sent_requests,
    }))
}

/// POST /api/users/{user_id}/block — Block a user (implies unfriend).
pub async fn block_user_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let target = user_id.clone();

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        view::user_summary(&conn, &target)?;
        gate::block_user(&conn, &actor, &target)
    })
    .await??;

    // The blocked side sees the friendship disappear, not the block itself
    broadcast::friend_deleted(&state, &user_id, &claims.sub);
    Ok(Json(OK))
}

/// POST /api/users/{user_id}/unblock
pub async fn unblock_user_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<OkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        gate::unblock_user(&conn, &actor, &user_id)
    })
    .await??;

    Ok(Json(OK))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedListResponse {
    pub success: bool,
    pub blocked_users: Vec<UserSummary>,
}

/// GET /api/users/blocked
pub async fn blocked_list_handler(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<BlockedListResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let blocked_users = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let ids = gate::blocked_ids(&conn, &actor)?;
        summaries(&conn, &ids)
    })
    .await??;

    Ok(Json(BlockedListResponse {
        success: true,
        blocked_users,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> crate::db::DbPool {
        let db = db::init_db_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO users (id, name, email) VALUES
                     ('ua', 'Alice', 'a@x.io'), ('ub', 'Bob', 'b@x.io');",
            )
            .unwrap();
        }
        db
    }

    #[test]
    fn request_accept_lifecycle() {
        let db = setup();
        let conn = db.lock().unwrap();

        add_friend(&conn, "ua", "ub").unwrap();
        // Duplicate request refused while pending
        assert!(matches!(
            add_friend(&conn, "ua", "ub").unwrap_err(),
            ApiError::Validation(_)
        ));
        // Only the addressee of the pending edge can accept
        assert!(accept_friend(&conn, "ua", "ub").is_err());
        accept_friend(&conn, "ub", "ua").unwrap();

        assert_eq!(gate::accepted_friends(&conn, "ua").unwrap(), vec!["ub"]);
        assert!(matches!(
            add_friend(&conn, "ub", "ua").unwrap_err(),
            ApiError::Validation(_)
        ));
    }

    #[test]
    fn rerequest_after_rejection_resets_edge_direction() {
        let db = setup();
        let conn = db.lock().unwrap();

        add_friend(&conn, "ua", "ub").unwrap();
        cancel_friend_request(&conn, "ub", "ua").unwrap();

        // Bob re-requests: same row, flipped direction, pending again
        add_friend(&conn, "ub", "ua").unwrap();
        let edge = gate::friend_edge(&conn, "ua", "ub").unwrap().unwrap();
        assert_eq!(edge.from_user, "ub");
        assert_eq!(edge.to_user, "ua");
        assert_eq!(edge.status, FriendStatus::Pending);

        // Still exactly one row for the pair
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM friend_requests", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unfriend_requires_accepted_edge() {
        let db = setup();
        let conn = db.lock().unwrap();

        add_friend(&conn, "ua", "ub").unwrap();
        assert!(matches!(
            delete_friend(&conn, "ua", "ub").unwrap_err(),
            ApiError::NotFound(_)
        ));
        accept_friend(&conn, "ub", "ua").unwrap();
        delete_friend(&conn, "ua", "ub").unwrap();
        assert!(gate::accepted_friends(&conn, "ua").unwrap().is_empty());
    }
}
