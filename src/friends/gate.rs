//! Relationship gate: block-list checks and their side effects.
//!
//! `can_interact` guards every private-path operation (send, typing, seen).
//! Group operations never consult it — membership and group settings decide
//! there.

use rusqlite::Connection;

use crate::db::models::{FriendRequestRow, FriendStatus};
use crate::error::{ApiError, Result};

/// Canonical key for the single friend edge per unordered pair.
pub fn pair_key(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{}:{}", user_a, user_b)
    } else {
        format!("{}:{}", user_b, user_a)
    }
}

/// Does `owner`'s block-list contain `target`?
pub fn is_blocked(conn: &Connection, owner: &str, target: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_blocks WHERE user_id = ?1 AND blocked_id = ?2",
        rusqlite::params![owner, target],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Two users may interact unless either one blocks the other.
pub fn can_interact(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    Ok(!is_blocked(conn, a, b)? && !is_blocked(conn, b, a)?)
}

/// Permission-error form of the gate, for use at the top of mutation paths.
pub fn ensure_can_interact(conn: &Connection, a: &str, b: &str) -> Result<()> {
    if can_interact(conn, a, b)? {
        Ok(())
    } else {
        Err(ApiError::Permission(
            "Can't send message to this user".to_string(),
        ))
    }
}

/// The friend edge between two users, regardless of direction.
pub fn friend_edge(conn: &Connection, a: &str, b: &str) -> Result<Option<FriendRequestRow>> {
    match conn.query_row(
        "SELECT id, from_user, to_user, status, pair_key, created_at, updated_at
         FROM friend_requests WHERE pair_key = ?1",
        rusqlite::params![pair_key(a, b)],
        |row| {
            let status: String = row.get(3)?;
            Ok(FriendRequestRow {
                id: row.get(0)?,
                from_user: row.get(1)?,
                to_user: row.get(2)?,
                status: FriendStatus::from_str(&status).unwrap_or(FriendStatus::Rejected),
                pair_key: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    ) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Ids of all users with an accepted edge to `user_id`.
pub fn accepted_friends(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT from_user, to_user FROM friend_requests
         WHERE (from_user = ?1 OR to_user = ?1) AND status = 'accepted'",
    )?;
    let friends = stmt
        .query_map(rusqlite::params![user_id], |row| {
            let from: String = row.get(0)?;
            let to: String = row.get(1)?;
            Ok(if from == user_id { to } else { from })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(friends)
}

/// Block a user. A live pending/accepted edge is demoted to rejected in the
/// same call: blocking implies unfriending.
pub fn block_user(conn: &Connection, actor: &str, target: &str) -> Result<()> {
    if actor == target {
        return Err(ApiError::Validation("Can't block yourself".to_string()));
    }
    if is_blocked(conn, actor, target)? {
        return Err(ApiError::Validation("User already blocked".to_string()));
    }

    if let Some(edge) = friend_edge(conn, actor, target)? {
        if matches!(edge.status, FriendStatus::Pending | FriendStatus::Accepted) {
            conn.execute(
                "UPDATE friend_requests SET status = 'rejected', updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![edge.id],
            )?;
        }
    }

    conn.execute(
        "INSERT INTO user_blocks (user_id, blocked_id) VALUES (?1, ?2)",
        rusqlite::params![actor, target],
    )?;
    Ok(())
}

/// Unblock a user. Deliberately does NOT restore any prior relationship.
pub fn unblock_user(conn: &Connection, actor: &str, target: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM user_blocks WHERE user_id = ?1 AND blocked_id = ?2",
        rusqlite::params![actor, target],
    )?;
    if removed == 0 {
        return Err(ApiError::Validation("User not blocked".to_string()));
    }
    Ok(())
}

/// Ids on `actor`'s block-list.
pub fn blocked_ids(conn: &Connection, actor: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT blocked_id FROM user_blocks WHERE user_id = ?1 ORDER BY created_at")?;
    let ids = stmt
        .query_map(rusqlite::params![actor], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
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
    fn block_is_bidirectional_for_interaction() {
        let db = setup();
        let conn = db.lock().unwrap();

        assert!(can_interact(&conn, "ua", "ub").unwrap());
        block_user(&conn, "ua", "ub").unwrap();
        assert!(!can_interact(&conn, "ua", "ub").unwrap());
        assert!(!can_interact(&conn, "ub", "ua").unwrap());
    }

    #[test]
    fn block_demotes_pending_edge_and_unblock_does_not_restore() {
        let db = setup();
        let conn = db.lock().unwrap();

        conn.execute(
            "INSERT INTO friend_requests (id, from_user, to_user, status, pair_key)
             VALUES ('fr1', 'ub', 'ua', 'pending', ?1)",
            rusqlite::params![pair_key("ua", "ub")],
        )
        .unwrap();

        block_user(&conn, "ua", "ub").unwrap();
        let edge = friend_edge(&conn, "ua", "ub").unwrap().unwrap();
        assert_eq!(edge.status, FriendStatus::Rejected);

        unblock_user(&conn, "ua", "ub").unwrap();
        let edge = friend_edge(&conn, "ua", "ub").unwrap().unwrap();
        assert_eq!(edge.status, FriendStatus::Rejected);
        assert!(can_interact(&conn, "ua", "ub").unwrap());
    }

    #[test]
    fn cannot_block_self_or_twice() {
        let db = setup();
        let conn = db.lock().unwrap();

        assert!(matches!(
            block_user(&conn, "ua", "ua").unwrap_err(),
            ApiError::Validation(_)
        ));
        block_user(&conn, "ua", "ub").unwrap();
        assert!(matches!(
            block_user(&conn, "ua", "ub").unwrap_err(),
            ApiError::Validation(_)
        ));
    }
}
