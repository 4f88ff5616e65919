//! Group settings: read-time link-token projection, allow-list patching,
//! invite-link issue/reset.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::conversations::resolve_group;
use crate::db::models::{Conversation, GroupInfo, GroupSettings};
use crate::error::{ApiError, Result};
use crate::groups::crud::ensure_participant;
use crate::groups::permissions::{self, SettingsPatch};
use crate::lock_db;
use crate::state::AppState;

/// Settings as clients see them. `link_token` is a projection: populated for
/// the admin always, for ordinary members only while invites-via-link are
/// enabled, and never in room broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettingsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_token: Option<String>,
    pub members: MembersSettingsResponse,
    pub admin: AdminSettingsResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersSettingsResponse {
    pub edit_group_data: bool,
    pub send_new_messages: bool,
    pub add_other_members: bool,
    pub invite_via_link: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettingsResponse {
    pub approve_new_members: bool,
}

/// May `actor` read the group's link token?
pub fn link_token_visible_to(group: &GroupInfo, actor: &str) -> bool {
    actor == group.admin_id || group.settings.members_invite_via_link
}

/// Project settings for one reader, applying the token visibility rule.
pub fn settings_response(group: &GroupInfo, actor: Option<&str>) -> GroupSettingsResponse {
    let link_token = match actor {
        Some(actor) if link_token_visible_to(group, actor) => group.settings.link_token.clone(),
        _ => None,
    };
    GroupSettingsResponse {
        link_token,
        members: MembersSettingsResponse {
            edit_group_data: group.settings.members_edit_group_data,
            send_new_messages: group.settings.members_send_messages,
            add_other_members: group.settings.members_add_members,
            invite_via_link: group.settings.members_invite_via_link,
        },
        admin: AdminSettingsResponse {
            approve_new_members: group.settings.admin_approve_new_members,
        },
    }
}

/// Write the settings columns back to the group row.
pub fn persist_settings(
    conn: &Connection,
    group_id: &str,
    settings: &GroupSettings,
    now: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET
             link_token = ?2,
             members_edit_group_data = ?3,
             members_send_messages = ?4,
             members_add_members = ?5,
             members_invite_via_link = ?6,
             admin_approve_new_members = ?7,
             updated_at = ?8
         WHERE id = ?1",
        rusqlite::params![
            group_id,
            settings.link_token,
            settings.members_edit_group_data as i64,
            settings.members_send_messages as i64,
            settings.members_add_members as i64,
            settings.members_invite_via_link as i64,
            settings.admin_approve_new_members as i64,
            now
        ],
    )?;
    Ok(())
}

/// Return the group's link token, generating one on first request.
/// Repeated calls return the identical token until a reset.
pub fn ensure_link_token(conn: &Connection, group: &Conversation, now: i64) -> Result<String> {
    let info = group.group.as_ref().expect("group conversation has group info");
    if let Some(token) = &info.settings.link_token {
        return Ok(token.clone());
    }
    let token = permissions::generate_link_token();
    conn.execute(
        "UPDATE conversations SET link_token = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![group.id, token, now],
    )?;
    Ok(token)
}

/// Regenerate the link token. Guaranteed to differ from the previous one.
pub fn reset_link_token(conn: &Connection, group: &Conversation, now: i64) -> Result<String> {
    let info = group.group.as_ref().expect("group conversation has group info");
    let mut token = permissions::generate_link_token();
    while info.settings.link_token.as_deref() == Some(token.as_str()) {
        token = permissions::generate_link_token();
    }
    conn.execute(
        "UPDATE conversations SET link_token = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![group.id, token, now],
    )?;
    Ok(token)
}

// --- REST handlers ---

#[derive(Debug, Serialize)]
pub struct SettingsResponseBody {
    pub success: bool,
    pub settings: GroupSettingsResponse,
}

/// GET /api/groups/{group_id}/settings — Member view of the settings,
/// link token projected per reader.
pub async fn get_settings(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<SettingsResponseBody>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let settings = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &group_id)?;
        ensure_participant(&conn, &group, &actor)?;
        let info = group.group.as_ref().expect("group conversation has group info");
        Ok::<_, ApiError>(settings_response(info, Some(&actor)))
    })
    .await??;

    Ok(Json(SettingsResponseBody {
        success: true,
        settings,
    }))
}

/// PUT /api/groups/{group_id}/settings — Admin-only patch. Only allow-listed
/// paths apply; a patch that touches none of them is a validation error.
pub async fn update_settings(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SettingsResponseBody>> {
    let db = state.db.clone();
    let actor = claims.sub.clone();
    let gid = group_id.clone();
    let now = Utc::now().timestamp_millis();

    let (admin_view, room_view) = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &gid)?;
        let info = group.group.as_ref().expect("group conversation has group info");
        if !permissions::can_edit_settings(info, &actor) {
            return Err(ApiError::Permission(
                "Only the admin can edit group settings".to_string(),
            ));
        }

        let mut settings = info.settings.clone();
        if !permissions::apply_patch(&mut settings, &patch) {
            return Err(ApiError::Validation(
                "No editable settings in request".to_string(),
            ));
        }
        persist_settings(&conn, &group.id, &settings, now)?;

        let updated = GroupInfo {
            settings,
            ..info.clone()
        };
        // Room broadcasts never carry the token; the admin response does
        Ok::<_, ApiError>((
            settings_response(&updated, Some(&actor)),
            settings_response(&updated, None),
        ))
    })
    .await??;

    broadcast::group_settings_updated(&state, &group_id, &room_view);

    Ok(Json(SettingsResponseBody {
        success: true,
        settings: admin_view,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteLinkResponse {
    pub success: bool,
    pub link_token: String,
}

/// GET /api/groups/{group_id}/invite-link — Read (lazily creating) the
/// invite token. Admin always; members only while invites-via-link are on.
pub async fn get_invite_link(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<InviteLinkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;
    let now = Utc::now().timestamp_millis();

    let link_token = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &group_id)?;
        ensure_participant(&conn, &group, &actor)?;
        let info = group.group.as_ref().expect("group conversation has group info");
        if !link_token_visible_to(info, &actor) {
            return Err(ApiError::Permission(
                "Invites via link are disabled for this group".to_string(),
            ));
        }
        ensure_link_token(&conn, &group, now)
    })
    .await??;

    Ok(Json(InviteLinkResponse {
        success: true,
        link_token,
    }))
}

/// POST /api/groups/{group_id}/invite-link/reset — Admin-only regeneration;
/// the returned token always differs from the previous one.
pub async fn reset_invite_link(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<InviteLinkResponse>> {
    let db = state.db.clone();
    let actor = claims.sub;
    let now = Utc::now().timestamp_millis();

    let link_token = tokio::task::spawn_blocking(move || {
        let conn = lock_db!(db);
        let group = resolve_group(&conn, &group_id)?;
        let info = group.group.as_ref().expect("group conversation has group info");
        if !permissions::can_edit_settings(info, &actor) {
            return Err(ApiError::Permission(
                "Only the admin can reset the invite link".to_string(),
            ));
        }
        reset_link_token(&conn, &group, now)
    })
    .await??;

    Ok(Json(InviteLinkResponse {
        success: true,
        link_token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_info(admin: &str, invite_via_link: bool, token: Option<&str>) -> GroupInfo {
        GroupInfo {
            admin_id: admin.to_string(),
            group_name: "g".to_string(),
            group_desc: String::new(),
            group_image: String::new(),
            settings: GroupSettings {
                link_token: token.map(|t| t.to_string()),
                members_invite_via_link: invite_via_link,
                ..GroupSettings::default()
            },
        }
    }

    #[test]
    fn admin_always_sees_token_members_only_with_invites_on() {
        let info = group_info("admin", false, Some("tok"));
        assert!(link_token_visible_to(&info, "admin"));
        assert!(!link_token_visible_to(&info, "member"));

        let info = group_info("admin", true, Some("tok"));
        assert!(link_token_visible_to(&info, "member"));
    }

    #[test]
    fn projection_strips_token_for_rooms() {
        let info = group_info("admin", true, Some("tok"));
        assert_eq!(
            settings_response(&info, Some("admin")).link_token.as_deref(),
            Some("tok")
        );
        assert!(settings_response(&info, None).link_token.is_none());
    }
}
