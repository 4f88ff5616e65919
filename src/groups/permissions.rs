//! Group permission engine: evaluates a group's settings against an actor
//! and an action. Pure functions over the loaded group row — handlers map a
//! `false` to a permission error.

use rand::Rng;
use serde::Deserialize;

use crate::db::models::{GroupInfo, GroupSettings};

/// Invite link tokens: 15 characters from the hex alphabet.
/// Not secrets against the resource owner, so no constant-time comparison.
pub const LINK_TOKEN_LEN: usize = 15;
const LINK_TOKEN_ALPHABET: &[u8] = b"0123456789abcdef";

pub fn generate_link_token() -> String {
    let mut rng = rand::rng();
    (0..LINK_TOKEN_LEN)
        .map(|_| {
            let idx = rng.random_range(0..LINK_TOKEN_ALPHABET.len());
            LINK_TOKEN_ALPHABET[idx] as char
        })
        .collect()
}

/// Joining via link: the token must match exactly and the actor must not
/// already be a participant.
pub fn can_join(group: &GroupInfo, participants: &[String], actor: &str, token: &str) -> bool {
    group.settings.link_token.as_deref() == Some(token)
        && !participants.iter().any(|p| p == actor)
}

/// Adding a member: the admin always may; ordinary participants only when
/// the group allows it. Never when the target is already in.
pub fn can_add_member(
    group: &GroupInfo,
    participants: &[String],
    actor: &str,
    target: &str,
) -> bool {
    if participants.iter().any(|p| p == target) {
        return false;
    }
    actor == group.admin_id
        || (group.settings.members_add_members && participants.iter().any(|p| p == actor))
}

pub fn can_remove_member(group: &GroupInfo, actor: &str) -> bool {
    actor == group.admin_id
}

pub fn can_send_message(group: &GroupInfo, actor: &str) -> bool {
    actor == group.admin_id || group.settings.members_send_messages
}

pub fn can_edit_settings(group: &GroupInfo, actor: &str) -> bool {
    actor == group.admin_id
}

/// Settings patch as accepted on the wire. Only the paths named here are
/// mutable; anything else in the request body is silently dropped by
/// deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub link_token: Option<String>,
    #[serde(default)]
    pub members: Option<MembersPatch>,
    #[serde(default)]
    pub admin: Option<AdminPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersPatch {
    #[serde(default)]
    pub edit_group_data: Option<bool>,
    #[serde(default)]
    pub send_new_messages: Option<bool>,
    #[serde(default)]
    pub add_other_members: Option<bool>,
    #[serde(default)]
    pub invite_via_link: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminPatch {
    #[serde(default)]
    pub approve_new_members: Option<bool>,
}

/// Apply a patch in place. Returns false when nothing in the patch touched
/// an allowed path — the caller treats that as a validation error.
pub fn apply_patch(settings: &mut GroupSettings, patch: &SettingsPatch) -> bool {
    let mut changed = false;

    if let Some(token) = &patch.link_token {
        settings.link_token = Some(token.clone());
        changed = true;
    }
    if let Some(members) = &patch.members {
        if let Some(v) = members.edit_group_data {
            settings.members_edit_group_data = v;
            changed = true;
        }
        if let Some(v) = members.send_new_messages {
            settings.members_send_messages = v;
            changed = true;
        }
        if let Some(v) = members.add_other_members {
            settings.members_add_members = v;
            changed = true;
        }
        if let Some(v) = members.invite_via_link {
            settings.members_invite_via_link = v;
            changed = true;
        }
    }
    if let Some(admin) = &patch.admin {
        if let Some(v) = admin.approve_new_members {
            settings.admin_approve_new_members = v;
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(admin: &str, settings: GroupSettings) -> GroupInfo {
        GroupInfo {
            admin_id: admin.to_string(),
            group_name: "g".to_string(),
            group_desc: String::new(),
            group_image: String::new(),
            settings,
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn link_token_shape() {
        let token = generate_link_token();
        assert_eq!(token.len(), LINK_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn join_requires_exact_token_and_non_membership() {
        let mut settings = GroupSettings::default();
        settings.link_token = Some("abc123abc123abc".to_string());
        let g = group("admin", settings);
        let members = ids(&["admin", "m1"]);

        assert!(can_join(&g, &members, "stranger", "abc123abc123abc"));
        assert!(!can_join(&g, &members, "stranger", "abc123abc123abX"));
        assert!(!can_join(&g, &members, "m1", "abc123abc123abc"));
    }

    #[test]
    fn join_denied_without_token() {
        let g = group("admin", GroupSettings::default());
        assert!(!can_join(&g, &ids(&["admin"]), "stranger", ""));
    }

    #[test]
    fn add_member_matrix() {
        let g = group("admin", GroupSettings::default());
        let members = ids(&["admin", "m1"]);

        assert!(can_add_member(&g, &members, "admin", "new"));
        // members_add_members is off by default
        assert!(!can_add_member(&g, &members, "m1", "new"));
        // already a participant
        assert!(!can_add_member(&g, &members, "admin", "m1"));

        let mut open = GroupSettings::default();
        open.members_add_members = true;
        let g = group("admin", open);
        assert!(can_add_member(&g, &members, "m1", "new"));
        // non-participants never add, even with the setting on
        assert!(!can_add_member(&g, &members, "stranger", "new"));
    }

    #[test]
    fn send_message_respects_admin_override() {
        let mut locked = GroupSettings::default();
        locked.members_send_messages = false;
        let g = group("admin", locked);

        assert!(can_send_message(&g, "admin"));
        assert!(!can_send_message(&g, "m1"));
    }

    #[test]
    fn patch_allow_list_and_empty_patch() {
        let mut settings = GroupSettings::default();

        // Unknown paths vanish at deserialization; only allowed keys apply
        let patch: SettingsPatch = serde_json::from_str(
            r#"{"members": {"sendNewMessages": false, "groupName": "sneaky"}, "color": "red"}"#,
        )
        .unwrap();
        assert!(apply_patch(&mut settings, &patch));
        assert!(!settings.members_send_messages);

        let empty: SettingsPatch =
            serde_json::from_str(r#"{"somethingElse": true}"#).unwrap();
        assert!(!apply_patch(&mut settings, &empty));
    }
}
