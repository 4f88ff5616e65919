//! Group lifecycle and permission-engine scenarios.

mod common;

use common::{seed_user, test_state};
use wirechat_server::chat::conversations::{participants, resolve_group};
use wirechat_server::chat::messages::send_group;
use wirechat_server::db::models::GroupSettings;
use wirechat_server::error::ApiError;
use wirechat_server::groups::crud::{
    add_member_row, create_group_row, delete_group_row, join_via_link_row, remove_member_row,
};
use wirechat_server::groups::permissions::{apply_patch, SettingsPatch};
use wirechat_server::groups::settings::{
    ensure_link_token, persist_settings, reset_link_token,
};

fn lock_messages(conn: &rusqlite::Connection, group_id: &str) {
    let group = resolve_group(conn, group_id).unwrap();
    let mut settings = group.group.as_ref().unwrap().settings.clone();
    settings.members_send_messages = false;
    persist_settings(conn, group_id, &settings, 10_000).unwrap();
}

#[tokio::test]
async fn send_permission_respects_settings_with_admin_override() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "m1", "Mia");

    let group_id = {
        let conn = ctx.state.db.lock().unwrap();
        let group = create_group_row(&conn, "admin", "book club", "novels", 1_000).unwrap();
        add_member_row(&conn, &group, "admin", "m1").unwrap();
        lock_messages(&conn, &group.id);
        group.id
    };

    // Non-admin member is rejected while sendNewMessages is off
    let err = send_group(
        &ctx.state,
        "m1",
        &group_id,
        Some("pssst".to_string()),
        None,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Permission(_)));

    // The admin's own message still goes through
    let (message, conversation) = send_group(
        &ctx.state,
        "admin",
        &group_id,
        Some("announcement".to_string()),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(message.text.as_deref(), Some("announcement"));
    assert!(message.to.is_none());
    assert_eq!(
        conversation.last_message.as_ref().unwrap().id,
        message.id
    );
}

#[tokio::test]
async fn non_members_and_private_ids_are_rejected() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "outsider", "Ozzy");

    let group_id = {
        let conn = ctx.state.db.lock().unwrap();
        create_group_row(&conn, "admin", "club", "", 1_000).unwrap().id
    };

    let err = send_group(
        &ctx.state,
        "outsider",
        &group_id,
        Some("let me in".to_string()),
        None,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Permission(_)));

    let err = send_group(&ctx.state, "admin", "nope", Some("?".to_string()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn membership_rules() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "m1", "Mia");
    seed_user(&ctx.state, "m2", "Moe");

    let conn = ctx.state.db.lock().unwrap();
    let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();

    add_member_row(&conn, &group, "admin", "m1").unwrap();
    // Duplicate add is denied
    assert!(matches!(
        add_member_row(&conn, &group, "admin", "m1").unwrap_err(),
        ApiError::Permission(_)
    ));
    // Plain member cannot add while addOtherMembers is off
    assert!(matches!(
        add_member_row(&conn, &group, "m1", "m2").unwrap_err(),
        ApiError::Permission(_)
    ));

    // Turn the setting on: members may now add
    let mut settings = group.group.as_ref().unwrap().settings.clone();
    settings.members_add_members = true;
    persist_settings(&conn, &group.id, &settings, 2_000).unwrap();
    let group = resolve_group(&conn, &group.id).unwrap();
    add_member_row(&conn, &group, "m1", "m2").unwrap();
    assert_eq!(participants(&conn, &group.id).unwrap(), vec!["admin", "m1", "m2"]);

    // Removal stays admin-only
    assert!(matches!(
        remove_member_row(&conn, &group, "m1", "m2").unwrap_err(),
        ApiError::Permission(_)
    ));
    remove_member_row(&conn, &group, "admin", "m2").unwrap();
    assert!(matches!(
        remove_member_row(&conn, &group, "admin", "m2").unwrap_err(),
        ApiError::NotFound(_)
    ));
}

#[tokio::test]
async fn invite_link_is_stable_until_reset() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");

    let conn = ctx.state.db.lock().unwrap();
    let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();

    // Lazily created on first request, identical on the second
    let t1 = ensure_link_token(&conn, &group, 2_000).unwrap();
    let group = resolve_group(&conn, &group.id).unwrap();
    let t2 = ensure_link_token(&conn, &group, 3_000).unwrap();
    assert_eq!(t1, t2);
    assert_eq!(t1.len(), 15);

    // Reset always yields something new
    let group = resolve_group(&conn, &group.id).unwrap();
    let t3 = reset_link_token(&conn, &group, 4_000).unwrap();
    assert_ne!(t2, t3);
}

#[tokio::test]
async fn join_via_link_token() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "joiner", "Jo");

    let conn = ctx.state.db.lock().unwrap();
    let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();
    let token = ensure_link_token(&conn, &group, 2_000).unwrap();
    let group = resolve_group(&conn, &group.id).unwrap();

    // Wrong token refused
    assert!(matches!(
        join_via_link_row(&conn, &group, "joiner", "000000000000000").unwrap_err(),
        ApiError::Permission(_)
    ));

    join_via_link_row(&conn, &group, "joiner", &token).unwrap();
    assert!(participants(&conn, &group.id).unwrap().contains(&"joiner".to_string()));

    // Already a member: the same token no longer admits
    assert!(matches!(
        join_via_link_row(&conn, &group, "joiner", &token).unwrap_err(),
        ApiError::Permission(_)
    ));
}

#[tokio::test]
async fn settings_patch_round_trips_through_storage() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");

    let conn = ctx.state.db.lock().unwrap();
    let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();

    let patch: SettingsPatch = serde_json::from_str(
        r#"{
            "members": {"sendNewMessages": false, "inviteViaLink": true},
            "admin": {"approveNewMembers": true},
            "topic": "ignored entirely"
        }"#,
    )
    .unwrap();

    let mut settings = group.group.as_ref().unwrap().settings.clone();
    assert!(apply_patch(&mut settings, &patch));
    persist_settings(&conn, &group.id, &settings, 2_000).unwrap();

    let reloaded = resolve_group(&conn, &group.id).unwrap();
    let stored = &reloaded.group.as_ref().unwrap().settings;
    assert!(!stored.members_send_messages);
    assert!(stored.members_invite_via_link);
    assert!(stored.admin_approve_new_members);
    // Untouched defaults survive
    assert!(!stored.members_edit_group_data);
    assert_eq!(
        *stored,
        GroupSettings {
            link_token: None,
            members_edit_group_data: false,
            members_send_messages: false,
            members_add_members: false,
            members_invite_via_link: true,
            admin_approve_new_members: true,
        }
    );
}

#[tokio::test]
async fn delete_group_is_admin_only_and_cascades() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "m1", "Mia");

    let group_id = {
        let conn = ctx.state.db.lock().unwrap();
        let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();
        add_member_row(&conn, &group, "admin", "m1").unwrap();
        group.id
    };
    send_group(&ctx.state, "m1", &group_id, Some("hello".to_string()), None, None)
        .await
        .unwrap();

    let conn = ctx.state.db.lock().unwrap();
    let group = resolve_group(&conn, &group_id).unwrap();
    assert!(matches!(
        delete_group_row(&conn, &group, "m1").unwrap_err(),
        ApiError::Permission(_)
    ));
    delete_group_row(&conn, &group, "admin").unwrap();

    assert!(matches!(
        resolve_group(&conn, &group_id).unwrap_err(),
        ApiError::NotFound(_)
    ));
    let orphans: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(orphans, 0);
}
