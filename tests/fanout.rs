//! Delivery/fan-out engine: room targeting, per-connection dedupe, room
//! membership staying in lock-step with group membership, presence gating.

mod common;

use common::{connect, drain, events_named, seed_user, test_state};
use wirechat_server::chat::messages::send_private;
use wirechat_server::chat::{broadcast, presence};
use wirechat_server::groups::crud::{add_member_row, create_group_row};
use wirechat_server::ws::protocol::ServerEvent;
use wirechat_server::ws::{conversation_room, user_room};

#[tokio::test]
async fn connection_in_two_targeted_rooms_receives_one_copy() {
    let ctx = test_state();
    seed_user(&ctx.state, "ua", "Alice");

    let (conn_id, mut rx) = connect(&ctx.state, "ua");
    ctx.state.rooms.join(&conversation_room("g1"), conn_id);

    ctx.state.rooms.emit_to_rooms(
        &[user_room("ua"), conversation_room("g1")],
        &ServerEvent::Errors {
            message: "once only".to_string(),
        },
    );

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message"], "once only");
}

#[tokio::test]
async fn private_message_reaches_both_sides_and_clears_typing() {
    let ctx = test_state();
    seed_user(&ctx.state, "ua", "Alice");
    seed_user(&ctx.state, "ub", "Bob");

    let (_, mut alice_rx) = connect(&ctx.state, "ua");
    let (_, mut bob_rx) = connect(&ctx.state, "ub");

    let (message, conversation) =
        send_private(&ctx.state, "ua", "ub", Some("hi".to_string()), None)
            .await
            .unwrap();
    broadcast::private_message_sent(&ctx.state, &message, &conversation);

    let alice_frames = drain(&mut alice_rx);
    let bob_frames = drain(&mut bob_rx);

    let received = events_named(&alice_frames, "receiveMessage");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["message"]["text"], "hi");
    assert_eq!(received[0]["conversation"]["id"], conversation.id);

    assert_eq!(events_named(&bob_frames, "receiveMessage").len(), 1);
    // The recipient's typing indicator is cleared alongside delivery
    let typing = events_named(&bob_frames, "typing");
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0]["isTyping"], false);
    // The sender gets no typing event
    assert!(events_named(&alice_frames, "typing").is_empty());
}

#[tokio::test]
async fn group_fanout_follows_room_membership() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "m1", "Mia");
    seed_user(&ctx.state, "outsider", "Ozzy");

    let group_id = {
        let conn = ctx.state.db.lock().unwrap();
        let group = create_group_row(&conn, "admin", "club", "", 1_000).unwrap();
        group.id
    };

    let (_, mut admin_rx) = connect(&ctx.state, "admin");
    let (_, mut mia_rx) = connect(&ctx.state, "m1");
    let (_, mut ozzy_rx) = connect(&ctx.state, "outsider");
    ctx.state.rooms.join_user(&conversation_room(&group_id), "admin");

    let event = ServerEvent::Errors {
        message: "group ping".to_string(),
    };

    // Before Mia is a member, only the admin's connection is in the room
    ctx.state
        .rooms
        .emit_to_rooms(&[conversation_room(&group_id)], &event);
    assert_eq!(drain(&mut admin_rx).len(), 1);
    assert!(drain(&mut mia_rx).is_empty());

    // Membership grant and room join happen together
    {
        let conn = ctx.state.db.lock().unwrap();
        let group =
            wirechat_server::chat::conversations::resolve_group(&conn, &group_id).unwrap();
        add_member_row(&conn, &group, "admin", "m1").unwrap();
    }
    ctx.state.rooms.join_user(&conversation_room(&group_id), "m1");

    ctx.state
        .rooms
        .emit_to_rooms(&[conversation_room(&group_id)], &event);
    assert_eq!(drain(&mut admin_rx).len(), 1);
    assert_eq!(drain(&mut mia_rx).len(), 1);
    assert!(drain(&mut ozzy_rx).is_empty());

    // Leaving the room stops delivery immediately
    ctx.state.rooms.leave_user(&conversation_room(&group_id), "m1");
    ctx.state
        .rooms
        .emit_to_rooms(&[conversation_room(&group_id)], &event);
    assert!(drain(&mut mia_rx).is_empty());
    assert_eq!(drain(&mut admin_rx).len(), 1);
}

#[tokio::test]
async fn removed_member_is_notified_in_their_own_room() {
    let ctx = test_state();
    seed_user(&ctx.state, "admin", "Ada");
    seed_user(&ctx.state, "m1", "Mia");

    let (_, mut mia_rx) = connect(&ctx.state, "m1");

    let removed = wirechat_server::chat::view::UserSummary {
        id: "m1".to_string(),
        name: "Mia".to_string(),
        profile_image: String::new(),
    };
    // Mia's connections already left the conversation room; the targeted
    // user-room emit still reaches her
    broadcast::removed_from_group(&ctx.state, &removed, "g1");

    let frames = drain(&mut mia_rx);
    let deleted = events_named(&frames, "deletedFromGroup");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["user"]["id"], "m1");
    assert_eq!(deleted[0]["conversationId"], "g1");
}

#[tokio::test]
async fn presence_respects_visibility_preferences() {
    let ctx = test_state();
    seed_user(&ctx.state, "ghost", "Ghost");
    seed_user(&ctx.state, "social", "Sol");
    seed_user(&ctx.state, "fr", "Friend");
    seed_user(&ctx.state, "other", "Other");
    {
        let conn = ctx.state.db.lock().unwrap();
        conn.execute(
            "UPDATE users SET online_visibility = 'none' WHERE id = 'ghost'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE users SET online_visibility = 'friends' WHERE id = 'social'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO friend_requests (id, from_user, to_user, status, pair_key)
             VALUES ('f1', 'social', 'fr', 'accepted', 'fr:social')",
            [],
        )
        .unwrap();
    }

    let (_, mut fr_rx) = connect(&ctx.state, "fr");
    let (_, mut other_rx) = connect(&ctx.state, "other");

    // `none`: no broadcast, no presence entry
    presence::broadcast_presence(&ctx.state, "ghost", true)
        .await
        .unwrap();
    assert!(drain(&mut fr_rx).is_empty());
    assert!(drain(&mut other_rx).is_empty());
    assert!(!presence::is_online(&ctx.state, "ghost"));

    // `friends`: only the accepted friend's room hears it
    presence::broadcast_presence(&ctx.state, "social", true)
        .await
        .unwrap();
    let fr_frames = events_named(&drain(&mut fr_rx), "userIsOnline");
    assert_eq!(fr_frames.len(), 1);
    assert_eq!(fr_frames[0]["userId"], "social");
    assert_eq!(fr_frames[0]["isOnline"], true);
    assert!(drain(&mut other_rx).is_empty());
    assert!(presence::is_online(&ctx.state, "social"));

    // `everyone` (default): all connections hear it
    presence::broadcast_presence(&ctx.state, "other", true)
        .await
        .unwrap();
    assert_eq!(events_named(&drain(&mut fr_rx), "userIsOnline").len(), 1);
    assert_eq!(events_named(&drain(&mut other_rx), "userIsOnline").len(), 1);
}

#[tokio::test]
async fn unregister_removes_connection_from_all_rooms() {
    let ctx = test_state();
    seed_user(&ctx.state, "ua", "Alice");

    let (conn_id, mut rx) = connect(&ctx.state, "ua");
    ctx.state.rooms.join(&conversation_room("g1"), conn_id);
    assert_eq!(ctx.state.rooms.user_connection_count("ua"), 1);

    ctx.state.rooms.unregister(conn_id);
    assert_eq!(ctx.state.rooms.user_connection_count("ua"), 0);

    ctx.state.rooms.emit_to_rooms(
        &[user_room("ua"), conversation_room("g1")],
        &ServerEvent::Errors {
            message: "anyone there?".to_string(),
        },
    );
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn status_events_reach_accepted_friends_only() {
    let ctx = test_state();
    seed_user(&ctx.state, "owner", "Owen");
    seed_user(&ctx.state, "fr", "Friend");
    seed_user(&ctx.state, "stranger", "Sam");
    {
        let conn = ctx.state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO friend_requests (id, from_user, to_user, status, pair_key)
             VALUES ('f1', 'owner', 'fr', 'accepted', 'fr:owner')",
            [],
        )
        .unwrap();
    }

    let (_, mut fr_rx) = connect(&ctx.state, "fr");
    let (_, mut stranger_rx) = connect(&ctx.state, "stranger");

    let status = {
        let conn = ctx.state.db.lock().unwrap();
        wirechat_server::status::insert_status(&conn, "s1", "owner", Some("hello"), "", "", 1_000)
            .unwrap()
    };
    let friends = {
        let conn = ctx.state.db.lock().unwrap();
        wirechat_server::friends::gate::accepted_friends(&conn, "owner").unwrap()
    };

    broadcast::status_deleted(&ctx.state, &friends, &status.id, "owner");

    let fr_frames = events_named(&drain(&mut fr_rx), "deleteFriendStatus");
    assert_eq!(fr_frames.len(), 1);
    assert_eq!(fr_frames[0]["statusId"], "s1");
    assert!(drain(&mut stranger_rx).is_empty());
}
