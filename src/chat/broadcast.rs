//! Fan-out engine: maps each domain event to its target room set and emits
//! the payload once per subscribed connection (the registry deduplicates a
//! connection that sits in several targeted rooms).
//!
//! Payloads are built from the values the mutating calls returned — never
//! from a re-query — so a racing second mutation cannot leak into the event.

use crate::chat::view::{ConversationResponse, MessageResponse, ReactResponse, UserSummary};
use crate::db::models::Message;
use crate::groups::settings::GroupSettingsResponse;
use crate::state::AppState;
use crate::status::StatusResponse;
use crate::ws::protocol::ServerEvent;
use crate::ws::{conversation_room, user_room};

/// Private message: both participants' personal rooms, then clear the
/// recipient's typing indicator for this conversation.
pub fn private_message_sent(
    state: &AppState,
    message: &MessageResponse,
    conversation: &ConversationResponse,
) {
    let mut rooms = vec![user_room(&message.from)];
    if let Some(to) = &message.to {
        rooms.push(user_room(to));
    }
    state.rooms.emit_to_rooms(
        &rooms,
        &ServerEvent::ReceiveMessage {
            success: true,
            message: message.clone(),
            conversation: conversation.clone(),
        },
    );

    if let Some(to) = &message.to {
        crate::chat::presence::emit_typing(state, to, &message.conversation_id, false);
    }
}

/// Group message: the group's conversation room. Senders receive their own
/// copy through that room like everyone else.
pub fn group_message_sent(
    state: &AppState,
    message: &MessageResponse,
    conversation: &ConversationResponse,
) {
    state.rooms.emit_to_rooms(
        &[conversation_room(&message.conversation_id)],
        &ServerEvent::ReceiveMessage {
            success: true,
            message: message.clone(),
            conversation: conversation.clone(),
        },
    );
}

/// Bulk-seen: notify the other side of the private conversation.
pub fn messages_seen(state: &AppState, conversation_id: &str, reader: &str, other: &str) {
    state.rooms.emit_to_rooms(
        &[user_room(other)],
        &ServerEvent::MessagesSeen {
            conversation_id: conversation_id.to_string(),
            by: reader.to_string(),
        },
    );
}

/// Reaction change: the message's other participant. For a group message
/// (no `to`) the sender is notified unless they reacted themselves.
pub fn reaction_changed(
    state: &AppState,
    message: &Message,
    actor: &str,
    reacts: &[ReactResponse],
) {
    let other_side = if message.from_user != actor {
        Some(message.from_user.clone())
    } else {
        message.to_user.clone()
    };
    let Some(other_side) = other_side else { return };

    state.rooms.emit_to_rooms(
        &[user_room(&other_side)],
        &ServerEvent::MessageReaction {
            message_id: message.id.clone(),
            reacts: reacts.to_vec(),
        },
    );
}

/// Membership granted: everyone in the group room, including the new
/// member's just-joined connections.
pub fn added_to_group(state: &AppState, new_user: &UserSummary, group: &ConversationResponse) {
    state.rooms.emit_to_rooms(
        &[conversation_room(&group.id)],
        &ServerEvent::AddedToGroup {
            new_user: new_user.clone(),
            group: group.clone(),
        },
    );
}

/// Membership revoked: the group room plus the removed user's personal room
/// (their connections have already left the group room).
pub fn removed_from_group(state: &AppState, user: &UserSummary, conversation_id: &str) {
    state.rooms.emit_to_rooms(
        &[conversation_room(conversation_id), user_room(&user.id)],
        &ServerEvent::DeletedFromGroup {
            user: user.clone(),
            conversation_id: conversation_id.to_string(),
        },
    );
}

pub fn group_settings_updated(
    state: &AppState,
    conversation_id: &str,
    settings: &GroupSettingsResponse,
) {
    state.rooms.emit_to_rooms(
        &[conversation_room(conversation_id)],
        &ServerEvent::GroupSettingsUpdated {
            conversation_id: conversation_id.to_string(),
            settings: settings.clone(),
        },
    );
}

/// New status: every accepted friend's personal room.
pub fn status_created(state: &AppState, friends: &[String], status: &StatusResponse) {
    let rooms: Vec<String> = friends.iter().map(|f| user_room(f)).collect();
    state.rooms.emit_to_rooms(
        &rooms,
        &ServerEvent::NewFriendStatus {
            status: status.clone(),
        },
    );
}

pub fn status_deleted(state: &AppState, friends: &[String], status_id: &str, user_id: &str) {
    let rooms: Vec<String> = friends.iter().map(|f| user_room(f)).collect();
    state.rooms.emit_to_rooms(
        &rooms,
        &ServerEvent::DeleteFriendStatus {
            status_id: status_id.to_string(),
            user_id: user_id.to_string(),
        },
    );
}

/// A friend viewed a status: tell the owner.
pub fn status_seen(state: &AppState, owner: &str, status_id: &str, viewer: &str) {
    state.rooms.emit_to_rooms(
        &[user_room(owner)],
        &ServerEvent::StatusSeen {
            status_id: status_id.to_string(),
            viewer: viewer.to_string(),
        },
    );
}

// --- Friend lifecycle events, all targeted at one user's personal room ---

pub fn new_friend_request(state: &AppState, to: &str, from: &UserSummary) {
    state.rooms.send_to_user(
        to,
        &ServerEvent::NewFriendRequest { user: from.clone() },
    );
}

pub fn friend_accepted(state: &AppState, to: &str, by: &str) {
    state.rooms.send_to_user(
        to,
        &ServerEvent::FriendAccepted {
            user_id: by.to_string(),
        },
    );
}

pub fn friend_request_cancelled(state: &AppState, to: &str, by: &str) {
    state.rooms.send_to_user(
        to,
        &ServerEvent::FriendRequestCancelled {
            user_id: by.to_string(),
        },
    );
}

pub fn friend_deleted(state: &AppState, to: &str, by: &str) {
    state.rooms.send_to_user(
        to,
        &ServerEvent::FriendDeleted {
            user_id: by.to_string(),
        },
    );
}
