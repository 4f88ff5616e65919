//! JSON event protocol spoken over WebSocket text frames.
//!
//! Client requests carry an optional `ack` correlation id; the server answers
//! with an `ack` event on the same connection. Socket-path failures are
//! reported twice: in the ack (when one was requested) and as a best-effort
//! `errors` event to the actor's own connection.

use serde::{Deserialize, Serialize};

use crate::chat::view::{ConversationResponse, MessageResponse, ReactResponse, UserSummary};
use crate::chat::{broadcast, messages, presence};
use crate::error::ApiError;
use crate::media::MediaPayload;
use crate::state::AppState;
use crate::status::StatusResponse;
use crate::ws::{send_event, ConnectionSender};

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    SendPrivateMessage {
        to: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media: Option<MediaPayload>,
        #[serde(default)]
        ack: Option<u64>,
    },
    SendGroupMessage {
        conversation_id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media: Option<MediaPayload>,
        #[serde(default)]
        reply_message: Option<String>,
        #[serde(default)]
        ack: Option<u64>,
    },
    Typing {
        to: String,
        is_typing: bool,
    },
    SeeAllMessages {
        to: String,
        #[serde(default)]
        ack: Option<u64>,
    },
}

/// Events the server emits, to single connections or into rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Ack {
        ack: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<MessageResponse>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation: Option<ConversationResponse>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ReceiveMessage {
        success: bool,
        message: MessageResponse,
        conversation: ConversationResponse,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    MessagesSeen {
        conversation_id: String,
        by: String,
    },
    MessageReaction {
        message_id: String,
        reacts: Vec<ReactResponse>,
    },
    AddedToGroup {
        new_user: UserSummary,
        group: ConversationResponse,
    },
    DeletedFromGroup {
        user: UserSummary,
        conversation_id: String,
    },
    GroupSettingsUpdated {
        conversation_id: String,
        settings: crate::groups::settings::GroupSettingsResponse,
    },
    NewFriendRequest {
        user: UserSummary,
    },
    FriendAccepted {
        user_id: String,
    },
    FriendRequestCancelled {
        user_id: String,
    },
    FriendDeleted {
        user_id: String,
    },
    NewFriendStatus {
        status: StatusResponse,
    },
    StatusSeen {
        status_id: String,
        viewer: String,
    },
    DeleteFriendStatus {
        status_id: String,
        user_id: String,
    },
    UserIsOnline {
        user_id: String,
        is_online: bool,
    },
    Errors {
        message: String,
    },
}

/// Dispatch a decoded client event to the appropriate handler.
pub async fn handle_client_event(
    state: &AppState,
    user_id: &str,
    tx: &ConnectionSender,
    event: ClientEvent,
) {
    match event {
        ClientEvent::SendPrivateMessage {
            to,
            text,
            media,
            ack,
        } => {
            match messages::send_private(state, user_id, &to, text, media).await {
                Ok((message, conversation)) => {
                    send_ack_success(tx, ack, &message, &conversation);
                    broadcast::private_message_sent(state, &message, &conversation);
                }
                Err(e) => report_error(state, user_id, tx, ack, e),
            }
        }
        ClientEvent::SendGroupMessage {
            conversation_id,
            text,
            media,
            reply_message,
            ack,
        } => {
            match messages::send_group(state, user_id, &conversation_id, text, media, reply_message)
                .await
            {
                Ok((message, conversation)) => {
                    send_ack_success(tx, ack, &message, &conversation);
                    broadcast::group_message_sent(state, &message, &conversation);
                }
                Err(e) => report_error(state, user_id, tx, ack, e),
            }
        }
        ClientEvent::Typing { to, is_typing } => {
            // Failures are dropped: typing is fire-and-forget.
            if let Err(e) = presence::send_typing(state, user_id, &to, is_typing).await {
                tracing::debug!(user_id = %user_id, error = %e, "typing event rejected");
            }
        }
        ClientEvent::SeeAllMessages { to, ack } => {
            match messages::see_all_messages(state, user_id, &to).await {
                Ok(Some(conversation_id)) => {
                    broadcast::messages_seen(state, &conversation_id, user_id, &to);
                    if let Some(ack) = ack {
                        send_event(
                            tx,
                            &ServerEvent::Ack {
                                ack,
                                success: true,
                                message: None,
                                conversation: None,
                                error: None,
                            },
                        );
                    }
                }
                // Reader has read receipts disabled — silently ignored.
                Ok(None) => {}
                Err(e) => report_error(state, user_id, tx, ack, e),
            }
        }
    }
}

fn send_ack_success(
    tx: &ConnectionSender,
    ack: Option<u64>,
    message: &MessageResponse,
    conversation: &ConversationResponse,
) {
    if let Some(ack) = ack {
        send_event(
            tx,
            &ServerEvent::Ack {
                ack,
                success: true,
                message: Some(message.clone()),
                conversation: Some(conversation.clone()),
                error: None,
            },
        );
    }
}

/// Deliver a failure to the caller: ack (if requested) plus an `errors`
/// event into the actor's own room.
pub fn report_error(
    state: &AppState,
    user_id: &str,
    tx: &ConnectionSender,
    ack: Option<u64>,
    error: ApiError,
) {
    let message = error.to_string();
    if let Some(ack) = ack {
        send_event(
            tx,
            &ServerEvent::Ack {
                ack,
                success: false,
                message: None,
                conversation: None,
                error: Some(message.clone()),
            },
        );
    }
    state
        .rooms
        .send_to_user(user_id, &ServerEvent::Errors { message });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_names_match_contract() {
        let json = r#"{"event":"sendPrivateMessage","to":"u2","text":"hi","ack":3}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendPrivateMessage { to, text, ack, media } => {
                assert_eq!(to, "u2");
                assert_eq!(text.as_deref(), Some("hi"));
                assert_eq!(ack, Some(3));
                assert!(media.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let json = r#"{"event":"typing","to":"u2","isTyping":true}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::Typing { is_typing: true, .. }));

        let json = r#"{"event":"seeAllMessages","to":"u2"}"#;
        assert!(matches!(
            serde_json::from_str::<ClientEvent>(json).unwrap(),
            ClientEvent::SeeAllMessages { ack: None, .. }
        ));
    }

    #[test]
    fn server_event_tags_are_camel_case() {
        let event = ServerEvent::Typing {
            conversation_id: "c1".to_string(),
            is_typing: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"typing\""));
        assert!(json.contains("\"conversationId\":\"c1\""));
        assert!(json.contains("\"isTyping\":false"));

        let event = ServerEvent::Errors {
            message: "nope".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"errors\""));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let json = r#"{"event":"selfDestruct"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }
}
