use axum::{middleware, routing, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, messages, reactions};
use crate::friends::requests as friend_routes;
use crate::groups::{crud as group_crud, settings as group_settings};
use crate::state::AppState;
use crate::status;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route(
            "/api/chat/conversations",
            routing::get(conversations::list_conversations),
        )
        .route(
            "/api/chat/conversations/user/{user_id}",
            routing::get(conversations::get_user_conversation),
        )
        .route(
            "/api/chat/conversations/messages/{user_id}",
            routing::get(messages::conversation_messages),
        )
        .route(
            "/api/chat/conversations/{conversation_id}",
            routing::delete(conversations::delete_conversation),
        )
        .route(
            "/api/chat/message/{message_id}/react",
            routing::post(reactions::add_message_reaction),
        )
        .route(
            "/api/chat/message/{message_id}",
            routing::delete(messages::delete_message),
        )
        .route(
            "/api/chat/message/forward/{message_id}",
            routing::post(messages::forward_message),
        );

    let group_routes = Router::new()
        .route("/api/groups", routing::post(group_crud::create_group))
        .route(
            "/api/groups/{group_id}",
            routing::delete(group_crud::delete_group),
        )
        .route(
            "/api/groups/{group_id}/leave",
            routing::post(group_crud::leave_group),
        )
        .route(
            "/api/groups/{group_id}/join",
            routing::post(group_crud::join_group),
        )
        .route(
            "/api/groups/{group_id}/members",
            routing::post(group_crud::add_member).delete(group_crud::remove_member),
        )
        .route(
            "/api/groups/{group_id}/settings",
            routing::get(group_settings::get_settings).put(group_settings::update_settings),
        )
        .route(
            "/api/groups/{group_id}/invite-link",
            routing::get(group_settings::get_invite_link),
        )
        .route(
            "/api/groups/{group_id}/invite-link/reset",
            routing::post(group_settings::reset_invite_link),
        );

    let friend_routes = Router::new()
        .route("/api/friends", routing::get(friend_routes::friends_list_handler))
        .route(
            "/api/friends/requests",
            routing::get(friend_routes::friend_requests_handler),
        )
        .route(
            "/api/friends/requests/sent",
            routing::get(friend_routes::sent_requests_handler),
        )
        .route(
            "/api/friends/{user_id}",
            routing::post(friend_routes::add_friend_handler)
                .delete(friend_routes::delete_friend_handler),
        )
        .route(
            "/api/friends/{user_id}/accept",
            routing::post(friend_routes::accept_friend_handler),
        )
        .route(
            "/api/friends/{user_id}/cancel",
            routing::post(friend_routes::cancel_friend_handler),
        )
        .route(
            "/api/users/{user_id}/block",
            routing::post(friend_routes::block_user_handler),
        )
        .route(
            "/api/users/{user_id}/unblock",
            routing::post(friend_routes::unblock_user_handler),
        )
        .route(
            "/api/users/blocked",
            routing::get(friend_routes::blocked_list_handler),
        );

    let status_routes = Router::new()
        .route(
            "/api/status",
            routing::get(status::get_own_statuses).post(status::create_status),
        )
        .route(
            "/api/status/friends",
            routing::get(status::get_friends_statuses),
        )
        .route(
            "/api/status/{status_id}/seen",
            routing::post(status::see_status_handler),
        )
        .route(
            "/api/status/{status_id}",
            routing::delete(status::delete_status_handler),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", routing::get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(group_routes)
        .merge(friend_routes)
        .merge(status_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
