//! Shared fixtures: an AppState over an in-memory database, with a media
//! store writing into a temp directory.

use dashmap::DashMap;
use std::sync::Arc;

use wirechat_server::config::MediaConfig;
use wirechat_server::db;
use wirechat_server::media::LocalMediaStore;
use wirechat_server::state::AppState;
use wirechat_server::ws::{new_room_registry, ConnectionId};

pub struct TestContext {
    pub state: AppState,
    // Held so the media directory outlives the test
    _media_dir: tempfile::TempDir,
}

pub fn test_state() -> TestContext {
    let media_dir = tempfile::tempdir().expect("tempdir");
    let state = AppState {
        db: db::init_db_in_memory().expect("in-memory db"),
        jwt_secret: vec![42u8; 32],
        rooms: new_room_registry(),
        presence: Arc::new(DashMap::new()),
        media: Arc::new(LocalMediaStore::new(
            media_dir.path().to_str().unwrap(),
            &MediaConfig::default(),
        )),
        max_upload_size_mb: 25,
    };
    TestContext {
        state,
        _media_dir: media_dir,
    }
}

pub fn seed_user(state: &AppState, id: &str, name: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, name, format!("{}@example.com", id)],
    )
    .unwrap();
}

/// Attach a fake connection for a user; returns its id and the receiving end.
pub fn connect(
    state: &AppState,
    user_id: &str,
) -> (
    ConnectionId,
    tokio::sync::mpsc::UnboundedReceiver<axum::extract::ws::Message>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let id = state.rooms.register(user_id, tx);
    (id, rx)
}

/// Drain every frame currently queued on a connection, parsed as JSON.
pub fn drain(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<axum::extract::ws::Message>,
) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let axum::extract::ws::Message::Text(text) = msg {
            out.push(serde_json::from_str(&text).expect("valid JSON frame"));
        }
    }
    out
}

/// Frames with a given `event` tag.
pub fn events_named(frames: &[serde_json::Value], name: &str) -> Vec<serde_json::Value> {
    frames
        .iter()
        .filter(|f| f["event"] == name)
        .cloned()
        .collect()
}
