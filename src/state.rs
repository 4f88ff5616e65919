use dashmap::DashMap;
use std::sync::Arc;

use crate::db::DbPool;
use crate::media::MediaStore;
use crate::ws::RoomRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Broadcast rooms and live connections
    pub rooms: Arc<RoomRegistry>,
    /// In-memory presence: user id -> is_online. Rebuilt empty on every
    /// process start; last writer wins on reconnect races.
    pub presence: Arc<DashMap<String, bool>>,
    /// External media storage collaborator
    pub media: Arc<dyn MediaStore>,
    /// Maximum accepted upload size in megabytes
    pub max_upload_size_mb: u32,
}
