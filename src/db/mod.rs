pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared handle to the single SQLite connection. rusqlite is synchronous,
/// so every access goes through the mutex inside `spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

fn prepare(mut conn: Connection) -> Result<DbPool, Box<dyn std::error::Error>> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open (creating if needed) the database under `data_dir`, switch it to WAL
/// for concurrent readers, and bring the schema up to date.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = Path::new(data_dir).join("wirechat.db");

    let conn = Connection::open(&db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let pool = prepare(conn)?;
    tracing::info!("Database ready at {}", db_path.display());
    Ok(pool)
}

/// Fully migrated in-memory database. Used by tests.
pub fn init_db_in_memory() -> Result<DbPool, Box<dyn std::error::Error>> {
    prepare(Connection::open_in_memory()?)
}
