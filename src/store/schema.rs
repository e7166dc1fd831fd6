//! Schema creation and seeding

use sqlx::SqlitePool;

use super::StoreResult;

/// Name of the room every session starts in
pub const DEFAULT_ROOM: &str = "general";

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_login TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        is_locked INTEGER NOT NULL DEFAULT 0,
        created_by INTEGER,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (created_by) REFERENCES users (id)
    )",
    "CREATE TABLE IF NOT EXISTS room_memberships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        joined_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        is_host INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (room_id) REFERENCES rooms (id),
        FOREIGN KEY (user_id) REFERENCES users (id),
        UNIQUE (room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        message_type TEXT NOT NULL DEFAULT 'chat',
        content TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (room_id) REFERENCES rooms (id),
        FOREIGN KEY (user_id) REFERENCES users (id)
    )",
    "CREATE TABLE IF NOT EXISTS knock_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        requested_by INTEGER NOT NULL,
        room_id INTEGER NOT NULL,
        accepted INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (requested_by) REFERENCES users (id),
        FOREIGN KEY (room_id) REFERENCES rooms (id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_username ON users (username)",
    "CREATE INDEX IF NOT EXISTS idx_rooms_name ON rooms (name)",
    "CREATE INDEX IF NOT EXISTS idx_room_memberships_user ON room_memberships (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_room ON messages (room_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_knock_requests_room ON knock_requests (room_id, accepted)",
];

/// Create tables and indexes if missing, and seed the default room
pub(crate) async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query("INSERT OR IGNORE INTO rooms (name, is_locked, created_by) VALUES (?, 0, NULL)")
        .bind(DEFAULT_ROOM)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::debug!("Database schema ready");
    Ok(())
}
