//! SQLite implementation of the store traits

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::password::{hash_password, verify_password};
use super::schema;
use super::{
    CredentialStore, KnockStore, Message, MessageKind, MessageStore, RoomDirectory, RoomInfo,
    StoreError, StoreResult, UserInfo,
};

/// How long a connection waits on another writer before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type RoomRow = (i64, String, i64, Option<String>, String, i64);

const ROOM_COLUMNS: &str = "SELECT r.id, r.name, r.is_locked, u.username, r.created_at,
        (SELECT COUNT(*) FROM room_memberships rm WHERE rm.room_id = r.id)
    FROM rooms r
    LEFT JOIN users u ON r.created_by = u.id";

fn room_from_row((id, name, locked, creator, created_at, member_count): RoomRow) -> RoomInfo {
    RoomInfo {
        id,
        name,
        locked: locked != 0,
        creator,
        created_at,
        member_count,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and prepare the schema
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        tracing::info!(url = url, "Database opened");
        Self::from_pool(pool).await
    }

    /// Private in-memory database
    ///
    /// Uses a single pooled connection that is never recycled, since each
    /// SQLite connection to `:memory:` is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and prepare the schema
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        schema::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Rooms in which `username` holds a persistent membership
    pub async fn memberships(&self, username: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name
            FROM room_memberships rm
            JOIN rooms r ON rm.room_id = r.id
            JOIN users u ON rm.user_id = u.id
            WHERE u.username = ?
            ORDER BY rm.id",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Start a transaction that takes the write lock up front
    ///
    /// A deferred transaction that reads first and then writes cannot
    /// upgrade its lock while another connection writes; SQLite fails it
    /// with `SQLITE_BUSY` without waiting on the busy timeout.
    async fn begin_write(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn user_exists(&self, username: &str) -> StoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_user(&self, username: &str, password: &str) -> StoreResult<bool> {
        let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(hash_password(password))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                tracing::info!(user = username, "User created");
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(user = username, "Username already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<UserInfo>> {
        let mut tx = self.begin_write().await?;

        let row: Option<(i64, String, String, String, Option<String>, i64)> = sqlx::query_as(
            "SELECT id, username, password_hash, created_at, last_login, is_active
            FROM users
            WHERE username = ? AND is_active = 1",
        )
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, username, stored_hash, created_at, last_login, active)) = row else {
            tracing::warn!(user = username, "Authentication failed: no such active user");
            return Ok(None);
        };

        if !verify_password(password, &stored_hash) {
            tracing::warn!(user = %username, "Authentication failed: wrong password");
            return Ok(None);
        }

        sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(user = %username, "User authenticated");
        Ok(Some(UserInfo {
            id,
            username,
            created_at,
            last_login,
            active: active != 0,
        }))
    }
}

#[async_trait]
impl RoomDirectory for SqliteStore {
    async fn get_room_info(&self, name: &str) -> StoreResult<Option<RoomInfo>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("{ROOM_COLUMNS} WHERE r.name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(room_from_row))
    }

    async fn get_all_rooms(&self) -> StoreResult<Vec<RoomInfo>> {
        let rows: Vec<RoomRow> = sqlx::query_as(&format!("{ROOM_COLUMNS} ORDER BY r.id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(room_from_row).collect())
    }

    async fn create_room(
        &self,
        name: &str,
        locked: bool,
        creator: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO rooms (name, is_locked, created_by)
            VALUES (?, ?, (SELECT id FROM users WHERE username = ?))",
        )
        .bind(name)
        .bind(i64::from(locked))
        .bind(creator)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(room = name, locked = locked, creator = ?creator, "Room created");
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(room = name, "Room already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn join_room(&self, username: &str, room: &str, is_host: bool) -> StoreResult<bool> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO room_memberships (room_id, user_id, is_host)
            SELECT r.id, u.id, ?
            FROM rooms r, users u
            WHERE r.name = ? AND u.username = ?",
        )
        .bind(i64::from(is_host))
        .bind(room)
        .bind(username)
        .execute(&mut *tx)
        .await?;

        let member: Option<(i64,)> = sqlx::query_as(
            "SELECT rm.id
            FROM room_memberships rm
            JOIN rooms r ON rm.room_id = r.id
            JOIN users u ON rm.user_id = u.id
            WHERE r.name = ? AND u.username = ?",
        )
        .bind(room)
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(member.is_some())
    }

    async fn leave_room(&self, username: &str, room: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM room_memberships
            WHERE room_id = (SELECT id FROM rooms WHERE name = ?)
              AND user_id = (SELECT id FROM users WHERE username = ?)",
        )
        .bind(room)
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn switch_room(&self, username: &str, room: &str, is_host: bool) -> StoreResult<bool> {
        let mut tx = self.begin_write().await?;

        let user: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?;
        let target: Option<(i64,)> = sqlx::query_as("SELECT id FROM rooms WHERE name = ?")
            .bind(room)
            .fetch_optional(&mut *tx)
            .await?;

        let (Some((user_id,)), Some((room_id,))) = (user, target) else {
            return Ok(false);
        };

        let released = sqlx::query("DELETE FROM room_memberships WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("INSERT INTO room_memberships (room_id, user_id, is_host) VALUES (?, ?, ?)")
            .bind(room_id)
            .bind(user_id)
            .bind(i64::from(is_host))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            user = username,
            room = room,
            released = released,
            "Membership switched"
        );
        Ok(true)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn save_message(
        &self,
        username: &str,
        room: &str,
        content: &str,
        kind: MessageKind,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO messages (room_id, user_id, message_type, content)
            SELECT r.id, u.id, ?, ?
            FROM rooms r, users u
            WHERE r.name = ? AND u.username = ?",
        )
        .bind(kind.as_str())
        .bind(content)
        .bind(room)
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_history(&self, room: &str, limit: usize) -> StoreResult<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT u.username, m.content, m.message_type, m.created_at
            FROM messages m
            JOIN users u ON m.user_id = u.id
            JOIN rooms r ON m.room_id = r.id
            WHERE r.name = ? AND m.message_type = ?
            ORDER BY m.id DESC
            LIMIT ?",
        )
        .bind(room)
        .bind(MessageKind::Chat.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // Newest-first from the query; hand back oldest-first
        rows.into_iter()
            .rev()
            .map(|(username, content, kind, created_at)| {
                Ok(Message {
                    username,
                    content,
                    kind: kind.parse()?,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()
    }
}

#[async_trait]
impl KnockStore for SqliteStore {
    async fn save_request(&self, username: &str, room: &str) -> StoreResult<bool> {
        let mut tx = self.begin_write().await?;

        let ids: Option<(i64, i64)> = sqlx::query_as(
            "SELECT u.id, r.id FROM users u, rooms r WHERE u.username = ? AND r.name = ?",
        )
        .bind(username)
        .bind(room)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, room_id)) = ids else {
            return Ok(false);
        };

        let inserted = sqlx::query(
            "INSERT INTO knock_requests (requested_by, room_id, accepted)
            SELECT ?, ?, 0
            WHERE NOT EXISTS (
                SELECT 1 FROM knock_requests
                WHERE requested_by = ? AND room_id = ? AND accepted = 0
            )",
        )
        .bind(user_id)
        .bind(room_id)
        .bind(user_id)
        .bind(room_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        tracing::info!(
            user = username,
            room = room,
            duplicate = inserted == 0,
            "Knock request saved"
        );
        Ok(true)
    }

    async fn get_requests(&self, room: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT u.username
            FROM knock_requests kr
            JOIN users u ON kr.requested_by = u.id
            JOIN rooms r ON kr.room_id = r.id
            WHERE r.name = ? AND kr.accepted = 0
            ORDER BY kr.id",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_ROOM;

    async fn store_with_users(names: &[&str]) -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        for name in names {
            assert!(store.create_user(name, "pw").await.unwrap());
        }
        store
    }

    #[tokio::test]
    async fn test_general_room_seeded() {
        let store = SqliteStore::in_memory().await.unwrap();

        let general = store.get_room_info(DEFAULT_ROOM).await.unwrap().unwrap();
        assert!(!general.locked);
        assert_eq!(general.creator, None);
        assert_eq!(general.member_count, 0);

        // Migration is idempotent
        let store = SqliteStore::from_pool(store.pool.clone()).await.unwrap();
        assert_eq!(store.get_all_rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_and_authenticate_user() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(!store.user_exists("alice").await.unwrap());
        assert!(store.create_user("alice", "secret").await.unwrap());
        assert!(store.user_exists("alice").await.unwrap());
        assert!(!store.create_user("alice", "other").await.unwrap());

        assert!(store.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(store.authenticate("nobody", "secret").await.unwrap().is_none());

        let info = store.authenticate("alice", "secret").await.unwrap().unwrap();
        assert_eq!(info.username, "alice");
        assert!(info.active);
        assert_eq!(info.last_login, None);

        let again = store.authenticate("alice", "secret").await.unwrap().unwrap();
        assert!(again.last_login.is_some());
    }

    #[tokio::test]
    async fn test_room_name_collision() {
        let store = store_with_users(&["alice"]).await;

        assert!(store.create_room("secret", true, Some("alice")).await.unwrap());
        assert!(!store.create_room("secret", false, None).await.unwrap());
        assert!(!store.create_room(DEFAULT_ROOM, false, None).await.unwrap());

        let room = store.get_room_info("secret").await.unwrap().unwrap();
        assert!(room.locked);
        assert!(room.is_hosted_by("alice"));

        let names: Vec<String> = store
            .get_all_rooms()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec![DEFAULT_ROOM.to_owned(), "secret".to_owned()]);
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let store = store_with_users(&["alice"]).await;

        assert!(store.join_room("alice", DEFAULT_ROOM, false).await.unwrap());
        // Joining twice keeps one row
        assert!(store.join_room("alice", DEFAULT_ROOM, false).await.unwrap());
        assert_eq!(store.memberships("alice").await.unwrap(), vec![DEFAULT_ROOM]);

        assert!(!store.join_room("alice", "nowhere", false).await.unwrap());
        assert!(!store.join_room("ghost", DEFAULT_ROOM, false).await.unwrap());

        assert!(store.leave_room("alice", DEFAULT_ROOM).await.unwrap());
        assert!(!store.leave_room("alice", DEFAULT_ROOM).await.unwrap());
        assert!(store.memberships("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_switch_room_keeps_single_membership() {
        let store = store_with_users(&["alice"]).await;
        store.create_room("dev", false, Some("alice")).await.unwrap();
        store.create_room("ops", false, None).await.unwrap();

        // Stale rows from an unclean shutdown are released too
        store.join_room("alice", DEFAULT_ROOM, false).await.unwrap();
        store.join_room("alice", "ops", false).await.unwrap();

        for room in ["dev", DEFAULT_ROOM, "ops", "dev"] {
            assert!(store.switch_room("alice", room, false).await.unwrap());
            assert_eq!(store.memberships("alice").await.unwrap(), vec![room]);
        }

        assert!(!store.switch_room("alice", "nowhere", false).await.unwrap());
        assert_eq!(store.memberships("alice").await.unwrap(), vec!["dev"]);
        assert_eq!(store.get_room_info("dev").await.unwrap().unwrap().member_count, 1);
    }

    #[tokio::test]
    async fn test_history_is_chat_only_and_chronological() {
        let store = store_with_users(&["alice", "bob"]).await;

        store.save_message("alice", DEFAULT_ROOM, "one", MessageKind::Chat).await.unwrap();
        store.save_message("bob", DEFAULT_ROOM, "psst", MessageKind::Whisper).await.unwrap();
        store.save_message("bob", DEFAULT_ROOM, "two", MessageKind::Chat).await.unwrap();
        store.save_message("alice", DEFAULT_ROOM, "three", MessageKind::Chat).await.unwrap();
        assert!(!store.save_message("alice", "nowhere", "lost", MessageKind::Chat).await.unwrap());

        let history = store.get_history(DEFAULT_ROOM, 50).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert!(history.iter().all(|m| m.kind == MessageKind::Chat));

        let recent = store.get_history(DEFAULT_ROOM, 2).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);

        assert!(store.get_history(DEFAULT_ROOM, 0).await.unwrap().is_empty());
        assert!(store.get_history("nowhere", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knock_requests_deduplicated() {
        let store = store_with_users(&["alice", "bob", "carol"]).await;
        store.create_room("secret", true, Some("alice")).await.unwrap();

        assert!(store.save_request("bob", "secret").await.unwrap());
        assert!(store.save_request("bob", "secret").await.unwrap());
        assert!(store.save_request("carol", "secret").await.unwrap());
        assert!(!store.save_request("bob", "nowhere").await.unwrap());

        assert_eq!(store.get_requests("secret").await.unwrap(), vec!["bob", "carol"]);
        assert!(store.get_requests(DEFAULT_ROOM).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_room_switches_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("chat.db").display());
        let store = SqliteStore::connect(&url).await.unwrap();
        store.create_room("dev", false, None).await.unwrap();

        let names: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
        for name in &names {
            assert!(store.create_user(name, "pw").await.unwrap());
        }

        let tasks: Vec<_> = names
            .iter()
            .cloned()
            .map(|name| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..30 {
                        let room = if i % 2 == 0 { "dev" } else { DEFAULT_ROOM };
                        assert!(store.switch_room(&name, room, false).await.unwrap());
                    }
                    store.save_request(&name, "dev").await.unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        for name in &names {
            assert_eq!(store.memberships(name).await.unwrap(), vec![DEFAULT_ROOM]);
        }
        store.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_reports_errors() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.close().await;

        assert!(matches!(
            store.user_exists("alice").await,
            Err(StoreError::Database(_))
        ));
    }
}
