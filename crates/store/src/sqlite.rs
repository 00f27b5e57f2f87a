//! SQLite session store.
//!
//! One database file, three tables:
//! - `sessions`: one row per session (status, running token count)
//! - `messages`: the append-only log, keyed by `(session_id, seq)`
//! - `store_owner`: a single row rewritten at open to take the write lock
//!
//! The connection runs in WAL mode with `locking_mode = EXCLUSIVE` and a zero
//! busy timeout. The first write takes a lock that is held until the store is
//! closed, so a second process opening the same file fails immediately with
//! [`StoreError::Locked`] instead of interleaving writes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use conduit_core::error::StoreError;
use conduit_core::message::{ContentBlock, Message, Role};
use conduit_core::session::{
    Session, SessionId, SessionStatus, SessionStore, SessionSummary, preview_text,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Connection, Row, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A durable, single-owner SQLite session store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.size())
            .field("closed", &self.pool.is_closed())
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// Fails with [`StoreError::Locked`] when another process holds it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("creating {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self::connect(options).await?;
        info!(path = %path.display(), "SQLite session store opened");
        Ok(store)
    }

    /// An ephemeral in-process database (useful for tests).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Exclusive)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::ZERO)
            .pragma("foreign_keys", "ON");

        // A single long-lived connection owns the exclusive lock. No
        // min_connections: `close` detaches that connection and the pool must
        // not spawn a replacement behind it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| db_error("open", e))?;

        let store = Self { pool };
        store.run_migrations().await?;
        store.claim().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id           TEXT PRIMARY KEY NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'active',
                token_count  INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("sessions table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                session_id   TEXT NOT NULL REFERENCES sessions(id),
                seq          INTEGER NOT NULL,
                id           TEXT NOT NULL,
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                token_cost   INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("messages table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_owner (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                pid        INTEGER NOT NULL,
                opened_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("store_owner table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("updated_at index", e))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Write the owner row; in exclusive mode this takes the lock for good.
    async fn claim(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO store_owner (id, pid, opened_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET pid = excluded.pid, opened_at = excluded.opened_at
            "#,
        )
        .bind(std::process::id() as i64)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("claim", e))?;
        Ok(())
    }

    /// Release the database. Another process may open it afterwards.
    ///
    /// The lock-owning connection is detached and closed explicitly, which
    /// waits for the SQLite handle to be dropped. Closing the pool alone can
    /// return while the handle is still open.
    pub async fn close(&self) {
        match self.pool.acquire().await {
            Ok(conn) => {
                let conn = conn.detach();
                self.pool.close().await;
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "SQLite connection did not close cleanly");
                }
            }
            Err(_) => self.pool.close().await,
        }
        debug!("SQLite session store closed");
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
        let id: String = column(row, "id")?;
        let role: String = column(row, "role")?;
        let content: String = column(row, "content")?;
        let token_cost: i64 = column(row, "token_cost")?;
        let created_at: String = column(row, "created_at")?;

        let role = Role::parse(&role)
            .ok_or_else(|| StoreError::Corrupt(format!("message {id}: unknown role '{role}'")))?;
        let content: Vec<ContentBlock> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("message {id}: content: {e}")))?;

        Ok(Message {
            timestamp: parse_timestamp(&created_at)?,
            id,
            role,
            content,
            token_cost: token_cost.max(0) as usize,
        })
    }

    async fn fetch_session_row(&self, id: &SessionId) -> Result<SqliteRow, StoreError> {
        sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("load session", e))?
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self) -> Result<Session, StoreError> {
        let session = Session::new(SessionId::new());
        sqlx::query(
            "INSERT INTO sessions (id, created_at, updated_at, status, token_count) VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(session.id.as_str())
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.updated_at))
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create session", e))?;

        debug!(session_id = %session.id, "Session created");
        Ok(session)
    }

    async fn append_turn(&self, id: &SessionId, messages: &[Message]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin", e))?;

        let exists = sqlx::query("SELECT 1 FROM sessions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("append", e))?;
        if exists.is_none() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }

        let next: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq), -1) + 1 AS next FROM messages WHERE session_id = ?1",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("next"))
        .map_err(|e| db_error("next seq", e))?;

        let mut added_tokens: i64 = 0;
        for (offset, message) in messages.iter().enumerate() {
            let content = serde_json::to_string(&message.content)
                .map_err(|e| StoreError::Storage(format!("Content serialization: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO messages (session_id, seq, id, role, content, token_cost, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(id.as_str())
            .bind(next + offset as i64)
            .bind(&message.id)
            .bind(message.role.as_str())
            .bind(&content)
            .bind(message.token_cost as i64)
            .bind(timestamp(message.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("insert message", e))?;
            added_tokens += message.token_cost as i64;
        }

        sqlx::query(
            "UPDATE sessions SET token_count = token_count + ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(added_tokens)
        .bind(timestamp(Utc::now()))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update session", e))?;

        tx.commit().await.map_err(|e| db_error("commit", e))?;
        debug!(session_id = %id, count = messages.len(), "Turn committed");
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let row = self.fetch_session_row(id).await?;
        let created_at: String = column(&row, "created_at")?;
        let updated_at: String = column(&row, "updated_at")?;
        let status: String = column(&row, "status")?;
        let token_count: i64 = column(&row, "token_count")?;

        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY seq")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("load messages", e))?;
        let messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Session {
            id: id.clone(),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            messages,
            token_count: token_count.max(0) as usize,
            status: SessionStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("session {id}: status '{status}'")))?,
        })
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.*,
                   (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count,
                   (SELECT content FROM messages m
                     WHERE m.session_id = s.id AND m.role = 'user'
                     ORDER BY m.seq LIMIT 1) AS first_user
            FROM sessions s
            ORDER BY s.updated_at DESC, s.rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list sessions", e))?;

        rows.iter()
            .map(|row| {
                let id: String = column(row, "id")?;
                let status: String = column(row, "status")?;
                let message_count: i64 = column(row, "message_count")?;
                let token_count: i64 = column(row, "token_count")?;
                let first_user: Option<String> = column(row, "first_user")?;
                let created_at: String = column(row, "created_at")?;
                let updated_at: String = column(row, "updated_at")?;
                let preview = first_user
                    .and_then(|c| serde_json::from_str::<Vec<ContentBlock>>(&c).ok())
                    .map(|blocks| {
                        let text: String = blocks
                            .iter()
                            .filter_map(|b| match b {
                                ContentBlock::Text { text } => Some(text.as_str()),
                                _ => None,
                            })
                            .collect();
                        preview_text(&text)
                    });

                Ok(SessionSummary {
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    status: SessionStatus::parse(&status).ok_or_else(|| {
                        StoreError::Corrupt(format!("session {id}: status '{status}'"))
                    })?,
                    id: SessionId(id),
                    message_count: message_count.max(0) as usize,
                    token_count: token_count.max(0) as usize,
                    preview,
                })
            })
            .collect()
    }

    async fn archive_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(SessionStatus::Archived.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("archive", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        info!(session_id = %id, "Session archived");
        Ok(())
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{s}': {e}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
fn is_locked(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            matches!(primary, Some(5 | 6)) || db.message().contains("locked")
        }
        other => other.to_string().contains("database is locked"),
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    if is_locked(&e) {
        StoreError::Locked(format!("{context}: {e}"))
    } else {
        StoreError::Storage(format!("{context}: {e}"))
    }
}

fn migration_error(context: &str, e: sqlx::Error) -> StoreError {
    if is_locked(&e) {
        StoreError::Locked(format!("{context}: {e}"))
    } else {
        StoreError::MigrationFailed(format!("{context}: {e}"))
    }
}
