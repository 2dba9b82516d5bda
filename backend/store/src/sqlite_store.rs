/// SQLite-backed chat store.
///
/// Holds the identity tables (`users`, `events`) the relay validates against
/// and the append-only `messages` table histories are read from. Send times
/// are stored as microseconds since the Unix epoch so that ordering by
/// `(sent_at, id)` is a plain integer sort.
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use eventchat_core::{ChatMessage, EventId, IdentityGateway, MessageStore, NewMessage, UserId};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS events (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS messages (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id  INTEGER NOT NULL REFERENCES users(id),
        event_id INTEGER NOT NULL REFERENCES events(id),
        text     TEXT NOT NULL,
        sent_at  INTEGER NOT NULL,
        sent     INTEGER NOT NULL DEFAULT 1
    );
    CREATE INDEX IF NOT EXISTS idx_messages_event ON messages(event_id, sent_at, id);";

pub struct SqliteChatStore {
    conn: Mutex<Connection>,
}

impl SqliteChatStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite chat database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL journal")?;
        let store = Self::init(conn)?;
        info!("SqliteChatStore opened at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize chat schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert a user, or rename it if the id is already taken.
    pub async fn add_user(&self, id: UserId, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id.0, name],
        )
        .with_context(|| format!("Failed to upsert user {id}"))?;
        debug!(user = %id, "Upserted user");
        Ok(())
    }

    /// Insert an event, or rename it if the id is already taken.
    pub async fn add_event(&self, id: EventId, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id.0, name],
        )
        .with_context(|| format!("Failed to upsert event {id}"))?;
        debug!(event = %id, "Upserted event");
        Ok(())
    }

    /// Count all messages in the store.
    pub async fn count_messages(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    fn exists(conn: &Connection, sql: &str, id: i64) -> Result<bool> {
        let found = conn
            .query_row(sql, params![id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(found)
    }
}

#[async_trait]
impl IdentityGateway for SqliteChatStore {
    async fn user_exists(&self, id: UserId) -> Result<bool> {
        let conn = self.conn.lock().await;
        Self::exists(&conn, "SELECT 1 FROM users WHERE id = ?1", id.0)
    }

    async fn event_exists(&self, id: EventId) -> Result<bool> {
        let conn = self.conn.lock().await;
        Self::exists(&conn, "SELECT 1 FROM events WHERE id = ?1", id.0)
    }
}

#[async_trait]
impl MessageStore for SqliteChatStore {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (user_id, event_id, text, sent_at, sent)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![
                message.author.0,
                message.event.0,
                message.text,
                message.sent_at.timestamp_micros(),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to append message by user {} to event {}",
                message.author, message.event
            )
        })?;
        let id = conn.last_insert_rowid();
        debug!(id, event = %message.event, "Appended message");
        Ok(ChatMessage::from_new(id, message))
    }

    async fn fetch_history(&self, event: EventId) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, event_id, text, sent_at, sent
             FROM messages WHERE event_id = ?1 ORDER BY sent_at ASC, id ASC",
        )?;

        let history = stmt
            .query_map(params![event.0], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read history of event {event}"))?;

        Ok(history)
    }
}

// ---------------------------------------------------------------------------
// Row deserialization helper
// ---------------------------------------------------------------------------

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let sent_at_micros: i64 = row.get(4)?;
    let sent_at = DateTime::from_timestamp_micros(sent_at_micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, sent_at_micros))?;

    Ok(ChatMessage {
        id: row.get(0)?,
        author: UserId(row.get(1)?),
        event: EventId(row.get(2)?),
        text: row.get(3)?,
        sent_at,
        sent: row.get(5)?,
    })
}
