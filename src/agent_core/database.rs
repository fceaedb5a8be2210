//! SQLite chat repository.
//!
//! Uses `rusqlite` in synchronous mode behind a `std::sync::Mutex`; every
//! operation is a handful of indexed statements. WAL mode is enabled for
//! concurrent readers.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::errors::AgentError;
use super::repository::ChatRepository;
use super::types::{Summary, UncompressedMessage};

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite database handle for the agent core.
pub struct AgentDatabase {
    conn: Mutex<Connection>,
}

impl AgentDatabase {
    /// Open (or create) the agent database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::DatabaseError {
            reason: "connection mutex poisoned".into(),
        })
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                user_text TEXT NOT NULL,
                assistant_text TEXT NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_user_pending
                ON messages(user_id, compressed, id);

            CREATE TABLE IF NOT EXISTS summaries (
                user_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                covered_message_count INTEGER NOT NULL,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Insert one exchange and return its row ID.
    pub fn insert_message(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<i64, AgentError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (user_id, user_text, assistant_text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, user_text, assistant_text, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Uncompressed exchanges, oldest first.
    pub fn get_uncompressed(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<UncompressedMessage>, AgentError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, user_text, assistant_text, compressed, created_at
             FROM messages
             WHERE user_id = ?1 AND compressed = 0
             ORDER BY id ASC
             LIMIT ?2",
        )?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = stmt.query_map(params![user_id, limit], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of uncompressed exchanges for a user.
    pub fn uncompressed_count(&self, user_id: &str) -> Result<u32, AgentError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND compressed = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Flag exchanges as folded into the summary.
    pub fn set_compressed(&self, message_ids: &[i64]) -> Result<(), AgentError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE messages SET compressed = 1 WHERE id = ?1")?;
            for id in message_ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ─── Summaries ──────────────────────────────────────────────────────

    pub fn load_summary(&self, user_id: &str) -> Result<Option<Summary>, AgentError> {
        let summary = self
            .conn()?
            .query_row(
                "SELECT text, covered_message_count, position
                 FROM summaries WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Summary {
                        text: row.get(0)?,
                        covered_message_count: row.get::<_, i64>(1)? as u32,
                        position: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    /// Upsert the user's single summary row.
    pub fn store_summary(&self, user_id: &str, summary: &Summary) -> Result<(), AgentError> {
        self.conn()?.execute(
            "INSERT INTO summaries (user_id, text, covered_message_count, position, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                text = excluded.text,
                covered_message_count = excluded.covered_message_count,
                position = excluded.position,
                updated_at = excluded.updated_at",
            params![
                user_id,
                summary.text,
                summary.covered_message_count as i64,
                summary.position,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Number of summary rows for a user (0 or 1).
    pub fn summary_count(&self, user_id: &str) -> Result<u32, AgentError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM summaries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

#[async_trait]
impl ChatRepository for AgentDatabase {
    async fn save_message(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<i64, AgentError> {
        self.insert_message(user_id, user_text, assistant_text)
    }

    async fn uncompressed_messages(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<UncompressedMessage>, AgentError> {
        self.get_uncompressed(user_id, limit)
    }

    async fn count_uncompressed(&self, user_id: &str) -> Result<u32, AgentError> {
        self.uncompressed_count(user_id)
    }

    async fn get_summary(&self, user_id: &str) -> Result<Option<Summary>, AgentError> {
        self.load_summary(user_id)
    }

    async fn replace_summary(&self, user_id: &str, summary: &Summary) -> Result<(), AgentError> {
        self.store_summary(user_id, summary)
    }

    async fn mark_compressed(&self, message_ids: &[i64]) -> Result<(), AgentError> {
        self.set_compressed(message_ids)
    }
}

// ─── Row Helpers ────────────────────────────────────────────────────────────

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<UncompressedMessage> {
    Ok(UncompressedMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_text: row.get(2)?,
        assistant_text: row.get(3)?,
        compressed: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
