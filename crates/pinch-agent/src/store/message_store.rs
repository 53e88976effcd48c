//! SQLite-backed message records (§3), sharing a pooled connection
//! handle the same way `pinch-relay`'s `Store` backs both blocks and
//! the queue from one database.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "inbound" => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }
}

/// A single message record (§3). `body` is the plaintext JSON
/// (`{"text":..., "attribution":...}`) — never the ciphertext, which
/// is never persisted.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub connection_address: String,
    pub direction: Direction,
    pub body: String,
    pub thread_id: String,
    pub reply_to: Option<String>,
    pub priority: Option<String>,
    pub sequence: u64,
    pub state: String,
    pub failure_reason: Option<String>,
    pub attribution: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

pub struct MessageStore {
    pool: Pool<SqliteConnectionManager>,
}

impl MessageStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::new(manager)?;
        Self::init(&pool)?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::new(manager)?;
        Self::init(&pool)?;
        Ok(Self { pool })
    }

    fn init(pool: &Pool<SqliteConnectionManager>) -> Result<()> {
        let conn = pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                connection_address TEXT NOT NULL,
                direction TEXT NOT NULL,
                body TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                reply_to TEXT,
                priority TEXT,
                sequence INTEGER NOT NULL,
                state TEXT NOT NULL,
                failure_reason TEXT,
                attribution TEXT,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_connection
                ON messages (connection_address, sequence);
            CREATE TABLE IF NOT EXISTS sequences (
                connection_address TEXT PRIMARY KEY,
                counter INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Allocate the next per-connection sequence number, starting at 1.
    /// Runs inside an immediate transaction so concurrent senders never
    /// observe the same value twice.
    pub fn next_sequence(&self, connection_address: &str) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO sequences (connection_address, counter) VALUES (?1, 0)",
            params![connection_address],
        )?;
        tx.execute(
            "UPDATE sequences SET counter = counter + 1 WHERE connection_address = ?1",
            params![connection_address],
        )?;
        let counter: i64 = tx.query_row(
            "SELECT counter FROM sequences WHERE connection_address = ?1",
            params![connection_address],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(counter as u64)
    }

    pub fn insert(&self, record: &MessageRecord) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO messages (
                id, connection_address, direction, body, thread_id, reply_to,
                priority, sequence, state, failure_reason, attribution,
                created_at_ms, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.connection_address,
                record.direction.as_str(),
                record.body,
                record.thread_id,
                record.reply_to,
                record.priority,
                record.sequence as i64,
                record.state,
                record.failure_reason,
                record.attribution,
                record.created_at_ms as i64,
                record.updated_at_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn update_state(&self, id: &str, state: &str, failure_reason: Option<&str>, updated_at_ms: u64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE messages SET state = ?1, failure_reason = ?2, updated_at_ms = ?3 WHERE id = ?4",
            params![state, failure_reason, updated_at_ms as i64, id],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<MessageRecord>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, connection_address, direction, body, thread_id, reply_to,
                    priority, sequence, state, failure_reason, attribution,
                    created_at_ms, updated_at_ms
             FROM messages WHERE id = ?1",
            params![id],
            Self::row_to_record,
        )
        .optional()
        .map_err(Into::into)
    }

    /// A connection's messages in send/receive order.
    pub fn list_for_connection(&self, connection_address: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, connection_address, direction, body, thread_id, reply_to,
                    priority, sequence, state, failure_reason, attribution,
                    created_at_ms, updated_at_ms
             FROM messages WHERE connection_address = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![connection_address], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
        let direction: String = row.get(2)?;
        let sequence: i64 = row.get(7)?;
        let created_at_ms: i64 = row.get(11)?;
        let updated_at_ms: i64 = row.get(12)?;
        Ok(MessageRecord {
            id: row.get(0)?,
            connection_address: row.get(1)?,
            direction: Direction::from_str(&direction),
            body: row.get(3)?,
            thread_id: row.get(4)?,
            reply_to: row.get(5)?,
            priority: row.get(6)?,
            sequence: sequence as u64,
            state: row.get(8)?,
            failure_reason: row.get(9)?,
            attribution: row.get(10)?,
            created_at_ms: created_at_ms as u64,
            updated_at_ms: updated_at_ms as u64,
        })
    }
}
