//! Durable store shared by the block list and the message queue,
//! backed by a single SQLite database behind an `r2d2` pool (mirroring
//! `nostr-relay`'s storage stack) — the "single opened handle" the
//! block store and queue are specified to share.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::error::Result;

/// A single queued envelope, ready for delivery.
pub struct QueuedEnvelope {
    pub sort_key: [u8; 16],
    pub sender: String,
    pub raw_envelope: Vec<u8>,
    pub enqueued_at_nanos: u64,
}

pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    seq: AtomicU64,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::new(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS blocks (
                    blocker TEXT NOT NULL,
                    blocked TEXT NOT NULL,
                    PRIMARY KEY (blocker, blocked)
                );
                CREATE TABLE IF NOT EXISTS queue (
                    recipient TEXT NOT NULL,
                    sort_key BLOB NOT NULL,
                    sender TEXT NOT NULL,
                    envelope BLOB NOT NULL,
                    enqueued_at_nanos INTEGER NOT NULL,
                    PRIMARY KEY (recipient, sort_key)
                );",
            )?;
        }

        Ok(Self {
            pool,
            seq: AtomicU64::new(0),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::new(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS blocks (
                    blocker TEXT NOT NULL,
                    blocked TEXT NOT NULL,
                    PRIMARY KEY (blocker, blocked)
                );
                CREATE TABLE IF NOT EXISTS queue (
                    recipient TEXT NOT NULL,
                    sort_key BLOB NOT NULL,
                    sender TEXT NOT NULL,
                    envelope BLOB NOT NULL,
                    enqueued_at_nanos INTEGER NOT NULL,
                    PRIMARY KEY (recipient, sort_key)
                );",
            )?;
        }
        Ok(Self {
            pool,
            seq: AtomicU64::new(0),
        })
    }

    // -- blocks --------------------------------------------------------

    pub fn block(&self, blocker: &str, blocked: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO blocks (blocker, blocked) VALUES (?1, ?2)",
            params![blocker, blocked],
        )?;
        Ok(())
    }

    pub fn unblock(&self, blocker: &str, blocked: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM blocks WHERE blocker = ?1 AND blocked = ?2",
            params![blocker, blocked],
        )?;
        Ok(())
    }

    /// True if `blocker` has blocked `blocked` — i.e. envelopes from
    /// `blocked` addressed to `blocker` must be silently dropped.
    pub fn is_blocked(&self, blocker: &str, blocked: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocks WHERE blocker = ?1 AND blocked = ?2",
            params![blocker, blocked],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -- queue -----------------------------------------------------------

    /// Next 16-byte sort key: big-endian nanos since epoch followed by
    /// a big-endian monotonic sequence number, so lexicographic byte
    /// ordering equals enqueue ordering even within the same
    /// nanosecond.
    fn next_sort_key(&self) -> [u8; 16] {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&nanos.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }

    /// Enqueue `raw_envelope` for `recipient`. Returns `Ok(None)` if
    /// the recipient's queue is already at `cap` (queue-full signal
    /// owed to the sender), `Ok(Some(sort_key))` otherwise.
    pub fn enqueue(
        &self,
        recipient: &str,
        sender: &str,
        raw_envelope: &[u8],
        cap: u64,
    ) -> Result<Option<[u8; 16]>> {
        let conn = self.pool.get()?;

        let current: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE recipient = ?1",
            params![recipient],
            |row| row.get(0),
        )?;
        if current as u64 >= cap {
            return Ok(None);
        }

        let sort_key = self.next_sort_key();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as i64;

        conn.execute(
            "INSERT INTO queue (recipient, sort_key, sender, envelope, enqueued_at_nanos)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![recipient, sort_key.as_slice(), sender, raw_envelope, nanos],
        )?;
        Ok(Some(sort_key))
    }

    pub fn pending_count(&self, recipient: &str) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE recipient = ?1",
            params![recipient],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Iterate a recipient's queue in sort-key (enqueue) order, along
    /// with each entry's enqueue time so callers can apply the flush-
    /// path TTL check (spec.md's "(a) during flush, expired entries are
    /// skipped and not delivered").
    pub fn iter_queue(&self, recipient: &str) -> Result<Vec<QueuedEnvelope>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT sort_key, sender, envelope, enqueued_at_nanos FROM queue
             WHERE recipient = ?1 ORDER BY sort_key ASC",
        )?;
        let rows = stmt.query_map(params![recipient], |row| {
            let sort_key_vec: Vec<u8> = row.get(0)?;
            let sender: String = row.get(1)?;
            let envelope: Vec<u8> = row.get(2)?;
            let enqueued_at_nanos: i64 = row.get(3)?;
            let mut sort_key = [0u8; 16];
            if sort_key_vec.len() == 16 {
                sort_key.copy_from_slice(&sort_key_vec);
            }
            Ok(QueuedEnvelope {
                sort_key,
                sender,
                raw_envelope: envelope,
                enqueued_at_nanos: enqueued_at_nanos as u64,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn remove_from_queue(&self, recipient: &str, sort_key: &[u8; 16]) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM queue WHERE recipient = ?1 AND sort_key = ?2",
            params![recipient, sort_key.as_slice()],
        )?;
        Ok(())
    }

    /// Two-pass TTL sweep: the first pass collects expired (or
    /// corrupt — non-16-byte sort key) entries, the second deletes
    /// them, avoiding cursor skips under SQLite's iteration semantics.
    pub fn sweep_expired(&self, ttl: Duration) -> Result<u64> {
        let conn = self.pool.get()?;
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as i64;
        let ttl_nanos = ttl.as_nanos() as i64;

        let mut stmt = conn.prepare(
            "SELECT recipient, sort_key, enqueued_at_nanos FROM queue",
        )?;
        let rows = stmt.query_map([], |row| {
            let recipient: String = row.get(0)?;
            let sort_key: Vec<u8> = row.get(1)?;
            let enqueued_at_nanos: i64 = row.get(2)?;
            Ok((recipient, sort_key, enqueued_at_nanos))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (recipient, sort_key, enqueued_at_nanos) = row?;
            let is_corrupt = sort_key.len() != 16;
            let is_expired = now_nanos.saturating_sub(enqueued_at_nanos) > ttl_nanos;
            if is_corrupt || is_expired {
                expired.push((recipient, sort_key));
            }
        }

        for (recipient, sort_key) in &expired {
            conn.execute(
                "DELETE FROM queue WHERE recipient = ?1 AND sort_key = ?2",
                params![recipient, sort_key],
            )?;
        }

        Ok(expired.len() as u64)
    }
}
