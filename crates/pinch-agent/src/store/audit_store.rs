//! SQLite-backed persistence for the hash-chained activity feed
//! (§3, §4.8). The chaining math lives in [`crate::audit`]; this module
//! only appends rows and reads them back in order.

use std::sync::Mutex;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::audit::{build_entry, ActivityEvent, EventType, NewEvent};
use crate::error::Result;

pub struct AuditStore {
    pool: Pool<SqliteConnectionManager>,
    /// Serializes append so `prev_hash` always reflects the true last
    /// row — SQLite's own locking isn't enough since read-then-write
    /// isn't atomic across the two statements.
    append_lock: Mutex<()>,
}

impl AuditStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::new(manager)?;
        Self::init(&pool)?;
        Ok(Self {
            pool,
            append_lock: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::new(manager)?;
        Self::init(&pool)?;
        Ok(Self {
            pool,
            append_lock: Mutex::new(()),
        })
    }

    fn init(pool: &Pool<SqliteConnectionManager>) -> Result<()> {
        let conn = pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                connection_address TEXT NOT NULL,
                event_type TEXT NOT NULL,
                action_type TEXT NOT NULL,
                message_id TEXT,
                badge TEXT,
                details TEXT,
                actor_pubkey TEXT,
                message_hash TEXT,
                timestamp TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Append one event, chaining it to the current last entry.
    pub fn append(&self, event: NewEvent) -> Result<ActivityEvent> {
        let _guard = self.append_lock.lock().unwrap();
        let conn = self.pool.get()?;

        let prev_hash: String = conn
            .query_row(
                "SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or_default();

        let entry = build_entry(event, &prev_hash);
        let details_json = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO audit_log (
                id, connection_address, event_type, action_type, message_id,
                badge, details, actor_pubkey, message_hash, timestamp,
                prev_hash, entry_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id,
                entry.connection_address,
                entry.event_type.as_str(),
                entry.action_type,
                entry.message_id,
                entry.badge,
                details_json,
                entry.actor_pubkey,
                entry.message_hash,
                entry.timestamp.to_rfc3339(),
                entry.prev_hash,
                entry.entry_hash,
            ],
        )?;

        Ok(entry)
    }

    /// The full chain in append order.
    pub fn all(&self) -> Result<Vec<ActivityEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, connection_address, event_type, action_type, message_id,
                    badge, details, actor_pubkey, message_hash, timestamp,
                    prev_hash, entry_hash
             FROM audit_log ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Events for one connection, in append order.
    pub fn for_connection(&self, connection_address: &str) -> Result<Vec<ActivityEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, connection_address, event_type, action_type, message_id,
                    badge, details, actor_pubkey, message_hash, timestamp,
                    prev_hash, entry_hash
             FROM audit_log WHERE connection_address = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![connection_address], Self::row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Export the full chain as a JSON array of snake_case rows, for
    /// handing to an auditor outside the process.
    pub fn export_json(&self) -> Result<String> {
        let events = self.all()?;
        Ok(serde_json::to_string_pretty(&events)?)
    }

    fn event_type_from_str(s: &str) -> EventType {
        match s {
            "message_received_muted" => EventType::MessageReceivedMuted,
            "message_during_intervention" => EventType::MessageDuringIntervention,
            "message_processed_autonomously" => EventType::MessageProcessedAutonomously,
            "circuit_breaker_tripped" => EventType::CircuitBreakerTripped,
            "auto_respond_decision" => EventType::AutoRespondDecision,
            "connection_requested" => EventType::ConnectionRequested,
            "connection_approved" => EventType::ConnectionApproved,
            "connection_rejected" => EventType::ConnectionRejected,
            "connection_blocked" => EventType::ConnectionBlocked,
            "connection_unblocked" => EventType::ConnectionUnblocked,
            "connection_revoked" => EventType::ConnectionRevoked,
            "permission_violation" => EventType::PermissionViolation,
            _ => EventType::Other,
        }
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<ActivityEvent> {
        let event_type: String = row.get(2)?;
        let details: Option<String> = row.get(6)?;
        let timestamp: String = row.get(9)?;
        Ok(ActivityEvent {
            id: row.get(0)?,
            connection_address: row.get(1)?,
            event_type: Self::event_type_from_str(&event_type),
            action_type: row.get(3)?,
            message_id: row.get(4)?,
            badge: row.get(5)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            actor_pubkey: row.get(7)?,
            message_hash: row.get(8)?,
            timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            prev_hash: row.get(10)?,
            entry_hash: row.get(11)?,
        })
    }
}
