//! The hash-chained activity feed (§3, §4.8). One append-only log per
//! agent backs the activity view, muted/passthrough/autonomous-badge
//! records, circuit-breaker trips and auto-respond decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageReceivedMuted,
    MessageDuringIntervention,
    MessageProcessedAutonomously,
    CircuitBreakerTripped,
    AutoRespondDecision,
    ConnectionRequested,
    ConnectionApproved,
    ConnectionRejected,
    ConnectionBlocked,
    ConnectionUnblocked,
    ConnectionRevoked,
    PermissionViolation,
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::MessageReceivedMuted => "message_received_muted",
            EventType::MessageDuringIntervention => "message_during_intervention",
            EventType::MessageProcessedAutonomously => "message_processed_autonomously",
            EventType::CircuitBreakerTripped => "circuit_breaker_tripped",
            EventType::AutoRespondDecision => "auto_respond_decision",
            EventType::ConnectionRequested => "connection_requested",
            EventType::ConnectionApproved => "connection_approved",
            EventType::ConnectionRejected => "connection_rejected",
            EventType::ConnectionBlocked => "connection_blocked",
            EventType::ConnectionUnblocked => "connection_unblocked",
            EventType::ConnectionRevoked => "connection_revoked",
            EventType::PermissionViolation => "permission_violation",
            EventType::Other => "other",
        }
    }
}

/// A single append-only audit entry (§3). `entry_hash` chains to
/// `prev_hash`; the genesis entry's `prev_hash` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub connection_address: String,
    pub event_type: EventType,
    pub action_type: String,
    pub message_id: Option<String>,
    pub badge: Option<String>,
    pub details: Option<serde_json::Value>,
    pub actor_pubkey: Option<String>,
    pub message_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Fields a caller supplies when appending a new event; `id`,
/// `timestamp`, `prev_hash` and `entry_hash` are computed by the audit
/// log itself.
pub struct NewEvent {
    pub connection_address: String,
    pub event_type: EventType,
    pub action_type: Option<String>,
    pub message_id: Option<String>,
    pub badge: Option<String>,
    pub details: Option<serde_json::Value>,
    pub actor_pubkey: Option<String>,
    pub message_hash: Option<String>,
}

impl NewEvent {
    pub fn new(connection_address: impl Into<String>, event_type: EventType) -> Self {
        Self {
            connection_address: connection_address.into(),
            event_type,
            action_type: None,
            message_id: None,
            badge: None,
            details: None,
            actor_pubkey: None,
            message_hash: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// `entry_hash = SHA-256(id | iso_timestamp | actor_pubkey |
/// action_type | connection_address | message_hash | prev_hash)`,
/// `|` a canonical delimiter between the seven fields (§3).
fn compute_entry_hash(
    id: &str,
    timestamp: &DateTime<Utc>,
    actor_pubkey: &str,
    action_type: &str,
    connection_address: &str,
    message_hash: &str,
    prev_hash: &str,
) -> String {
    let canonical = format!(
        "{id}|{}|{actor_pubkey}|{action_type}|{connection_address}|{message_hash}|{prev_hash}",
        timestamp.to_rfc3339(),
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Build the next entry in the chain given the previous entry's hash
/// (empty string for the genesis entry).
pub fn build_entry(event: NewEvent, prev_hash: &str) -> ActivityEvent {
    let id = uuid::Uuid::now_v7().to_string();
    let timestamp = Utc::now();
    let action_type = event
        .action_type
        .unwrap_or_else(|| event.event_type.as_str().to_string());
    let actor_pubkey = event.actor_pubkey.clone().unwrap_or_default();
    let message_hash = event.message_hash.clone().unwrap_or_default();

    let entry_hash = compute_entry_hash(
        &id,
        &timestamp,
        &actor_pubkey,
        &action_type,
        &event.connection_address,
        &message_hash,
        prev_hash,
    );

    ActivityEvent {
        id,
        connection_address: event.connection_address,
        event_type: event.event_type,
        action_type,
        message_id: event.message_id,
        badge: event.badge,
        details: event.details,
        actor_pubkey: event.actor_pubkey,
        message_hash: event.message_hash,
        timestamp,
        prev_hash: prev_hash.to_string(),
        entry_hash,
    }
}

/// Verify a full or partial chain. Partial-chain verification may
/// begin at any entry — the first entry's own `prev_hash` is taken on
/// faith (it links to whatever came before the slice), but every
/// entry's `entry_hash` is always recomputed and every subsequent
/// `prev_hash` linkage is checked.
pub fn verify_chain(entries: &[ActivityEvent]) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        let recomputed = compute_entry_hash(
            &entry.id,
            &entry.timestamp,
            entry.actor_pubkey.as_deref().unwrap_or(""),
            &entry.action_type,
            &entry.connection_address,
            entry.message_hash.as_deref().unwrap_or(""),
            &entry.prev_hash,
        );
        if recomputed != entry.entry_hash {
            return Err(AgentError::AuditChainBroken {
                index,
                reason: "entry_hash does not match recomputed hash".to_string(),
            });
        }

        if index > 0 && entry.prev_hash != entries[index - 1].entry_hash {
            return Err(AgentError::AuditChainBroken {
                index,
                reason: "prev_hash does not match the preceding entry's entry_hash".to_string(),
            });
        }
    }
    Ok(())
}
