//! Connection domain types (§3) and the connection manager that
//! orchestrates the request/approve/reject/block/unblock/revoke
//! protocol (§4.4).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pinch_envelope::{
    ConnectionRequest, ConnectionResponse, ConnectionRevoke, Envelope, Payload,
};

use crate::config::CONNECTION_REQUEST_TTL;
use crate::error::{AgentError, Result};
use crate::permissions::PermissionsManifest;
use crate::store::connection_store::ConnectionStore;
use crate::transport::TransportHandle;

/// Per-connection autonomy level (§3). Defaults to `FullManual` on
/// creation; an upgrade to `FullAuto` requires an explicit
/// confirmation token (see [`ConnectionManager::set_autonomy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    FullManual,
    Notify,
    AutoRespond,
    FullAuto,
}

impl Default for AutonomyLevel {
    fn default() -> Self {
        AutonomyLevel::FullManual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Active,
    PendingOutbound,
    PendingInbound,
    Blocked,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub peer_address: String,
    /// Base64-encoded peer Ed25519 public key; empty until established.
    pub peer_pubkey: String,
    pub state: ConnectionState,
    pub nickname: Option<String>,
    pub autonomy: AutonomyLevel,
    pub auto_respond_policy: Option<String>,
    pub permissions: PermissionsManifest,
    pub muted: bool,
    /// Human intervention is active; cleared on process startup.
    pub passthrough: bool,
    pub circuit_breaker_tripped: bool,
    pub short_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Connection {
    fn new(peer_address: String, state: ConnectionState) -> Self {
        let now = Utc::now();
        Self {
            peer_address,
            peer_pubkey: String::new(),
            state,
            nickname: None,
            autonomy: AutonomyLevel::default(),
            auto_respond_policy: None,
            // New connections receive a deny-all manifest (§3).
            permissions: PermissionsManifest::deny_all(),
            muted: false,
            passthrough: false,
            circuit_breaker_tripped: false,
            short_message: None,
            created_at: now,
            last_activity_at: now,
            expires_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// Orchestrates the mutual-consent connection-establishment protocol.
/// All state writes pair with a store save (the callback-ordering
/// invariant in §5).
pub struct ConnectionManager {
    store: Arc<ConnectionStore>,
    transport: TransportHandle,
    my_address: String,
}

impl ConnectionManager {
    pub fn new(store: Arc<ConnectionStore>, transport: TransportHandle, my_address: String) -> Self {
        Self {
            store,
            transport,
            my_address,
        }
    }

    pub fn store(&self) -> &Arc<ConnectionStore> {
        &self.store
    }

    /// `sendRequest(to, message)` (§4.4).
    pub async fn send_request(&self, to: &str, message: &str) -> Result<()> {
        if message.chars().count() > 280 {
            return Err(AgentError::MessageTooLong);
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(CONNECTION_REQUEST_TTL).unwrap();
        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            Some(to.to_string()),
            None,
            None,
            Payload::ConnectionRequest(ConnectionRequest {
                from_address: self.my_address.clone(),
                to_address: to.to_string(),
                message: message.to_string(),
                sender_public_key: self.transport.local_public_key_b64(),
                expires_at: expires_at.timestamp() as u64,
            }),
        );
        self.transport.send(&envelope).await?;

        let mut conn = Connection::new(to.to_string(), ConnectionState::PendingOutbound);
        conn.short_message = Some(message.to_string());
        conn.expires_at = Some(expires_at);
        self.store.upsert(conn)?;
        info!(peer = %to, "connection request sent");
        Ok(())
    }

    /// `handleIncomingRequest`. Fires `on_request` *after* the store has
    /// been persisted; exceptions in the callback must not poison
    /// dispatch, so failures are only logged.
    pub fn handle_incoming_request(
        &self,
        request: &ConnectionRequest,
        on_request: Option<&(dyn Fn(&ConnectionRequest) + Send + Sync)>,
    ) -> Result<()> {
        let mut conn = self
            .store
            .get(&request.from_address)?
            .unwrap_or_else(|| Connection::new(request.from_address.clone(), ConnectionState::PendingInbound));
        conn.state = ConnectionState::PendingInbound;
        conn.peer_pubkey = request.sender_public_key.clone();
        conn.short_message = Some(request.message.clone());
        conn.expires_at = Some(
            DateTime::<Utc>::from_timestamp(request.expires_at as i64, 0).unwrap_or_else(Utc::now),
        );
        conn.touch();
        self.store.upsert(conn)?;

        if let Some(callback) = on_request {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(request)));
            if result.is_err() {
                warn!(peer = %request.from_address, "incoming-request callback panicked; continuing dispatch");
            }
        }
        Ok(())
    }

    /// `approveRequest(peer)`.
    pub async fn approve_request(&self, peer: &str) -> Result<()> {
        let mut conn = self.require(peer)?;
        if conn.state != ConnectionState::PendingInbound {
            return Err(AgentError::ConnectionNotActive {
                peer: peer.to_string(),
                state: format!("{:?}", conn.state),
            });
        }

        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            Some(peer.to_string()),
            None,
            None,
            Payload::ConnectionResponse(ConnectionResponse {
                from_address: self.my_address.clone(),
                to_address: peer.to_string(),
                accepted: true,
                responder_public_key: self.transport.local_public_key_b64(),
            }),
        );
        self.transport.send(&envelope).await?;

        conn.state = ConnectionState::Active;
        conn.touch();
        self.store.upsert(conn)?;
        info!(peer = %peer, "connection request approved");
        Ok(())
    }

    /// `rejectRequest(peer)`: sends nothing. Silent rejection is
    /// intentional (no retry on rejected connection requests).
    pub fn reject_request(&self, peer: &str) -> Result<()> {
        let mut conn = self.require(peer)?;
        if conn.state != ConnectionState::PendingInbound {
            return Err(AgentError::ConnectionNotActive {
                peer: peer.to_string(),
                state: format!("{:?}", conn.state),
            });
        }
        conn.state = ConnectionState::Revoked;
        conn.touch();
        self.store.upsert(conn)?;
        debug!(peer = %peer, "connection request rejected silently");
        Ok(())
    }

    /// `handleIncomingResponse`.
    pub fn handle_incoming_response(&self, response: &ConnectionResponse) -> Result<()> {
        let mut conn = self
            .store
            .get(&response.from_address)?
            .unwrap_or_else(|| Connection::new(response.from_address.clone(), ConnectionState::PendingOutbound));

        if response.accepted {
            conn.state = ConnectionState::Active;
            conn.peer_pubkey = response.responder_public_key.clone();
        } else {
            // Should never occur given silent rejection, but handled
            // defensively.
            conn.state = ConnectionState::Revoked;
        }
        conn.touch();
        self.store.upsert(conn)?;
        Ok(())
    }

    /// `blockConnection(peer)`.
    pub async fn block_connection(&self, peer: &str) -> Result<()> {
        let mut conn = self.require(peer)?;
        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            None,
            None,
            None,
            Payload::BlockNotification(pinch_envelope::BlockNotification {
                blocker: self.my_address.clone(),
                blocked: peer.to_string(),
            }),
        );
        self.transport.send(&envelope).await?;

        conn.state = ConnectionState::Blocked;
        conn.touch();
        self.store.upsert(conn)?;
        info!(peer = %peer, "connection blocked");
        Ok(())
    }

    /// `unblockConnection(peer)`.
    pub async fn unblock_connection(&self, peer: &str) -> Result<()> {
        let mut conn = self.require(peer)?;
        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            None,
            None,
            None,
            Payload::UnblockNotification(pinch_envelope::UnblockNotification {
                unblocker: self.my_address.clone(),
                unblocked: peer.to_string(),
            }),
        );
        self.transport.send(&envelope).await?;

        conn.state = ConnectionState::Active;
        conn.touch();
        self.store.upsert(conn)?;
        info!(peer = %peer, "connection unblocked");
        Ok(())
    }

    /// `revokeConnection(peer)`. After revoke, either party may
    /// initiate a fresh request.
    pub async fn revoke_connection(&self, peer: &str) -> Result<()> {
        let mut conn = self.require(peer)?;
        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            Some(peer.to_string()),
            None,
            None,
            Payload::ConnectionRevoke(ConnectionRevoke {
                from_address: self.my_address.clone(),
                to_address: peer.to_string(),
            }),
        );
        self.transport.send(&envelope).await?;

        conn.state = ConnectionState::Revoked;
        conn.touch();
        self.store.upsert(conn)?;
        info!(peer = %peer, "connection revoked");
        Ok(())
    }

    /// `handleIncomingRevoke`: unknown peer is ignored.
    pub fn handle_incoming_revoke(&self, revoke: &ConnectionRevoke) -> Result<()> {
        if let Some(mut conn) = self.store.get(&revoke.from_address)? {
            conn.state = ConnectionState::Revoked;
            conn.touch();
            self.store.upsert(conn)?;
        }
        Ok(())
    }

    /// `expirePendingRequests`: any `pending_*` past `expires_at` is
    /// marked `revoked`.
    pub fn expire_pending_requests(&self) -> Result<u64> {
        let now = Utc::now();
        let mut expired = 0;
        for mut conn in self.store.list()? {
            let is_pending = matches!(
                conn.state,
                ConnectionState::PendingOutbound | ConnectionState::PendingInbound
            );
            let is_expired = conn.expires_at.map(|e| now > e).unwrap_or(false);
            if is_pending && is_expired {
                conn.state = ConnectionState::Revoked;
                conn.touch();
                self.store.upsert(conn)?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Upgrade or downgrade a connection's autonomy level. Upgrading to
    /// `FullAuto` requires `confirmation_token == Some(true)`. Any
    /// autonomy change clears `circuit_breaker_tripped`.
    pub fn set_autonomy(
        &self,
        peer: &str,
        level: AutonomyLevel,
        confirmed: bool,
    ) -> Result<()> {
        let mut conn = self.require(peer)?;
        if level == AutonomyLevel::FullAuto && !confirmed {
            return Err(AgentError::Store(
                "upgrading to full_auto requires an explicit confirmation token".to_string(),
            ));
        }
        conn.autonomy = level;
        conn.circuit_breaker_tripped = false;
        conn.touch();
        self.store.upsert(conn)?;
        Ok(())
    }

    fn require(&self, peer: &str) -> Result<Connection> {
        self.store
            .get(peer)?
            .ok_or_else(|| AgentError::ConnectionNotFound(peer.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::inert_transport_handle;

    fn manager() -> (tempfile::TempDir, ConnectionManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConnectionStore::open(&dir.path().join("connections.json")).unwrap());
        let manager = ConnectionManager::new(store, inert_transport_handle(), "pinch:me@relay".into());
        (dir, manager)
    }

    #[tokio::test]
    async fn new_connections_default_to_full_manual() {
        let (_dir, mgr) = manager();
        mgr.send_request("pinch:bob@relay", "hi").await.unwrap();
        let conn = mgr.store().get("pinch:bob@relay").unwrap().unwrap();
        assert_eq!(conn.autonomy, AutonomyLevel::FullManual);
    }

    #[tokio::test]
    async fn full_auto_upgrade_without_confirmation_is_rejected() {
        let (_dir, mgr) = manager();
        mgr.send_request("pinch:bob@relay", "hi").await.unwrap();
        let err = mgr
            .set_autonomy("pinch:bob@relay", AutonomyLevel::FullAuto, false)
            .unwrap_err();
        assert!(matches!(err, AgentError::Store(_)));
    }

    #[tokio::test]
    async fn full_auto_upgrade_with_confirmation_succeeds() {
        let (_dir, mgr) = manager();
        mgr.send_request("pinch:bob@relay", "hi").await.unwrap();
        mgr.set_autonomy("pinch:bob@relay", AutonomyLevel::FullAuto, true)
            .unwrap();
        let conn = mgr.store().get("pinch:bob@relay").unwrap().unwrap();
        assert_eq!(conn.autonomy, AutonomyLevel::FullAuto);
    }

    #[tokio::test]
    async fn reject_sends_nothing_and_marks_revoked() {
        let (_dir, mgr) = manager();
        let request = ConnectionRequest {
            from_address: "pinch:alice@relay".to_string(),
            to_address: "pinch:me@relay".to_string(),
            message: "hi".to_string(),
            sender_public_key: "abc".to_string(),
            expires_at: (Utc::now().timestamp() + 1000) as u64,
        };
        mgr.handle_incoming_request(&request, None).unwrap();
        mgr.reject_request("pinch:alice@relay").unwrap();
        let conn = mgr.store().get("pinch:alice@relay").unwrap().unwrap();
        assert_eq!(conn.state, ConnectionState::Revoked);
        assert_eq!(mgr.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn expire_pending_requests_revokes_stale_entries() {
        let (_dir, mgr) = manager();
        let mut conn = Connection::new("pinch:bob@relay".to_string(), ConnectionState::PendingOutbound);
        conn.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        mgr.store().upsert(conn).unwrap();

        let expired = mgr.expire_pending_requests().unwrap();
        assert_eq!(expired, 1);
        let conn = mgr.store().get("pinch:bob@relay").unwrap().unwrap();
        assert_eq!(conn.state, ConnectionState::Revoked);
    }
}
