//! The message engine (§4.6): encrypts, sends, and persists outbound
//! messages; decrypts, persists, and confirms inbound ones; tracks
//! delivery confirmations and store-and-forward flush synchronization.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use pinch_crypto::{box_open, box_seal, public_to_x25519, secret_to_x25519, verify_delivery, Identity};
use pinch_envelope::{
    decode_plaintext, encode_plaintext, DeliveryConfirm, EncryptedPayload, Envelope, Payload,
    PlaintextPayload, QueueStatus, CLIENT_SEND_LIMIT_BYTES,
};

use crate::connection::ConnectionState;
use crate::error::{AgentError, Result};
use crate::store::connection_store::ConnectionStore;
use crate::store::message_store::{Direction, MessageRecord, MessageStore};
use crate::transport::TransportHandle;

const CONTENT_TYPE: &str = "application/x-pinch+json";

/// Decoded body carried inside a [`PlaintextPayload`] (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageBody {
    text: String,
    attribution: Option<String>,
}

/// Message priority (§3). Local bookkeeping only — never carried on
/// the wire, since the plaintext wrapper is just `{text, attribution}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl MessagePriority {
    fn as_str(self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::Urgent => "urgent",
        }
    }
}

/// An inbound message, decrypted and persisted, ready for the
/// enforcement pipeline.
pub struct IncomingMessage {
    pub message_id: Vec<u8>,
    pub from_address: String,
    pub text: String,
    pub attribution: Option<String>,
    pub sequence: u64,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Tracks a relay flush in progress (§4.6): a `QueueStatus` envelope
/// announces how many stored messages are about to arrive; each
/// arrival while flushing decrements the counter; `waitForFlush`
/// blocks until it reaches zero or a timeout elapses.
#[derive(Default)]
struct FlushTracker {
    flushing: AtomicBool,
    remaining: AtomicI64,
    notify: Notify,
}

impl FlushTracker {
    fn begin(&self, pending_count: u64) {
        self.remaining.store(pending_count as i64, Ordering::SeqCst);
        self.flushing.store(pending_count > 0, Ordering::SeqCst);
        if pending_count == 0 {
            self.notify.notify_waiters();
        }
    }

    fn on_message_delivered(&self) {
        if !self.flushing.load(Ordering::SeqCst) {
            return;
        }
        let remaining = self.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            self.flushing.store(false, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self, timeout: Duration) -> bool {
        if !self.flushing.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
            || !self.flushing.load(Ordering::SeqCst)
    }
}

pub struct MessageEngine {
    identity: Arc<Identity>,
    transport: TransportHandle,
    connections: Arc<ConnectionStore>,
    messages: Arc<MessageStore>,
    my_address: String,
    flush: FlushTracker,
}

impl MessageEngine {
    pub fn new(
        identity: Arc<Identity>,
        transport: TransportHandle,
        connections: Arc<ConnectionStore>,
        messages: Arc<MessageStore>,
        my_address: String,
    ) -> Self {
        Self {
            identity,
            transport,
            connections,
            messages,
            my_address,
            flush: FlushTracker::default(),
        }
    }

    /// `sendMessage(recipient, body, thread_id?, reply_to?, priority?,
    /// attribution?)` (§4.6). Thread id resolution: explicit `thread_id`
    /// wins; else if `reply_to` names a stored message, its thread is
    /// inherited; else the new message starts its own thread.
    pub async fn send_message(
        &self,
        to: &str,
        text: &str,
        thread_id: Option<&str>,
        reply_to: Option<&str>,
        priority: Option<MessagePriority>,
        attribution: Option<&str>,
    ) -> Result<String> {
        let connection = self
            .connections
            .get(to)?
            .ok_or_else(|| AgentError::ConnectionNotFound(to.to_string()))?;
        if connection.state != ConnectionState::Active {
            return Err(AgentError::ConnectionNotActive {
                peer: to.to_string(),
                state: format!("{:?}", connection.state),
            });
        }
        if connection.peer_pubkey.is_empty() {
            return Err(AgentError::PeerKeyUnresolved(to.to_string()));
        }

        let peer_ed25519: [u8; 32] = base64::engine::general_purpose::STANDARD
            .decode(&connection.peer_pubkey)
            .map_err(|e| AgentError::Address(e.to_string()))?
            .try_into()
            .map_err(|_| AgentError::Address("peer public key is not 32 bytes".to_string()))?;
        let peer_x25519 = public_to_x25519(&peer_ed25519)?;
        let my_x25519_secret = secret_to_x25519(&self.identity.seed_bytes());

        let sequence = self.messages.next_sequence(to)?;
        let body = MessageBody {
            text: text.to_string(),
            attribution: attribution.map(str::to_string),
        };
        let body_json = serde_json::to_vec(&body)?;

        let plaintext = PlaintextPayload {
            version: pinch_envelope::PROTOCOL_VERSION,
            sequence,
            timestamp_ms: now_ms(),
            content: body_json.clone(),
            content_type: CONTENT_TYPE.to_string(),
        };
        let plaintext_bytes = encode_plaintext(&plaintext)?;

        let (nonce, ciphertext) = box_seal(&my_x25519_secret, &peer_x25519, &plaintext_bytes)?;
        let my_x25519_public = public_to_x25519(&self.identity.public_key_bytes())?;

        let message_id = uuid::Uuid::now_v7().as_bytes().to_vec();
        let envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            Some(to.to_string()),
            Some(message_id.clone()),
            Some(now_ms()),
            Payload::Encrypted(EncryptedPayload {
                nonce,
                ciphertext,
                sender_pubkey: my_x25519_public,
            }),
        );

        // Pre-flight the size cap so an oversize send fails before any
        // state is persisted or the socket is touched.
        pinch_envelope::encode_envelope(&envelope, CLIENT_SEND_LIMIT_BYTES)
            .map_err(|_| AgentError::EnvelopeTooLarge)?;

        let message_id_hex = hex::encode(&message_id);
        let resolved_thread = match thread_id {
            Some(explicit) => explicit.to_string(),
            None => match reply_to.and_then(|r| self.messages.get(r).ok().flatten()) {
                Some(parent) => parent.thread_id,
                None => message_id_hex.clone(),
            },
        };
        let record = MessageRecord {
            id: message_id_hex.clone(),
            connection_address: to.to_string(),
            direction: Direction::Outbound,
            body: String::from_utf8_lossy(&body_json).to_string(),
            thread_id: resolved_thread,
            reply_to: reply_to.map(str::to_string),
            priority: Some(priority.unwrap_or_default().as_str().to_string()),
            sequence,
            state: "sent".to_string(),
            failure_reason: None,
            attribution: attribution.map(str::to_string),
            created_at_ms: now_ms(),
            updated_at_ms: now_ms(),
        };
        self.messages.insert(&record)?;

        self.transport.send(&envelope).await?;
        Ok(message_id_hex)
    }

    /// `handleIncomingMessage` (§4.6): decrypt, persist as `delivered`,
    /// send a signed delivery confirmation, and decrement any flush
    /// in progress.
    pub async fn handle_incoming(&self, envelope: &Envelope) -> Result<Option<IncomingMessage>> {
        let Payload::Encrypted(encrypted) = &envelope.payload else {
            return Ok(None);
        };
        let message_id = envelope
            .message_id
            .clone()
            .ok_or_else(|| AgentError::Transport("encrypted envelope missing message_id".to_string()))?;

        let my_x25519_secret = secret_to_x25519(&self.identity.seed_bytes());
        let plaintext_bytes = box_open(
            &my_x25519_secret,
            &encrypted.sender_pubkey,
            &encrypted.nonce,
            &encrypted.ciphertext,
        )?;
        let plaintext = decode_plaintext(&plaintext_bytes)?;
        let body: MessageBody = serde_json::from_slice(&plaintext.content)?;

        let message_id_hex = hex::encode(&message_id);
        let record = MessageRecord {
            id: message_id_hex.clone(),
            connection_address: envelope.from_address.clone(),
            direction: Direction::Inbound,
            body: String::from_utf8_lossy(&plaintext.content).to_string(),
            // The wire carries no thread/reply metadata (§4.1's
            // plaintext wrapper is just `{text, attribution}`), so an
            // inbound message starts its own thread.
            thread_id: message_id_hex.clone(),
            reply_to: None,
            priority: None,
            sequence: plaintext.sequence,
            state: "delivered".to_string(),
            failure_reason: None,
            attribution: body.attribution.clone(),
            created_at_ms: plaintext.timestamp_ms,
            updated_at_ms: now_ms(),
        };
        self.messages.insert(&record)?;

        let timestamp = now_ms();
        let signature = self.identity.sign(&delivery_signed_bytes(&message_id, timestamp));
        let confirm_envelope = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.my_address.clone(),
            Some(envelope.from_address.clone()),
            Some(message_id.clone()),
            Some(timestamp),
            Payload::DeliveryConfirm(DeliveryConfirm {
                message_id: message_id.clone(),
                signature: signature.to_bytes(),
                timestamp,
                state: "delivered".to_string(),
                was_stored: Some(false),
            }),
        );
        if let Err(e) = self.transport.send(&confirm_envelope).await {
            warn!(error = %e, "failed to send delivery confirmation");
        }

        self.flush.on_message_delivered();

        Ok(Some(IncomingMessage {
            message_id,
            from_address: envelope.from_address.clone(),
            text: body.text,
            attribution: body.attribution,
            sequence: plaintext.sequence,
        }))
    }

    /// `handleDeliveryConfirmation`: verifies the peer's Ed25519
    /// signature before trusting the state update; invalid signatures
    /// are logged and discarded (§4.6).
    pub fn handle_delivery_confirmation(&self, from_address: &str, confirm: &DeliveryConfirm) -> Result<()> {
        let connection = self.connections.get(from_address)?;
        let Some(connection) = connection else {
            warn!(peer = %from_address, "delivery confirmation from unknown connection, discarding");
            return Ok(());
        };
        if connection.peer_pubkey.is_empty() {
            warn!(peer = %from_address, "delivery confirmation before peer key resolved, discarding");
            return Ok(());
        }

        let peer_bytes: Vec<u8> = base64::engine::general_purpose::STANDARD
            .decode(&connection.peer_pubkey)
            .unwrap_or_default();
        let peer_array: Option<[u8; 32]> = peer_bytes.try_into().ok();
        let Some(peer_array) = peer_array else {
            warn!(peer = %from_address, "malformed stored peer key, discarding confirmation");
            return Ok(());
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&peer_array) else {
            warn!(peer = %from_address, "invalid peer key, discarding confirmation");
            return Ok(());
        };
        let Ok(signature) = ed25519_dalek::Signature::try_from(confirm.signature.as_slice()) else {
            warn!(peer = %from_address, "malformed confirmation signature, discarding");
            return Ok(());
        };

        if !verify_delivery(&verifying_key, &confirm.message_id, confirm.timestamp, &signature) {
            warn!(peer = %from_address, "delivery confirmation signature invalid, discarding");
            return Ok(());
        }

        let message_id_hex = hex::encode(&confirm.message_id);
        self.messages
            .update_state(&message_id_hex, &confirm.state, None, now_ms())?;
        debug!(message_id = %message_id_hex, state = %confirm.state, "delivery confirmed");
        Ok(())
    }

    /// Called when a `QueueStatus` envelope arrives, announcing a
    /// store-and-forward flush is starting.
    pub fn begin_flush(&self, status: &QueueStatus) {
        self.flush.begin(status.pending_count);
    }

    /// `waitForFlush(timeout)` (§4.6): blocks until the relay finishes
    /// delivering stored messages, or the timeout elapses.
    pub async fn wait_for_flush(&self, timeout: Duration) -> bool {
        self.flush.wait(timeout).await
    }
}

/// Mirrors `pinch_crypto::delivery`'s private signing layout
/// (`message_id || big-endian(8-byte timestamp)`) so a confirmation
/// can be signed through [`Identity::sign`] without exposing the raw
/// `SigningKey`.
fn delivery_signed_bytes(message_id: &[u8], timestamp: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message_id.len() + 8);
    buf.extend_from_slice(message_id);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AutonomyLevel, Connection};
    use crate::permissions::PermissionsManifest;
    use crate::transport::test_support::FakeTransport;

    struct Peer {
        _dir: tempfile::TempDir,
        identity: Arc<Identity>,
        address: String,
        connections: Arc<ConnectionStore>,
        messages: Arc<MessageStore>,
        transport: Arc<FakeTransport>,
        engine: MessageEngine,
    }

    fn peer(address: &str) -> Peer {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(Identity::generate());
        let connections = Arc::new(ConnectionStore::open(&dir.path().join("connections.json")).unwrap());
        let messages = Arc::new(MessageStore::open_in_memory().unwrap());
        let transport = FakeTransport::new();
        let engine = MessageEngine::new(
            identity.clone(),
            TransportHandle::new(transport.clone()),
            connections.clone(),
            messages.clone(),
            address.to_string(),
        );
        Peer {
            _dir: dir,
            identity,
            address: address.to_string(),
            connections,
            messages,
            transport,
            engine,
        }
    }

    fn link(a: &Peer, b: &Peer) {
        let now = Utc::now();
        let conn = Connection {
            peer_address: b.address.clone(),
            peer_pubkey: base64::engine::general_purpose::STANDARD.encode(b.identity.public_key_bytes()),
            state: ConnectionState::Active,
            nickname: None,
            autonomy: AutonomyLevel::FullManual,
            auto_respond_policy: None,
            permissions: PermissionsManifest::deny_all(),
            muted: false,
            passthrough: false,
            circuit_breaker_tripped: false,
            short_message: None,
            created_at: now,
            last_activity_at: now,
            expires_at: None,
        };
        a.connections.upsert(conn).unwrap();
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_plaintext() {
        let alice = peer("pinch:alice@relay");
        let bob = peer("pinch:bob@relay");
        link(&alice, &bob);
        link(&bob, &alice);

        alice
            .engine
            .send_message(&bob.address, "hello bob", None, None, None, Some("human"))
            .await
            .unwrap();

        let sent = alice.transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let envelope = sent[0].clone();
        drop(sent);

        let incoming = bob.engine.handle_incoming(&envelope).await.unwrap().unwrap();
        assert_eq!(incoming.text, "hello bob");
        assert_eq!(incoming.from_address, alice.address);

        // Bob's transport should now hold one DeliveryConfirm reply.
        let bob_sent = bob.transport.sent.lock().await;
        assert_eq!(bob_sent.len(), 1);
        assert!(matches!(bob_sent[0].payload, Payload::DeliveryConfirm(_)));
    }

    #[tokio::test]
    async fn delivery_confirmation_updates_message_state() {
        let alice = peer("pinch:alice@relay");
        let bob = peer("pinch:bob@relay");
        link(&alice, &bob);
        link(&bob, &alice);

        let message_id_hex = alice
            .engine
            .send_message(&bob.address, "hi", None, None, None, None)
            .await
            .unwrap();

        let envelope = alice.transport.sent.lock().await[0].clone();
        bob.engine.handle_incoming(&envelope).await.unwrap();
        let confirm_envelope = bob.transport.sent.lock().await[0].clone();
        let Payload::DeliveryConfirm(confirm) = confirm_envelope.payload else {
            panic!("expected DeliveryConfirm");
        };

        alice
            .engine
            .handle_delivery_confirmation(&bob.address, &confirm)
            .unwrap();

        let record = alice.messages.get(&message_id_hex).unwrap().unwrap();
        assert_eq!(record.state, "delivered");
    }

    #[tokio::test]
    async fn tampered_confirmation_signature_is_discarded() {
        let alice = peer("pinch:alice@relay");
        let bob = peer("pinch:bob@relay");
        link(&alice, &bob);
        link(&bob, &alice);

        let message_id_hex = alice
            .engine
            .send_message(&bob.address, "hi", None, None, None, None)
            .await
            .unwrap();

        let envelope = alice.transport.sent.lock().await[0].clone();
        bob.engine.handle_incoming(&envelope).await.unwrap();
        let confirm_envelope = bob.transport.sent.lock().await[0].clone();
        let Payload::DeliveryConfirm(mut confirm) = confirm_envelope.payload else {
            panic!("expected DeliveryConfirm");
        };
        confirm.timestamp += 1;

        alice
            .engine
            .handle_delivery_confirmation(&bob.address, &confirm)
            .unwrap();

        let record = alice.messages.get(&message_id_hex).unwrap().unwrap();
        assert_eq!(record.state, "sent");
    }

    #[tokio::test]
    async fn sending_without_an_active_connection_fails() {
        let alice = peer("pinch:alice@relay");
        let err = alice
            .engine
            .send_message("pinch:nobody@relay", "hi", None, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn flush_tracker_resolves_once_pending_count_reaches_zero() {
        let alice = peer("pinch:alice@relay");
        alice.engine.begin_flush(&QueueStatus { pending_count: 1 });
        assert!(alice.engine.flush.flushing.load(Ordering::SeqCst));

        alice.engine.flush.on_message_delivered();
        assert!(!alice.engine.flush.flushing.load(Ordering::SeqCst));

        let waited = alice.engine.wait_for_flush(Duration::from_millis(100)).await;
        assert!(waited);
    }

    #[tokio::test]
    async fn wait_for_flush_times_out_while_still_flushing() {
        let alice = peer("pinch:alice@relay");
        alice.engine.begin_flush(&QueueStatus { pending_count: 2 });
        let waited = alice.engine.wait_for_flush(Duration::from_millis(20)).await;
        assert!(!waited);
    }
}
