use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeType;

/// The tagged payload union. Exactly one variant is set per envelope;
/// the outer [`crate::Envelope::r#type`] field names which one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    AuthChallenge(AuthChallenge),
    AuthResponse(AuthResponse),
    AuthResult(AuthResult),
    /// Carries an encrypted `MESSAGE` or wraps a `DELIVERY_CONFIRM`'s
    /// own envelope is sent in the clear (the confirmation itself is
    /// signed, not boxed) — see [`DeliveryConfirm`].
    Encrypted(EncryptedPayload),
    DeliveryConfirm(DeliveryConfirm),
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    ConnectionRevoke(ConnectionRevoke),
    BlockNotification(BlockNotification),
    UnblockNotification(UnblockNotification),
    QueueStatus(QueueStatus),
    QueueFull(QueueFull),
    RateLimited(RateLimited),
    Heartbeat,
}

impl Payload {
    /// The envelope type this payload variant corresponds to.
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Payload::AuthChallenge(_) => EnvelopeType::AuthChallenge,
            Payload::AuthResponse(_) => EnvelopeType::AuthResponse,
            Payload::AuthResult(_) => EnvelopeType::AuthResult,
            Payload::Encrypted(_) => EnvelopeType::Message,
            Payload::DeliveryConfirm(_) => EnvelopeType::DeliveryConfirm,
            Payload::ConnectionRequest(_) => EnvelopeType::ConnectionRequest,
            Payload::ConnectionResponse(_) => EnvelopeType::ConnectionResponse,
            Payload::ConnectionRevoke(_) => EnvelopeType::ConnectionRevoke,
            Payload::BlockNotification(_) => EnvelopeType::BlockNotification,
            Payload::UnblockNotification(_) => EnvelopeType::UnblockNotification,
            Payload::QueueStatus(_) => EnvelopeType::QueueStatus,
            Payload::QueueFull(_) => EnvelopeType::QueueFull,
            Payload::RateLimited(_) => EnvelopeType::RateLimited,
            Payload::Heartbeat => EnvelopeType::Heartbeat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub version: u16,
    pub nonce: [u8; 32],
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub relay_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub version: u16,
    pub pubkey: [u8; 32],
    pub signature: [u8; 64],
    pub nonce_echo: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub assigned_address: Option<String>,
}

/// A NaCl-box ciphertext. Wire layout is `nonce || ciphertext`; the
/// sender's X25519 public key rides alongside so the recipient can
/// perform key agreement without a separate lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
    pub sender_pubkey: [u8; 32],
}

/// Lives only inside a decrypted [`EncryptedPayload`]; never appears
/// on the wire unencrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaintextPayload {
    pub version: u16,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfirm {
    pub message_id: Vec<u8>,
    pub signature: [u8; 64],
    pub timestamp: u64,
    pub state: String,
    pub was_stored: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub from_address: String,
    pub to_address: String,
    pub message: String,
    pub sender_public_key: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub from_address: String,
    pub to_address: String,
    pub accepted: bool,
    pub responder_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRevoke {
    pub from_address: String,
    pub to_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockNotification {
    pub blocker: String,
    pub blocked: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnblockNotification {
    pub unblocker: String,
    pub unblocked: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFull {
    pub recipient_address: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimited {
    pub retry_after_ms: u64,
    pub reason: String,
}
