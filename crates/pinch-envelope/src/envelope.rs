use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Discriminant mirrored on the wire alongside the payload union so a
/// reader can dispatch before fully deserializing the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeType {
    AuthChallenge,
    AuthResponse,
    AuthResult,
    Message,
    DeliveryConfirm,
    ConnectionRequest,
    ConnectionResponse,
    ConnectionRevoke,
    BlockNotification,
    UnblockNotification,
    QueueStatus,
    QueueFull,
    RateLimited,
    Heartbeat,
}

/// The single envelope type shared by the relay and the agent engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub from_address: String,
    pub to_address: Option<String>,
    pub r#type: EnvelopeType,
    pub message_id: Option<Vec<u8>>,
    pub timestamp: Option<u64>,
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope, deriving `type` from the payload variant so
    /// the two can never drift apart at construction time.
    pub fn new(
        version: u16,
        from_address: impl Into<String>,
        to_address: Option<String>,
        message_id: Option<Vec<u8>>,
        timestamp: Option<u64>,
        payload: Payload,
    ) -> Self {
        Self {
            version,
            from_address: from_address.into(),
            to_address,
            r#type: payload.envelope_type(),
            message_id,
            timestamp,
            payload,
        }
    }
}
