//! Wire schema for the Pinch agent-to-agent messaging protocol.
//!
//! A single versioned [`Envelope`] carries a tagged [`Payload`] union.
//! This crate has no I/O and no cryptography: it only knows how to
//! describe and (de)serialize the wire format shared by the relay and
//! the agent engine.

mod auth;
mod codec;
mod envelope;
mod error;
mod limits;
mod payload;

pub use auth::build_auth_message;
pub use codec::{decode_envelope, decode_plaintext, encode_envelope, encode_plaintext};
pub use envelope::{Envelope, EnvelopeType};
pub use error::EnvelopeError;
pub use limits::{CLIENT_SEND_LIMIT_BYTES, RELAY_READ_LIMIT_BYTES};
pub use payload::{
    AuthChallenge, AuthResponse, AuthResult, BlockNotification, ConnectionRequest,
    ConnectionResponse, ConnectionRevoke, DeliveryConfirm, EncryptedPayload, Payload,
    PlaintextPayload, QueueFull, QueueStatus, RateLimited, UnblockNotification,
};

/// Current wire version understood by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;
