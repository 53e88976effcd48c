//! Error types for the Pinch agent engine.

use thiserror::Error;

/// Result type for agent-engine operations.
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("auth handshake failed: {0}")]
    AuthFailed(String),

    #[error("not connected to relay")]
    NotConnected,

    #[error("connection not found for {0}")]
    ConnectionNotFound(String),

    #[error("connection with {peer} is not active (state: {state})")]
    ConnectionNotActive { peer: String, state: String },

    #[error("peer public key unresolved for {0}")]
    PeerKeyUnresolved(String),

    #[error("message body exceeds 280 characters")]
    MessageTooLong,

    #[error("serialized envelope exceeds the client send limit")]
    EnvelopeTooLarge,

    #[error("crypto error: {0}")]
    Crypto(#[from] pinch_crypto::CryptoError),

    #[error("envelope codec error: {0}")]
    Codec(#[from] pinch_envelope::EnvelopeError),

    #[error("address error: {0}")]
    Address(String),

    #[error("flush wait timed out")]
    FlushTimeout,

    #[error("local store error: {0}")]
    Store(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audit chain broken at entry {index}: {reason}")]
    AuditChainBroken { index: usize, reason: String },
}
