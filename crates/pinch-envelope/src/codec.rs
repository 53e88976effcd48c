use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};
use crate::payload::PlaintextPayload;

/// Encode an envelope, rejecting anything over `limit` bytes without
/// allocating more than necessary for the check.
fn encode_checked<T: serde::Serialize>(value: &T, limit: usize) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(value)?;
    if bytes.len() > limit {
        return Err(EnvelopeError::TooLarge {
            actual: bytes.len(),
            limit,
        });
    }
    Ok(bytes)
}

/// Encode an envelope for sending, enforcing `limit` (the caller picks
/// the relay's 64 KB cap or the client's 60 KB cap).
pub fn encode_envelope(envelope: &Envelope, limit: usize) -> Result<Vec<u8>> {
    if envelope.r#type != envelope.payload.envelope_type() {
        return Err(EnvelopeError::TypeMismatch {
            declared: envelope.r#type,
            actual: envelope.payload.envelope_type(),
        });
    }
    encode_checked(envelope, limit)
}

/// Decode a raw frame into an envelope. Callers enforce the size cap
/// on the raw bytes *before* calling this (the relay never even reads
/// past its cap), so no limit is applied here.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.r#type != envelope.payload.envelope_type() {
        return Err(EnvelopeError::TypeMismatch {
            declared: envelope.r#type,
            actual: envelope.payload.envelope_type(),
        });
    }
    Ok(envelope)
}

/// Encode the plaintext payload that lives inside a NaCl box, prior to
/// encryption.
pub fn encode_plaintext(payload: &PlaintextPayload) -> Result<Vec<u8>> {
    Ok(bincode::serialize(payload)?)
}

/// Decode the plaintext payload recovered after opening a NaCl box.
pub fn decode_plaintext(bytes: &[u8]) -> Result<PlaintextPayload> {
    Ok(bincode::deserialize(bytes)?)
}
