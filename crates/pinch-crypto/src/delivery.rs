//! Delivery confirmation signing: an Ed25519 detached signature over
//! `message_id || big-endian(8-byte timestamp)`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

fn signed_bytes(message_id: &[u8], timestamp: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message_id.len() + 8);
    buf.extend_from_slice(message_id);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf
}

/// Sign a delivery confirmation for `message_id` at `timestamp`.
pub fn sign_delivery(signing_key: &SigningKey, message_id: &[u8], timestamp: u64) -> Signature {
    signing_key.sign(&signed_bytes(message_id, timestamp))
}

/// Verify a delivery confirmation signature against the peer's
/// Ed25519 public key.
pub fn verify_delivery(
    verifying_key: &VerifyingKey,
    message_id: &[u8],
    timestamp: u64,
    signature: &Signature,
) -> bool {
    verifying_key
        .verify(&signed_bytes(message_id, timestamp), signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let message_id = b"01234567890123456789012345678901";
        let timestamp = 1_720_000_000u64;

        let sig = sign_delivery(&signing_key, message_id, timestamp);
        assert!(verify_delivery(
            &signing_key.verifying_key(),
            message_id,
            timestamp,
            &sig
        ));
    }

    #[test]
    fn wrong_timestamp_fails_verification() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let message_id = b"message-id-bytes";

        let sig = sign_delivery(&signing_key, message_id, 1000);
        assert!(!verify_delivery(
            &signing_key.verifying_key(),
            message_id,
            1001,
            &sig
        ));
    }

    #[test]
    fn wrong_message_id_fails_verification() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let sig = sign_delivery(&signing_key, b"first-id", 42);
        assert!(!verify_delivery(
            &signing_key.verifying_key(),
            b"second-id",
            42,
            &sig
        ));
    }
}
