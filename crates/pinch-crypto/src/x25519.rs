//! Ed25519 -> X25519 conversion via the standard Montgomery
//! transformation (`curve25519-dalek`'s `EdwardsPoint::to_montgomery`
//! for public keys, SHA-512-of-seed clamped for secret keys).

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};

use crate::error::{CryptoError, Result};

/// Convert an Ed25519 public key to its X25519 (Montgomery) form.
pub fn public_to_x25519(ed25519_pubkey: &[u8; 32]) -> Result<[u8; 32]> {
    let compressed = CompressedEdwardsY(*ed25519_pubkey);
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::MalformedKey("not a valid Edwards point".into()))?;
    Ok(point.to_montgomery().to_bytes())
}

/// Convert an Ed25519 signing key's 32-byte seed to an X25519 secret
/// key. Returns the raw SHA-512 digest's first half, unclamped —
/// clamping happens later, incidentally, when `crypto_box::SecretKey`
/// wraps these bytes for Diffie-Hellman.
pub fn secret_to_x25519(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(ed25519_seed);
    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&digest[..32]);
    scalar_bytes
}
