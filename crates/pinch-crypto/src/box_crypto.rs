//! NaCl box (X25519 key agreement + XSalsa20-Poly1305) message
//! encryption, via `crypto_box`.

use crypto_box::aead::{generic_array::GenericArray, Aead, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};

use crate::error::{CryptoError, Result};

pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` to `recipient_pubkey` using `sender_secret`.
/// Returns `(nonce, ciphertext)`; the wire format is `nonce || ciphertext`
/// (callers assemble that themselves so the nonce can also ride
/// alongside in an `EncryptedPayload` struct field).
pub fn seal(
    sender_secret: &[u8; 32],
    recipient_pubkey: &[u8; 32],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let secret = SecretKey::from(*sender_secret);
    let public = PublicKey::from(*recipient_pubkey);
    let cipher = SalsaBox::new(&public, &secret);

    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok((nonce_bytes, ciphertext))
}

/// Decrypt a box sealed by [`seal`].
pub fn open(
    recipient_secret: &[u8; 32],
    sender_pubkey: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let secret = SecretKey::from(*recipient_secret);
    let public = PublicKey::from(*sender_pubkey);
    let cipher = SalsaBox::new(&public, &secret);

    let nonce = GenericArray::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open_round_trip() {
        let alice_secret = [1u8; 32];
        let alice_secret_key = SecretKey::from(alice_secret);
        let alice_public = *alice_secret_key.public_key().as_bytes();

        let bob_secret = [2u8; 32];
        let bob_secret_key = SecretKey::from(bob_secret);
        let bob_public = *bob_secret_key.public_key().as_bytes();

        let plaintext = b"hello bob, this is alice";
        let (nonce, ciphertext) = seal(&alice_secret, &bob_public, plaintext).unwrap();

        let recovered = open(&bob_secret, &alice_public, &nonce, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let alice_secret = [3u8; 32];
        let alice_secret_key = SecretKey::from(alice_secret);
        let alice_public = *alice_secret_key.public_key().as_bytes();

        let bob_secret = [4u8; 32];
        let bob_secret_key = SecretKey::from(bob_secret);
        let bob_public = *bob_secret_key.public_key().as_bytes();

        let (nonce, mut ciphertext) = seal(&alice_secret, &bob_public, b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        assert!(open(&bob_secret, &alice_public, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn fresh_nonce_per_call() {
        let alice_secret = [5u8; 32];
        let alice_secret_key = SecretKey::from(alice_secret);
        let bob_public = *SecretKey::from([6u8; 32]).public_key().as_bytes();
        let _ = &alice_secret_key;

        let (nonce_a, _) = seal(&alice_secret, &bob_public, b"msg one").unwrap();
        let (nonce_b, _) = seal(&alice_secret, &bob_public, b"msg two").unwrap();
        assert_ne!(nonce_a, nonce_b);
    }
}
