//! The signed message both sides of the auth handshake build:
//! `"pinch-auth-v1" || 0x00 || host || 0x00 || nonce`.

/// Build the byte string that the client signs (with its Ed25519 key)
/// and the relay verifies during the auth handshake.
pub fn build_auth_message(host: &str, nonce: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(b"pinch-auth-v1".len() + 1 + host.len() + 1 + nonce.len());
    buf.extend_from_slice(b"pinch-auth-v1");
    buf.push(0);
    buf.extend_from_slice(host.as_bytes());
    buf.push(0);
    buf.extend_from_slice(nonce);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_host_and_nonce_with_null_separators() {
        let msg = build_auth_message("localhost", &[1, 2, 3]);
        assert_eq!(msg, b"pinch-auth-v1\0localhost\0\x01\x02\x03");
    }
}
