use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};

const CHECKSUM_LEN: usize = 4;

/// A parsed, validated `pinch:<base58(pubkey||checksum)>@<host>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinchAddress {
    pub pubkey: [u8; 32],
    pub host: String,
}

impl PinchAddress {
    /// Derive the address for a given pubkey and relay host.
    pub fn derive(pubkey: &[u8; 32], host: &str) -> Self {
        Self {
            pubkey: *pubkey,
            host: host.to_string(),
        }
    }

    /// Render as `pinch:<base58>@<host>`.
    pub fn to_string_repr(&self) -> String {
        format!("pinch:{}@{}", encode_payload(&self.pubkey), self.host)
    }

    /// Parse and validate the checksum embedded in the address.
    pub fn parse(address: &str) -> Result<Self> {
        let rest = address
            .strip_prefix("pinch:")
            .ok_or_else(|| CryptoError::InvalidAddress("missing pinch: prefix".into()))?;

        let (b58_part, host) = rest
            .split_once('@')
            .ok_or_else(|| CryptoError::InvalidAddress("missing @host".into()))?;
        if host.is_empty() {
            return Err(CryptoError::InvalidAddress("empty host".into()));
        }

        let decoded = bs58::decode(b58_part)
            .into_vec()
            .map_err(|e| CryptoError::InvalidAddress(format!("bad base58: {e}")))?;
        if decoded.len() != 32 + CHECKSUM_LEN {
            return Err(CryptoError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                32 + CHECKSUM_LEN,
                decoded.len()
            )));
        }

        let (pubkey_bytes, checksum) = decoded.split_at(32);
        let expected = checksum_of(pubkey_bytes);
        if checksum != expected {
            return Err(CryptoError::InvalidAddress("checksum mismatch".into()));
        }

        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(pubkey_bytes);

        Ok(Self {
            pubkey,
            host: host.to_string(),
        })
    }
}

fn checksum_of(pubkey: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(pubkey);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn encode_payload(pubkey: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(32 + CHECKSUM_LEN);
    payload.extend_from_slice(pubkey);
    payload.extend_from_slice(&checksum_of(pubkey));
    bs58::encode(payload).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string_form() {
        let pubkey = [7u8; 32];
        let addr = PinchAddress::derive(&pubkey, "relay.example.com");
        let rendered = addr.to_string_repr();
        let parsed = PinchAddress::parse(&rendered).unwrap();
        assert_eq!(parsed.pubkey, pubkey);
        assert_eq!(parsed.host, "relay.example.com");
    }

    #[test]
    fn rejects_tampered_checksum() {
        let pubkey = [9u8; 32];
        let addr = PinchAddress::derive(&pubkey, "relay.example.com");
        let mut rendered = addr.to_string_repr();
        // Flip the last base58 character before the '@'.
        let at = rendered.find('@').unwrap();
        let last_char_idx = rendered[..at].char_indices().last().unwrap().0;
        let replacement = if &rendered[last_char_idx..at] == "1" { "2" } else { "1" };
        rendered.replace_range(last_char_idx..at, replacement);
        assert!(PinchAddress::parse(&rendered).is_err());
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(PinchAddress::parse("notpinch:abc@host").is_err());
    }

    #[test]
    fn rejects_missing_host() {
        let pubkey = [1u8; 32];
        let addr = PinchAddress::derive(&pubkey, "host");
        let rendered = addr.to_string_repr();
        let (b58_only, _) = rendered.trim_start_matches("pinch:").split_once('@').unwrap();
        assert!(PinchAddress::parse(&format!("pinch:{b58_only}")).is_err());
    }
}
