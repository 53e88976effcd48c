use std::path::Path;

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::address::PinchAddress;
use crate::error::{CryptoError, Result};

const B64: base64::engine::general_purpose::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// An agent's Ed25519 identity. The signing key is the root of trust;
/// everything else (address, X25519 encryption key) is derived from it.
pub struct Identity {
    signing_key: SigningKey,
}

/// On-disk representation, matching `PINCH_KEYPAIR_PATH`'s documented
/// JSON shape.
#[derive(Debug, Serialize, Deserialize)]
struct KeypairFile {
    version: u8,
    public_key: String,
    private_key: String,
    created_at: String,
}

impl Identity {
    /// Generate a fresh identity using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    /// The 32-byte Ed25519 seed, used as input to the X25519 secret
    /// key derivation (see [`crate::x25519`]).
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verify(pubkey: &VerifyingKey, message: &[u8], signature: &Signature) -> bool {
        pubkey.verify(message, signature).is_ok()
    }

    pub fn address(&self, host: &str) -> PinchAddress {
        PinchAddress::derive(&self.public_key_bytes(), host)
    }

    /// Load an identity from a keypair file, or generate and persist a
    /// new one if none exists yet — mirroring `PINCH_KEYPAIR_PATH`'s
    /// documented default behavior.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            Ok(identity)
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: KeypairFile = serde_json::from_str(&contents)?;

        let private_bytes = B64.decode(file.private_key.as_bytes())?;
        let private_bytes: [u8; 32] = private_bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedKey("private key is not 32 bytes".into()))?;

        let signing_key = SigningKey::from_bytes(&private_bytes);
        Ok(Self { signing_key })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = KeypairFile {
            version: 1,
            public_key: B64.encode(self.public_key_bytes()),
            private_key: B64.encode(self.signing_key.to_bytes()),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)?;
        correct_permissions(path)?;
        tracing::debug!(path = %path.display(), "wrote keypair file");
        Ok(())
    }
}

#[cfg(unix)]
fn correct_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn correct_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
