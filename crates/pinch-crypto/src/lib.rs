mod address;
mod box_crypto;
mod delivery;
mod error;
mod identity;
mod x25519;

pub use address::PinchAddress;
pub use box_crypto::{open as box_open, seal as box_seal, NONCE_LEN};
pub use delivery::{sign_delivery, verify_delivery};
pub use error::{CryptoError, Result};
pub use identity::Identity;
pub use x25519::{public_to_x25519, secret_to_x25519};

pub use ed25519_dalek::{Signature, VerifyingKey};
