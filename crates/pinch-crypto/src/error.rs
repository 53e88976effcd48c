use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed key material: {0}")]
    MalformedKey(String),

    #[error("keypair file error: {0}")]
    KeypairIo(#[from] std::io::Error),

    #[error("keypair file is not valid JSON: {0}")]
    KeypairFormat(#[from] serde_json::Error),

    #[error("keypair file base64 decode error: {0}")]
    KeypairEncoding(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
