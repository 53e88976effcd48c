use thiserror::Error;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope exceeds size limit: {actual} bytes > {limit} bytes")]
    TooLarge { actual: usize, limit: usize },

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] bincode::Error),

    #[error("envelope type {declared:?} does not match payload variant {actual:?}")]
    TypeMismatch {
        declared: crate::EnvelopeType,
        actual: crate::EnvelopeType,
    },
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
