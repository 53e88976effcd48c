use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("durable store error: {0}")]
    Store(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("envelope codec error: {0}")]
    Codec(#[from] pinch_envelope::EnvelopeError),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
