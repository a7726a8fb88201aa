use crate::domain::BroadcastId;

/// Core error type.
///
/// Adapter crates should map their specific errors into this type so callers
/// can tell operator mistakes (invalid payload) apart from infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("broadcast #{0} not found")]
    NotFound(BroadcastId),

    #[error("store error: {0}")]
    Store(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
