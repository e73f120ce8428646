use thiserror::Error;

/// Crate-wide error type. One variant per failure domain, following the
/// shape of a typical bot-workspace error enum: each leaf wraps the
/// underlying library error via `#[from]` where a clean conversion exists.
#[derive(Debug, Error)]
pub enum MeshMiniError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeshMiniError>;
