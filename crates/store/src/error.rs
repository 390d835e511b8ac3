use thiserror::Error;

/// Errors that may occur while reading or writing persisted engine state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The byte-store backend failed.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A persisted record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
