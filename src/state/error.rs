//! Error types for state persistence

use thiserror::Error;

/// Result type alias for state store operations
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// I/O error (file access, rename, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob could not be encoded or decoded
    #[error("state encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("state file is {size} bytes, larger than the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u32),
}
