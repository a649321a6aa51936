use bincode::error::{DecodeError, EncodeError};
use feoxdb::FeoxError;
use thiserror::Error;

/// Errors that can occur when using [`FeOxDbBackend`](crate::FeOxDbBackend).
#[derive(Debug, Error)]
pub enum FeOxDbError {
    /// An error from the underlying FeOxDB database.
    #[error("FeOxDB error: {0}")]
    FeOxDb(#[from] FeoxError),

    /// Failed to serialize a cache entry.
    #[error("Serialization error: {0}")]
    Serialization(#[from] EncodeError),

    /// Failed to deserialize a cache entry.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DecodeError),

    /// The stored cache generation marker is unreadable.
    #[error("Corrupt generation marker ({0} bytes)")]
    CorruptGeneration(usize),
}
