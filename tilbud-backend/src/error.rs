use crate::format::FormatError;
use thiserror::Error;

/// Why a cache backend call failed.
///
/// The queue never surfaces these to listeners. A failed lookup is treated as
/// a miss and a failed store is logged and dropped.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The storage engine rejected the call or could not be reached.
    #[error("cache storage failed: {0}")]
    Storage(Box<dyn std::error::Error + Send>),

    /// A cached entry could not be encoded or decoded.
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl BackendError {
    /// Wraps an engine-specific error.
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + 'static,
    {
        BackendError::Storage(Box::new(error))
    }
}
