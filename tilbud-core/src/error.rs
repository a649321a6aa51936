//! Failure kinds reported to listeners.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// The exchange did not complete in time.
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// The connection could not be established or was reset.
    Connect,
    /// Any other I/O failure.
    Other,
}

impl TransportKind {
    /// Short lowercase name, used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Dns => "dns",
            TransportKind::Connect => "connect",
            TransportKind::Other => "other",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of errors a request can complete with.
///
/// The error is cloneable because one failed execution is reported to every
/// caller that shared it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("transport error ({kind}): {message}")]
    Transport {
        /// What went wrong.
        kind: TransportKind,
        /// Human readable detail from the transport.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("server responded with status {status}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Raw response body, usually a JSON error document.
        body: Bytes,
    },
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The request could not be sent as described.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
    /// A mandatory auto-fill child failed.
    #[error("auto-fill child failed: {source}")]
    AutoFillChildFailed {
        /// The child's own error.
        source: Box<ApiError>,
    },
}

impl ApiError {
    /// Builds a transport error.
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        ApiError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed: transport failures and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport { .. } => true,
            ApiError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// `true` for [`ApiError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// HTTP status for server errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Transport { .. } => "transport",
            ApiError::Server { .. } => "server",
            ApiError::MalformedResponse(_) => "malformed",
            ApiError::InvalidRequest(_) => "invalid",
            ApiError::Cancelled => "cancelled",
            ApiError::AutoFillChildFailed { .. } => "autofill",
        }
    }
}
