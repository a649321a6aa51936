//! Outbound HTTP boundary.
//!
//! A [`Transport`] turns one fully prepared [`Exchange`] into a [`Response`]
//! or a [`TransportError`]. It knows nothing about caching, retries or
//! signing; non-2xx statuses are returned as responses, not errors.

use async_trait::async_trait;
use bytes::Bytes;
use smol_str::SmolStr;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{ApiError, TransportKind};
use crate::request::Method;
use crate::response::Response;

/// A ready-to-send HTTP exchange: absolute URL with query, final headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Headers, signature headers included.
    pub headers: Vec<(SmolStr, String)>,
    /// Body for methods that carry one.
    pub body: Option<Bytes>,
}

impl Exchange {
    /// First header value with a case-insensitive name match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// URL path without scheme, host and query.
    pub fn path(&self) -> &str {
        let without_query = self.url.split('?').next().unwrap_or_default();
        match without_query.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("/", |idx| &rest[idx..]),
            None => without_query,
        }
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }
}

/// A transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportKind,
    /// Detail from the underlying client.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        TransportError {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Transport {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Performs HTTP exchanges.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the exchange and returns whatever the server answered.
    async fn send(&self, exchange: Exchange) -> Result<Response, TransportError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "transport"
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, exchange: Exchange) -> Result<Response, TransportError> {
        self.as_ref().send(exchange).await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, exchange: Exchange) -> Result<Response, TransportError> {
        self.as_ref().send(exchange).await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}
