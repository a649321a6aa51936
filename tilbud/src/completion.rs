//! Terminal outcomes and the listener contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use smol_str::SmolStr;
use tilbud_core::{ApiError, Response};
use tokio::sync::oneshot;

/// Whether a reply came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from a fresh cache entry.
    Hit,
    /// Fetched from the network.
    Miss,
    /// Served from an expired entry after the network failed.
    Stale,
}

/// Where the response bytes came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// The transport.
    Upstream,
    /// A cache backend, by name.
    Backend(SmolStr),
}

/// Successful result of a request.
///
/// Waiters that shared one network execution hold the same
/// [`Arc<Response>`].
#[derive(Debug, Clone)]
pub struct Reply {
    /// Response of the request itself.
    pub response: Arc<Response>,
    /// Cache outcome.
    pub status: CacheStatus,
    /// Origin of the response.
    pub source: ResponseSource,
    /// Replies of the auto-fill children, in the order the spec produced them.
    /// Failed optional children are absent.
    pub filled: Vec<Reply>,
}

impl Reply {
    pub(crate) fn new(response: Arc<Response>, status: CacheStatus, source: ResponseSource) -> Self {
        Self {
            response,
            status,
            source,
            filled: Vec::new(),
        }
    }

    /// The response.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Returns `true` when served from a fresh or stale cache entry.
    pub fn from_cache(&self) -> bool {
        !matches!(self.status, CacheStatus::Miss)
    }
}

/// Exactly one of these reaches a listener per submitted request.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The request (and every mandatory auto-fill child) succeeded.
    Delivered(Reply),
    /// The request failed.
    Failed(ApiError),
    /// The caller cancelled, or the engine stopped before running it.
    Cancelled,
}

impl Completion {
    /// Label used in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Completion::Delivered(_) => "delivered",
            Completion::Failed(_) => "failed",
            Completion::Cancelled => "cancelled",
        }
    }

    /// The reply, if delivered.
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Completion::Delivered(reply) => Some(reply),
            _ => None,
        }
    }

    /// The error, if failed.
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Completion::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` for [`Completion::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Completion::Cancelled)
    }

    /// Converts into a `Result`, mapping cancellation to
    /// [`ApiError::Cancelled`].
    pub fn into_result(self) -> Result<Reply, ApiError> {
        match self {
            Completion::Delivered(reply) => Ok(reply),
            Completion::Failed(err) => Err(err),
            Completion::Cancelled => Err(ApiError::Cancelled),
        }
    }
}

/// Receives the terminal outcome of one request.
///
/// Called once, on the delivery path. Any `FnOnce(Completion)` closure is a
/// listener.
pub trait Listener: Send + 'static {
    /// Handles the outcome.
    fn on_complete(self: Box<Self>, completion: Completion);
}

impl<F> Listener for F
where
    F: FnOnce(Completion) + Send + 'static,
{
    fn on_complete(self: Box<Self>, completion: Completion) {
        (*self)(completion)
    }
}

/// Future side of [`RequestQueue::fetch`](crate::RequestQueue::fetch).
///
/// Resolves once the outcome passes the delivery path. If the engine is
/// dropped with the request still outstanding it resolves to
/// [`Completion::Cancelled`].
#[derive(Debug)]
pub struct Pending {
    rx: oneshot::Receiver<Completion>,
}

impl Pending {
    pub(crate) fn channel() -> (impl Listener, Pending) {
        let (tx, rx) = oneshot::channel();
        let listener = move |completion: Completion| {
            let _ = tx.send(completion);
        };
        (listener, Pending { rx })
    }
}

impl Future for Pending {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Completion::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_resolves_from_listener() {
        let (listener, pending) = Pending::channel();
        Box::new(listener).on_complete(Completion::Failed(ApiError::Cancelled));
        assert!(matches!(
            pending.await,
            Completion::Failed(ApiError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_dropped_listener_reads_as_cancelled() {
        let (listener, pending) = Pending::channel();
        drop(listener);
        assert!(pending.await.is_cancelled());
    }

    #[test]
    fn test_into_result() {
        assert_eq!(
            Completion::Cancelled.into_result().unwrap_err(),
            ApiError::Cancelled
        );
    }
}
