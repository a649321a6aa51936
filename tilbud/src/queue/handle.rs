use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use smol_str::SmolStr;
use tilbud_core::CacheKey;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a submitted request.
///
/// `Queued -> Running -> {Delivered, Failed, Cancelled}`; a request may also
/// go straight from `Queued` to a terminal state (cache hit, cancellation).
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestState {
    /// Waiting for a cache answer or a worker.
    Queued = 0,
    /// A worker is executing the request (or the execution it shares).
    Running = 1,
    /// The listener received a reply.
    Delivered = 2,
    /// The listener received an error.
    Failed = 3,
    /// The listener was told the request was cancelled.
    Cancelled = 4,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::Queued,
            1 => RequestState::Running,
            2 => RequestState::Delivered,
            3 => RequestState::Failed,
            _ => RequestState::Cancelled,
        }
    }

    /// Returns `true` for `Delivered`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Delivered | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// Identity of one unit of network work.
///
/// Cacheable requests with equal keys share a flight whatever their cache
/// policy; everything else runs alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FlightKey {
    Shared(CacheKey),
    Exclusive(u64),
}

impl FlightKey {
    pub(crate) fn cache_key(&self) -> Option<&CacheKey> {
        match self {
            FlightKey::Shared(key) => Some(key),
            FlightKey::Exclusive(_) => None,
        }
    }
}

struct HandleInner {
    seq: u64,
    flight: FlightKey,
    tag: Option<SmolStr>,
    cancel: CancellationToken,
    state: AtomicU8,
}

/// Caller's reference to a submitted request.
///
/// Clones refer to the same request.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("seq", &self.inner.seq)
            .field("tag", &self.inner.tag)
            .field("state", &self.state())
            .finish()
    }
}

impl RequestHandle {
    pub(crate) fn new(
        seq: u64,
        flight: FlightKey,
        tag: Option<SmolStr>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                seq,
                flight,
                tag,
                cancel,
                state: AtomicU8::new(RequestState::Queued as u8),
            }),
        }
    }

    /// Sequence number assigned at submission; lower runs first among equal
    /// priorities.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// Grouping tag copied from the request.
    pub fn tag(&self) -> Option<&str> {
        self.inner.tag.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn flight(&self) -> &FlightKey {
        &self.inner.flight
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn mark_running(&self) {
        let _ = self.inner.state.compare_exchange(
            RequestState::Queued as u8,
            RequestState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Moves into `terminal` unless a terminal state was already reached.
    pub(crate) fn finish(&self, terminal: RequestState) -> bool {
        debug_assert!(terminal.is_terminal());
        self.inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (!RequestState::from_u8(current).is_terminal()).then_some(terminal as u8)
            })
            .is_ok()
    }
}
