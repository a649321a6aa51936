use std::sync::{Arc, Mutex};

use tilbud_core::{CacheKey, Priority, Request};
use tokio_util::sync::CancellationToken;

use super::handle::RequestHandle;
use crate::completion::Listener;

/// Position of a request in an auto-fill chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct Lineage {
    pub(crate) depth: u8,
    ancestors: Arc<Vec<CacheKey>>,
    parent: Option<CancellationToken>,
}

impl Lineage {
    /// Lineage of the children of a request at this position.
    ///
    /// Children are cancelled together with the parent's `token`.
    pub(crate) fn child(&self, parent: CacheKey, token: &CancellationToken) -> Self {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.extend(self.ancestors.iter().cloned());
        ancestors.push(parent);
        Self {
            depth: self.depth.saturating_add(1),
            ancestors: Arc::new(ancestors),
            parent: Some(token.clone()),
        }
    }

    /// Cancellation token for a new request at this position.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.parent
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token)
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.ancestors.contains(key)
    }
}

/// One caller waiting for an outcome.
pub(crate) struct Ticket {
    pub(crate) handle: RequestHandle,
    pub(crate) request: Request,
    // Taken once, on delivery.
    pub(crate) listener: Mutex<Box<dyn Listener>>,
    pub(crate) lineage: Lineage,
}

impl Ticket {
    pub(crate) fn new(
        handle: RequestHandle,
        request: Request,
        listener: Box<dyn Listener>,
        lineage: Lineage,
    ) -> Self {
        Self {
            handle,
            request,
            listener: Mutex::new(listener),
            lineage,
        }
    }

    pub(crate) fn into_listener(self) -> Box<dyn Listener> {
        self.listener.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// A unit of network work and the ordered waiters for its result.
pub(crate) struct Flight {
    /// Sequence number of the submission that created the flight.
    pub(crate) id: u64,
    pub(crate) request: Request,
    pub(crate) priority: Priority,
    pub(crate) waiters: Vec<Ticket>,
    pub(crate) running: bool,
    /// Cleared when a waiter that bypasses cache reads attaches before the
    /// flight runs.
    pub(crate) reads_cache: bool,
    pub(crate) cache_checked: bool,
    /// Cancelled when every waiter of a running flight has cancelled.
    pub(crate) cancel: CancellationToken,
}

impl Flight {
    pub(crate) fn new(ticket: Ticket) -> Self {
        Self {
            id: ticket.handle.seq(),
            request: ticket.request.clone(),
            priority: ticket.request.priority(),
            reads_cache: ticket.request.policy().reads_cache(),
            waiters: vec![ticket],
            running: false,
            cache_checked: false,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn all_cancelled(&self) -> bool {
        self.waiters.iter().all(|ticket| ticket.handle.is_cancelled())
    }

    pub(crate) fn writes_cache(&self) -> bool {
        self.waiters
            .iter()
            .any(|ticket| ticket.request.policy().writes_cache())
    }

    pub(crate) fn allows_stale(&self) -> bool {
        self.waiters
            .iter()
            .any(|ticket| ticket.request.allows_stale())
    }
}
