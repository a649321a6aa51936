//! Observability taps on the request pipeline.

use std::sync::Arc;

use tilbud_core::Request;
use tracing::debug;

use crate::completion::Completion;

/// Read-only observer of request lifecycle events.
///
/// Each registered debugger sees every event exactly once per request.
/// Implementations must not block. Panics are caught and logged.
pub trait Debugger: Send + Sync {
    /// The request left the worker pool (or was answered from cache), before
    /// any auto-fill children run.
    fn on_finish(&self, request: &Request) {
        let _ = request;
    }

    /// The outcome reached the delivery path, right before the listener runs.
    fn on_delivery(&self, request: &Request, completion: &Completion) {
        let _ = (request, completion);
    }
}

impl<T: Debugger + ?Sized> Debugger for Arc<T> {
    fn on_finish(&self, request: &Request) {
        self.as_ref().on_finish(request)
    }

    fn on_delivery(&self, request: &Request, completion: &Completion) {
        self.as_ref().on_delivery(request, completion)
    }
}

/// Logs `METHOD url?query` for every delivery at `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDebugger;

impl Debugger for LogDebugger {
    fn on_delivery(&self, request: &Request, completion: &Completion) {
        debug!(
            target: "tilbud::debugger",
            outcome = completion.outcome(),
            "{} {}",
            request.method(),
            request.url_with_query()
        );
    }
}
