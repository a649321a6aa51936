//! The serialized delivery path.
//!
//! Every terminal outcome goes through one unbounded channel. A single
//! consumer drains it: a background task in [`DeliveryMode::Spawned`], or the
//! owner calling `deliver_pending` in [`DeliveryMode::Manual`]. Listener and
//! debugger code runs only here.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, warn};

use super::Inner;
use super::handle::RequestState;
use super::registry::Ticket;
use crate::completion::Completion;
use crate::config::DeliveryMode;
use crate::metrics;

pub(crate) struct Envelope {
    ticket: Ticket,
    completion: Completion,
    _pending: TaskTrackerToken,
}

pub(crate) struct Delivery {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Delivery {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            pump: Mutex::new(None),
        }
    }
}

impl Delivery {
    /// Hands the receiver to a background task. No-op if already done.
    pub(crate) fn spawn_pump(&self, inner: Weak<Inner>) {
        let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if pump.is_some() {
            return;
        }
        let Some(mut rx) = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };
        *pump = Some(tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.dispatch(envelope);
            }
            debug!("delivery pump stopped");
        }));
    }

    fn try_next(&self) -> Option<Envelope> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()?
            .try_recv()
            .ok()
    }
}

impl Inner {
    /// Queues a terminal outcome for delivery. Never blocks.
    pub(crate) fn deliver(&self, ticket: Ticket, completion: Completion) {
        let envelope = Envelope {
            ticket,
            completion,
            _pending: self.undelivered.token(),
        };
        if let Err(mpsc::error::SendError(envelope)) = self.delivery.tx.send(envelope) {
            warn!("delivery channel closed, delivering inline");
            self.dispatch(envelope);
        }
    }

    /// Runs debuggers and the listener for one outcome.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            ticket,
            completion,
            _pending,
        } = envelope;
        let handle = ticket.handle.clone();
        let request = ticket.request.clone();
        let listener = ticket.into_listener();

        // A caller that cancelled never sees a result.
        let completion = if handle.is_cancelled() {
            Completion::Cancelled
        } else {
            completion
        };
        let terminal = match &completion {
            Completion::Delivered(_) => RequestState::Delivered,
            Completion::Failed(_) => RequestState::Failed,
            Completion::Cancelled => RequestState::Cancelled,
        };
        if !handle.finish(terminal) {
            warn!(seq = handle.seq(), "request already settled, dropping outcome");
            return;
        }
        self.tickets.remove(&handle.seq());
        metrics::record_delivery(completion.outcome());
        debug!(seq = handle.seq(), outcome = completion.outcome(), "delivering");

        for debugger in &self.debuggers {
            let result = catch_unwind(AssertUnwindSafe(|| {
                debugger.on_delivery(&request, &completion)
            }));
            if result.is_err() {
                warn!(seq = handle.seq(), "debugger panicked in on_delivery");
            }
        }

        if catch_unwind(AssertUnwindSafe(move || listener.on_complete(completion))).is_err() {
            warn!(seq = handle.seq(), "listener panicked");
        }
    }

    /// Drains the delivery channel on the calling thread.
    ///
    /// Returns how many outcomes were delivered. Does nothing once a
    /// background pump owns the channel.
    pub(crate) fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(envelope) = self.delivery.try_next() {
            self.dispatch(envelope);
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn delivery_mode(&self) -> DeliveryMode {
        self.config.delivery
    }
}
