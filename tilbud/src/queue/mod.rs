//! The request queue: dedup, cache, worker pool, cancellation and delivery.

mod builder;
mod chain;
mod delivery;
mod handle;
mod registry;
mod schedule;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smol_str::SmolStr;
use tilbud_backend::{Backend, BackendError, CacheBackend, DeleteStatus};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use builder::{NotSet, QueueBuilder};
pub use handle::{RequestHandle, RequestState};

use self::delivery::Delivery;
use self::handle::FlightKey;
use self::registry::{Flight, Lineage, Ticket};
use self::schedule::{Job, Schedule};
use crate::clock::Clock;
use crate::completion::{Completion, Listener, Pending};
use crate::config::{DeliveryMode, QueueConfig};
use crate::debugger::Debugger;
use crate::executor::NetworkExecutor;
use crate::metrics;
use crate::signer::Credentials;
use tilbud_core::Request;

const SETTLE_POLL: Duration = Duration::from_millis(1);

/// Shared engine state.
pub(crate) struct Inner {
    config: QueueConfig,
    executor: NetworkExecutor,
    backend: Arc<dyn Backend + Send + 'static>,
    credentials: Arc<dyn Credentials>,
    clock: Arc<dyn Clock>,
    debuggers: Vec<Arc<dyn Debugger>>,
    seq: AtomicU64,
    flights: DashMap<FlightKey, Flight>,
    tickets: DashMap<u64, RequestHandle>,
    schedule: Schedule,
    delivery: Delivery,
    tasks: TaskTracker,
    undelivered: TaskTracker,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Request dispatch engine.
///
/// Requests submitted with [`add`](Self::add) are answered from the cache
/// when possible, merged with an identical in-flight request when one
/// exists, and otherwise executed by a bounded pool of workers in priority
/// order. Every request gets exactly one terminal outcome through the
/// delivery path.
///
/// Cloning is cheap and clones drive the same engine.
///
/// ```no_run
/// use tilbud::{Completion, MockTransport, QueueConfig, RequestQueue};
/// use tilbud_backend::NullBackend;
/// use tilbud_core::Request;
///
/// # async fn run() {
/// let queue = RequestQueue::builder()
///     .transport(MockTransport::new())
///     .backend(NullBackend)
///     .config(QueueConfig::default())
///     .build();
/// queue.start();
///
/// let (_handle, pending) = queue.fetch(Request::get("/v2/catalogs").default_page());
/// match pending.await {
///     Completion::Delivered(reply) => println!("{}", reply.response().status()),
///     Completion::Failed(err) => eprintln!("{err}"),
///     Completion::Cancelled => {}
/// }
/// queue.stop().await;
/// # }
/// ```
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("executor", &self.inner.executor)
            .field("backend", &self.inner.backend.name())
            .field("in_flight", &self.inner.flights.len())
            .field("queued", &self.inner.schedule.len())
            .finish_non_exhaustive()
    }
}

impl RequestQueue {
    /// Starts building an engine.
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Submits a request; `listener` receives its outcome on the delivery
    /// path.
    ///
    /// Never blocks. Callable from any thread; outside a Tokio runtime the
    /// cache lookup is left to the worker that picks the request up. After
    /// [`stop`](Self::stop) the request is answered with
    /// [`Completion::Cancelled`].
    pub fn add<L: Listener>(&self, request: Request, listener: L) -> RequestHandle {
        self.inner
            .submit(request, Box::new(listener), Lineage::default())
    }

    /// Submits a request and returns a future of its outcome.
    pub fn fetch(&self, request: Request) -> (RequestHandle, Pending) {
        let (listener, pending) = Pending::channel();
        (self.add(request, listener), pending)
    }

    /// Cancels one request.
    ///
    /// A queued request never executes and is answered with
    /// [`Completion::Cancelled`]. A running request may finish and still
    /// populate the cache for other waiters, but its caller only ever sees
    /// `Cancelled`. Auto-fill children of the request are cancelled too.
    ///
    /// Returns `false` if the request had already settled or was cancelled.
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        self.inner.cancel(handle)
    }

    /// Cancels every outstanding request carrying `tag`. Returns how many
    /// were live when called.
    pub fn cancel_all(&self, tag: &str) -> usize {
        // Snapshot first: cancelling a parent also cancels its children.
        let handles: Vec<RequestHandle> = self
            .inner
            .tickets
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|handle| {
                handle.tag() == Some(tag) && !handle.is_cancelled() && !handle.state().is_terminal()
            })
            .collect();
        for handle in &handles {
            self.inner.cancel(handle);
        }
        debug!(tag, cancelled = handles.len(), "cancelled by tag");
        handles.len()
    }

    /// Spawns the worker pool and, in [`DeliveryMode::Spawned`], the delivery
    /// task.
    ///
    /// Requests added before `start` wait in the queue. Calling `start` on a
    /// running engine does nothing; a stopped engine can be started again.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut workers = inner.workers.lock().unwrap_or_else(|e| e.into_inner());
        if !workers.is_empty() {
            return;
        }
        inner.accepting.store(true, Ordering::SeqCst);
        inner.schedule.open();
        let count = inner.config.worker_count();
        for worker in 0..count {
            workers.push(tokio::spawn(Arc::clone(inner).work(worker)));
        }
        if inner.config.delivery == DeliveryMode::Spawned {
            inner.delivery.spawn_pump(Arc::downgrade(inner));
        }
        info!(workers = count, backend = inner.backend.name(), "request queue started");
    }

    /// Stops the engine.
    ///
    /// In order: new submissions are answered with `Cancelled`; queued
    /// requests are cancelled; running requests finish; pending auto-fill
    /// chains resolve; every outstanding outcome is delivered. When this
    /// returns, every listener of every request submitted so far has been
    /// called. In [`DeliveryMode::Manual`] the delivery channel is drained on
    /// the calling task.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.accepting.store(false, Ordering::SeqCst);
        if inner.config.delivery == DeliveryMode::Spawned {
            // Outcomes of requests added before any start still need a consumer.
            inner.delivery.spawn_pump(Arc::downgrade(inner));
        }
        for job in inner.schedule.close() {
            inner.abandon_flight(&job);
        }
        // Flights that were waiting on a submission-time cache lookup.
        let waiting: Vec<Job> = inner
            .flights
            .iter()
            .filter(|entry| !entry.running)
            .map(|entry| Job {
                priority: entry.priority,
                flight_id: entry.id,
                key: entry.key().clone(),
            })
            .collect();
        for job in &waiting {
            inner.abandon_flight(job);
        }

        let workers = std::mem::take(&mut *inner.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker ended abnormally");
            }
        }

        inner.settle_outstanding().await;
        info!("request queue stopped");
    }

    /// Drops the cached response for `request`, if any.
    ///
    /// Returns `true` when an entry was removed. Backend failures are logged
    /// and reported as `false`.
    pub async fn invalidate(&self, request: &Request) -> bool {
        let request = request.clone().resolve(&self.inner.config.base_url);
        if !request.is_cacheable() {
            return false;
        }
        let key = request.cache_key();
        match self.inner.backend.invalidate(&key).await {
            Ok(DeleteStatus::Deleted(_)) => {
                debug!(key = %key, "cache entry invalidated");
                true
            }
            Ok(DeleteStatus::Missing) => false,
            Err(err) => {
                warn!(key = %key, error = %err, "cache invalidation failed");
                false
            }
        }
    }

    /// Removes every cached response.
    pub async fn clear_cache(&self) -> Result<(), BackendError> {
        self.inner.backend.clear().await?;
        info!(backend = self.inner.backend.name(), "cache cleared");
        Ok(())
    }

    /// Delivers every outcome waiting in the channel on the calling thread.
    ///
    /// This is how listeners run in [`DeliveryMode::Manual`]. Returns the
    /// number of outcomes delivered.
    pub fn deliver_pending(&self) -> usize {
        self.inner.deliver_pending()
    }

    /// Number of distinct executions waiting or running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Number of requests without a delivered outcome.
    pub fn outstanding(&self) -> usize {
        self.inner.tickets.len()
    }

    /// Engine configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}

impl Inner {
    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(crate) fn submit(
        self: &Arc<Self>,
        request: Request,
        listener: Box<dyn Listener>,
        lineage: Lineage,
    ) -> RequestHandle {
        let request = request.resolve(&self.config.base_url);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let flight = if request.is_cacheable() {
            FlightKey::Shared(request.cache_key())
        } else {
            FlightKey::Exclusive(seq)
        };
        let handle = RequestHandle::new(
            seq,
            flight,
            request.tag().map(SmolStr::new),
            lineage.cancel_token(),
        );
        self.tickets.insert(seq, handle.clone());
        debug!(seq, method = %request.method(), url = %request.url(), "request added");

        let ticket = Ticket::new(handle.clone(), request, listener, lineage);
        if self.is_accepting() {
            self.enqueue(ticket);
        } else {
            debug!(seq, "engine stopped, cancelling request");
            self.deliver(ticket, Completion::Cancelled);
        }
        handle
    }

    /// Attaches `ticket` to its in-flight execution or starts a new one.
    fn enqueue(self: &Arc<Self>, ticket: Ticket) {
        enum Next {
            Lookup(Job),
            Schedule(Job),
        }

        let key = ticket.handle.flight().clone();
        let next = match self.flights.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let flight = entry.get_mut();
                metrics::record_dedup();
                debug!(
                    seq = ticket.handle.seq(),
                    flight = flight.id,
                    "attached to in-flight request"
                );
                if flight.running {
                    ticket.handle.mark_running();
                } else if flight.reads_cache && !ticket.request.policy().reads_cache() {
                    // A pending submission-time lookup must not answer this waiter.
                    flight.reads_cache = false;
                }
                let promote = !flight.running && ticket.request.priority() > flight.priority;
                if promote {
                    flight.priority = ticket.request.priority();
                }
                flight.waiters.push(ticket);
                promote.then(|| {
                    Next::Schedule(Job {
                        priority: flight.priority,
                        flight_id: flight.id,
                        key: key.clone(),
                    })
                })
            }
            Entry::Vacant(entry) => {
                let flight = Flight::new(ticket);
                let job = Job {
                    priority: flight.priority,
                    flight_id: flight.id,
                    key: key.clone(),
                };
                let reads_cache = flight.reads_cache;
                entry.insert(flight);
                Some(if reads_cache {
                    Next::Lookup(job)
                } else {
                    Next::Schedule(job)
                })
            }
        };

        match next {
            Some(Next::Lookup(job)) => self.spawn_lookup(job),
            Some(Next::Schedule(job)) => self.schedule_job(job),
            None => {}
        }
    }

    fn cancel(&self, handle: &RequestHandle) -> bool {
        if handle.state().is_terminal() || handle.is_cancelled() {
            return false;
        }
        handle.cancel_token().cancel();
        self.withdraw(handle);
        true
    }

    /// Detaches a cancelled request from its flight.
    ///
    /// A queued request is answered with `Cancelled` at once; a running flight
    /// is aborted once none of its waiters wants the result.
    pub(crate) fn withdraw(&self, handle: &RequestHandle) {
        let removed = {
            let Some(mut flight) = self.flights.get_mut(handle.flight()) else {
                return;
            };
            let Some(position) = flight
                .waiters
                .iter()
                .position(|ticket| ticket.handle.seq() == handle.seq())
            else {
                return;
            };
            if flight.running {
                if flight.all_cancelled() {
                    debug!(flight = flight.id, "every waiter cancelled, aborting execution");
                    flight.cancel.cancel();
                }
                None
            } else {
                Some(flight.waiters.remove(position))
            }
        };

        if let Some(ticket) = removed {
            self.flights.remove_if(handle.flight(), |_, flight| {
                !flight.running && flight.waiters.is_empty()
            });
            debug!(seq = handle.seq(), "cancelled while queued");
            self.deliver(ticket, Completion::Cancelled);
        }
    }

    async fn settle_outstanding(&self) {
        self.tasks.close();
        self.undelivered.close();
        loop {
            if self.delivery_mode() == DeliveryMode::Manual {
                self.deliver_pending();
            }
            if self.tasks.is_empty() && self.undelivered.is_empty() {
                break;
            }
            match self.delivery_mode() {
                DeliveryMode::Manual => tokio::time::sleep(SETTLE_POLL).await,
                DeliveryMode::Spawned => {
                    self.tasks.wait().await;
                    self.undelivered.wait().await;
                }
            }
        }
        self.tasks.reopen();
        self.undelivered.reopen();
    }
}
