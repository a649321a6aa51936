use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use smol_str::SmolStr;
use tilbud_backend::CacheBackend;
use tilbud_core::{ApiError, CacheKey, CacheValue, Request, Response};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::Inner;
use super::handle::FlightKey;
use super::registry::Ticket;
use super::schedule::Job;
use crate::completion::{CacheStatus, Completion, Reply, ResponseSource};
use crate::metrics;

/// What a worker needs from a flight it claimed.
struct Claim {
    request: Request,
    reads_cache: bool,
    cache_checked: bool,
    writes_cache: bool,
    allows_stale: bool,
    cancel: CancellationToken,
}

impl Inner {
    pub(crate) async fn work(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker started");
        while let Some(job) = self.schedule.pop().await {
            self.run_flight(job).await;
        }
        debug!(worker, "worker stopped");
    }

    async fn run_flight(self: &Arc<Self>, job: Job) {
        let claim = {
            let Some(mut flight) = self.flights.get_mut(&job.key) else {
                return;
            };
            // Superseded by a higher-priority job or already finished.
            if flight.id != job.flight_id || flight.running {
                return;
            }
            if flight.all_cancelled() {
                None
            } else {
                flight.running = true;
                for ticket in &flight.waiters {
                    ticket.handle.mark_running();
                }
                Some(Claim {
                    request: flight.request.clone(),
                    reads_cache: flight.reads_cache,
                    cache_checked: flight.cache_checked,
                    writes_cache: flight.writes_cache(),
                    allows_stale: flight.allows_stale(),
                    cancel: flight.cancel.clone(),
                })
            }
        };
        let Some(claim) = claim else {
            debug!(flight = job.flight_id, "every waiter cancelled before execution");
            self.finish_flight(&job.key, job.flight_id, Err(ApiError::Cancelled));
            return;
        };

        let span = info_span!(
            "tilbud.request",
            flight = job.flight_id,
            method = %claim.request.method(),
            url = %claim.request.url(),
        );
        let result = self.execute_flight(&job.key, claim).instrument(span).await;
        self.finish_flight(&job.key, job.flight_id, result);
    }

    async fn execute_flight(&self, key: &FlightKey, claim: Claim) -> Result<Reply, ApiError> {
        let cache_key = key.cache_key();

        if let Some(cache_key) = cache_key
            && claim.reads_cache
            && !claim.cache_checked
            && let Some(reply) = self.cached(cache_key, false).await
        {
            return Ok(reply);
        }

        match self.fetch(&claim.request, &claim.cancel).await {
            Ok(response) => {
                let response = Arc::new(response);
                if let Some(cache_key) = cache_key
                    && claim.writes_cache
                {
                    self.store(cache_key, &claim.request, &response).await;
                }
                Ok(Reply::new(response, CacheStatus::Miss, ResponseSource::Upstream))
            }
            Err(err) => {
                if let Some(cache_key) = cache_key
                    && claim.allows_stale
                    && !err.is_cancelled()
                    && let Some(mut reply) = self.cached(cache_key, true).await
                {
                    warn!(error = %err, "network failed, serving cached entry");
                    if reply.status == CacheStatus::Hit {
                        return Ok(reply);
                    }
                    reply.status = CacheStatus::Stale;
                    metrics::record_cache_stale(self.backend.name());
                    return Ok(reply);
                }
                Err(err)
            }
        }
    }

    /// Runs the request with retries for transient failures.
    async fn fetch(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ApiError> {
        let mut attempt = 0u32;
        loop {
            // Credentials are read per attempt so a refreshed token is used.
            match self
                .executor
                .execute(request, self.credentials.as_ref(), cancel)
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff.delay(attempt);
                    metrics::record_retry(err.kind());
                    debug!(attempt, ?delay, error = %err, "transient failure, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    debug!(attempt, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }

    /// Looks `key` up; backend failures read as a miss.
    pub(crate) async fn cached(&self, key: &CacheKey, allow_stale: bool) -> Option<Reply> {
        let now = self.clock.now();
        let backend = self.backend.name();
        match self.backend.lookup(key, now, allow_stale).await {
            Ok(Some(value)) => {
                let status = if value.is_fresh_at(now) {
                    metrics::record_cache_hit(backend);
                    CacheStatus::Hit
                } else {
                    CacheStatus::Stale
                };
                debug!(key = %key, ?status, "cache answered");
                Some(Reply::new(
                    Arc::new(value.into_inner()),
                    status,
                    ResponseSource::Backend(SmolStr::new(backend)),
                ))
            }
            Ok(None) => {
                if !allow_stale {
                    metrics::record_cache_miss(backend);
                }
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed, treating as a miss");
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, request: &Request, response: &Response) {
        let ttl = request.ttl().unwrap_or(self.config.default_ttl);
        let value = CacheValue::new(response.clone(), self.clock.now(), ttl)
            .with_etag(response.etag().map(SmolStr::new));
        if let Err(err) = self.backend.store(key, &value).await {
            warn!(key = %key, error = %err, "cache write failed");
        }
    }

    /// Cache lookup done at submission; on a miss the flight goes to the
    /// workers.
    ///
    /// A hit only settles the flight if no waiter that bypasses cache reads
    /// joined during the lookup.
    pub(crate) fn spawn_lookup(self: &Arc<Self>, job: Job) {
        let Ok(runtime) = Handle::try_current() else {
            // The worker will look the cache up instead.
            self.schedule_job(job);
            return;
        };
        let inner = Arc::clone(self);
        let lookup = async move {
            let Some(cache_key) = job.key.cache_key() else {
                inner.schedule_job(job);
                return;
            };
            if let Some(reply) = inner.cached(cache_key, false).await {
                let answered = inner.flights.remove_if(&job.key, |_, flight| {
                    flight.id == job.flight_id && flight.reads_cache && !flight.running
                });
                if let Some((_, flight)) = answered {
                    for ticket in flight.waiters {
                        inner.settle(ticket, Ok(reply.clone()));
                    }
                    return;
                }
                debug!(flight = job.flight_id, "cached answer bypassed, going to the network");
            }
            {
                let Some(mut flight) = inner.flights.get_mut(&job.key) else {
                    return;
                };
                // A promoted job may already have put it on a worker.
                if flight.id != job.flight_id || flight.running {
                    return;
                }
                flight.cache_checked = true;
            }
            inner.schedule_job(job);
        };
        self.tasks.spawn_on(lookup, &runtime);
    }

    /// Hands a job to the workers, cancelling its flight if the schedule is
    /// closed.
    pub(crate) fn schedule_job(self: &Arc<Self>, job: Job) {
        if !self.schedule.push(job.clone()) {
            debug!(flight = job.flight_id, "schedule closed");
            self.abandon_flight(&job);
        }
    }

    /// Cancels every waiter of a flight that never started.
    pub(crate) fn abandon_flight(&self, job: &Job) {
        let Some((_, flight)) = self
            .flights
            .remove_if(&job.key, |_, flight| flight.id == job.flight_id && !flight.running)
        else {
            return;
        };
        for ticket in flight.waiters {
            self.deliver(ticket, Completion::Cancelled);
        }
    }

    /// Removes a flight and settles every waiter, in attach order.
    pub(crate) fn finish_flight(
        self: &Arc<Self>,
        key: &FlightKey,
        flight_id: u64,
        result: Result<Reply, ApiError>,
    ) {
        let Some((_, flight)) = self.flights.remove_if(key, |_, flight| flight.id == flight_id)
        else {
            return;
        };
        for ticket in flight.waiters {
            self.settle(ticket, result.clone());
        }
    }

    fn settle(self: &Arc<Self>, ticket: Ticket, result: Result<Reply, ApiError>) {
        if ticket.handle.is_cancelled() {
            self.notify_finish(&ticket);
            self.deliver(ticket, Completion::Cancelled);
            return;
        }
        match result {
            // The shared execution was aborted after every earlier waiter
            // cancelled; this waiter joined late and still wants an answer.
            Err(ApiError::Cancelled) if self.is_accepting() => {
                debug!(seq = ticket.handle.seq(), "shared execution aborted, requeueing");
                self.enqueue(ticket);
            }
            Err(ApiError::Cancelled) => {
                self.deliver(ticket, Completion::Cancelled);
            }
            Err(err) => {
                self.notify_finish(&ticket);
                self.deliver(ticket, Completion::Failed(err));
            }
            Ok(reply) => {
                self.notify_finish(&ticket);
                match ticket.request.autofill().cloned() {
                    Some(spec) => self.spawn_chain(ticket, reply, spec),
                    None => self.deliver(ticket, Completion::Delivered(reply)),
                }
            }
        }
    }

    fn notify_finish(&self, ticket: &Ticket) {
        for debugger in &self.debuggers {
            if catch_unwind(AssertUnwindSafe(|| debugger.on_finish(&ticket.request))).is_err() {
                warn!(seq = ticket.handle.seq(), "debugger panicked in on_finish");
            }
        }
    }
}
