//! Queue metrics.
//!
//! | series                              | kind      | labels              |
//! |-------------------------------------|-----------|---------------------|
//! | `tilbud_cache_lookups_total`        | counter   | `backend`, `result` |
//! | `tilbud_flights_joined_total`       | counter   |                     |
//! | `tilbud_retries_total`              | counter   | `error`             |
//! | `tilbud_deliveries_total`           | counter   | `outcome`           |
//! | `tilbud_upstream_duration_seconds`  | histogram | `transport`         |
//!
//! `result` is one of `hit`, `miss` or `stale`. Everything here is a no-op
//! unless the `metrics` feature is enabled.

use std::time::Duration;

pub use tilbud_backend::metrics::Timer;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    static ref CACHE_LOOKUPS: &'static str = {
        metrics::describe_counter!(
            "tilbud_cache_lookups_total",
            "Cache lookups made on behalf of queued requests, by result."
        );
        "tilbud_cache_lookups_total"
    };
    static ref FLIGHTS_JOINED: &'static str = {
        metrics::describe_counter!(
            "tilbud_flights_joined_total",
            "Requests that attached to an identical flight instead of executing."
        );
        "tilbud_flights_joined_total"
    };
    static ref RETRIES: &'static str = {
        metrics::describe_counter!(
            "tilbud_retries_total",
            "Network attempts repeated after a retryable failure."
        );
        "tilbud_retries_total"
    };
    static ref DELIVERIES: &'static str = {
        metrics::describe_counter!(
            "tilbud_deliveries_total",
            "Completions handed to listeners, by outcome."
        );
        "tilbud_deliveries_total"
    };
    static ref UPSTREAM_DURATION: &'static str = {
        metrics::describe_histogram!(
            "tilbud_upstream_duration_seconds",
            metrics::Unit::Seconds,
            "Wall time of a single network exchange."
        );
        "tilbud_upstream_duration_seconds"
    };
}

#[cfg(feature = "metrics")]
fn lookup(backend: &str, result: &'static str) {
    metrics::counter!(*CACHE_LOOKUPS, "backend" => backend.to_string(), "result" => result)
        .increment(1);
}

#[cfg(not(feature = "metrics"))]
fn lookup(_backend: &str, _result: &'static str) {}

/// A fresh entry answered the request.
#[inline]
pub fn record_cache_hit(backend: &str) {
    lookup(backend, "hit");
}

/// Nothing usable was cached.
#[inline]
pub fn record_cache_miss(backend: &str) {
    lookup(backend, "miss");
}

/// An expired entry was served because the network failed.
#[inline]
pub fn record_cache_stale(backend: &str) {
    lookup(backend, "stale");
}

/// A request joined a flight already under way.
#[inline]
pub fn record_dedup() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*FLIGHTS_JOINED).increment(1);
}

/// An attempt failed with `kind` and will be repeated.
#[inline]
pub fn record_retry(kind: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*RETRIES, "error" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// A completion reached its listener.
#[inline]
pub fn record_delivery(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*DELIVERIES, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// One request/response exchange with `transport`, retries excluded.
#[inline]
pub fn record_upstream(transport: &str, duration: Duration) {
    #[cfg(feature = "metrics")]
    metrics::histogram!(*UPSTREAM_DURATION, "transport" => transport.to_string())
        .record(duration.as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = (transport, duration);
}
