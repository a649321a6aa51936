//! Cache traffic metrics for backends.
//!
//! Compiled to no-ops unless the `metrics` feature is on. Every series is
//! labelled with the backend name and the operation, `lookup` or `store`:
//!
//! - `tilbud_backend_calls_total`
//! - `tilbud_backend_call_duration_seconds`
//! - `tilbud_backend_payload_bytes_total`
//! - `tilbud_backend_errors_total`

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

const LOOKUP: &str = "lookup";
const STORE: &str = "store";

/// Measures one backend call. Zero-sized without the `metrics` feature.
#[derive(Debug)]
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Starts measuring.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Time since [`Timer::new`], or zero when metrics are off.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
lazy_static! {
    /// Backend calls by operation.
    pub static ref BACKEND_CALLS: &'static str = {
        metrics::describe_counter!(
            "tilbud_backend_calls_total",
            "Cache backend calls by backend and operation."
        );
        "tilbud_backend_calls_total"
    };

    /// Latency of backend calls.
    pub static ref BACKEND_CALL_DURATION: &'static str = {
        metrics::describe_histogram!(
            "tilbud_backend_call_duration_seconds",
            metrics::Unit::Seconds,
            "Latency of cache backend calls in seconds."
        );
        "tilbud_backend_call_duration_seconds"
    };

    /// Encoded response bytes moved through the backend.
    pub static ref BACKEND_PAYLOAD_BYTES: &'static str = {
        metrics::describe_counter!(
            "tilbud_backend_payload_bytes_total",
            metrics::Unit::Bytes,
            "Encoded response bytes decoded on lookup or encoded on store."
        );
        "tilbud_backend_payload_bytes_total"
    };

    /// Failed backend calls.
    pub static ref BACKEND_ERRORS: &'static str = {
        metrics::describe_counter!(
            "tilbud_backend_errors_total",
            "Failed cache backend calls by backend and operation."
        );
        "tilbud_backend_errors_total"
    };
}

#[cfg(feature = "metrics")]
fn call(backend: &str, op: &'static str, duration: Duration) {
    let backend = backend.to_string();
    metrics::counter!(*BACKEND_CALLS, "backend" => backend.clone(), "op" => op).increment(1);
    metrics::histogram!(*BACKEND_CALL_DURATION, "backend" => backend, "op" => op)
        .record(duration.as_secs_f64());
}

#[cfg(feature = "metrics")]
fn payload(backend: &str, op: &'static str, bytes: usize) {
    metrics::counter!(*BACKEND_PAYLOAD_BYTES, "backend" => backend.to_string(), "op" => op)
        .increment(bytes as u64);
}

#[cfg(feature = "metrics")]
fn error(backend: &str, op: &'static str) {
    metrics::counter!(*BACKEND_ERRORS, "backend" => backend.to_string(), "op" => op).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn call(_backend: &str, _op: &'static str, _duration: Duration) {}

#[cfg(not(feature = "metrics"))]
fn payload(_backend: &str, _op: &'static str, _bytes: usize) {}

#[cfg(not(feature = "metrics"))]
fn error(_backend: &str, _op: &'static str) {}

/// A raw read finished.
#[inline]
pub fn record_read(backend: &str, duration: Duration) {
    call(backend, LOOKUP, duration);
}

/// Bytes of an entry about to be decoded.
#[inline]
pub fn record_read_bytes(backend: &str, bytes: usize) {
    payload(backend, LOOKUP, bytes);
}

/// A raw read failed.
#[inline]
pub fn record_read_error(backend: &str) {
    error(backend, LOOKUP);
}

/// A raw write finished.
#[inline]
pub fn record_write(backend: &str, duration: Duration) {
    call(backend, STORE, duration);
}

/// Bytes of an encoded entry.
#[inline]
pub fn record_write_bytes(backend: &str, bytes: usize) {
    payload(backend, STORE, bytes);
}

/// A raw write failed.
#[inline]
pub fn record_write_error(backend: &str) {
    error(backend, STORE);
}
