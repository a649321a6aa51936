//! How full a Moka backend is.
//!
//! `tilbud_moka_usage{backend, unit}` is published after every write and
//! removal, once with `unit="entries"` and once with `unit="weighted"` (bytes
//! for byte-bounded backends, entries otherwise). No-op without the `metrics`
//! feature.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Usage gauge, split by unit.
    pub static ref MOKA_USAGE: &'static str = {
        metrics::describe_gauge!(
            "tilbud_moka_usage",
            "Entries and weighted size held by a Moka backend."
        );
        "tilbud_moka_usage"
    };
}

/// Publishes the current usage of `backend`.
#[cfg(feature = "metrics")]
pub fn record_usage(backend: &str, entries: u64, weighted: u64) {
    for (unit, value) in [("entries", entries), ("weighted", weighted)] {
        metrics::gauge!(*MOKA_USAGE, "backend" => backend.to_string(), "unit" => unit)
            .set(value as f64);
    }
}

/// Publishes the current usage of `backend`.
#[cfg(not(feature = "metrics"))]
pub fn record_usage(_backend: &str, _entries: u64, _weighted: u64) {}
