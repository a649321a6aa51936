#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Time source for cache freshness.
///
/// The engine asks its [`Clock`](clock::Clock) for "now" when reading and
/// writing cache entries, so tests can move time with
/// [`ManualClock`](clock::ManualClock).
pub mod clock;

/// Terminal outcomes and the listener contract.
///
/// Every submitted request ends in exactly one
/// [`Completion`](completion::Completion): `Delivered`, `Failed` or
/// `Cancelled`.
pub mod completion;

/// Engine configuration.
///
/// Provides [`QueueConfig`](config::QueueConfig) with:
/// - **Workers**: size of the bounded pool
/// - **Retries**: bound and [`Backoff`](config::Backoff) for transient failures
/// - **Default TTL**: for cacheable responses without their own TTL
/// - **Auto-fill depth**: recursion bound for chained requests
/// - **Delivery mode**: background delivery task or manual draining
pub mod config;

/// Observability taps.
///
/// [`Debugger`](debugger::Debugger)s see every request when it finishes and
/// when its outcome is delivered. [`LogDebugger`](debugger::LogDebugger)
/// logs each delivery as `METHOD url?query`.
pub mod debugger;

/// One network exchange per call, with error mapping.
pub mod executor;

/// Metrics collection.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for:
/// - Cache hits, misses and stale answers
/// - Requests merged into an in-flight execution
/// - Retries and delivered outcomes
/// - Network exchange latency
pub mod metrics;

/// Canned-response transport for tests and offline development.
pub mod mock;

/// The request queue.
///
/// [`RequestQueue`] deduplicates, caches, signs and executes requests on a
/// bounded worker pool, resolves auto-fill chains and delivers outcomes on a
/// single serialized path.
pub mod queue;

/// Request signing.
///
/// [`Signer`](signer::Signer) derives `X-Token` and `X-Signature` headers from
/// an api key and the current session token.
pub mod signer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{CacheStatus, Completion, Listener, Pending, Reply, ResponseSource};
pub use config::{Backoff, ConfigError, DeliveryMode, QueueConfig, WorkerCount};
pub use debugger::{Debugger, LogDebugger};
pub use executor::NetworkExecutor;
pub use mock::{MockReply, MockTransport};
pub use queue::{NotSet, QueueBuilder, RequestHandle, RequestQueue, RequestState};
pub use signer::{Credentials, Session, Signer, StaticCredentials};

pub use tokio_util::sync::CancellationToken;

pub use tilbud_core::{
    ApiError, AutoFillChild, AutoFillSpec, CacheKey, CachePolicy, Method, Priority, Request,
    Response, Transport,
};
