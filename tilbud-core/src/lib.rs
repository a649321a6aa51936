//! Core types for the tilbud request dispatch engine.
//!
//! This crate holds the protocol-level vocabulary shared by the engine and
//! its pluggable collaborators:
//!
//! - [`Request`] - an immutable description of one API call
//! - [`CacheKey`] - the deterministic identity used for caching and dedup
//! - [`CacheValue`] - a cached payload with its storage time and TTL
//! - [`Response`] - status, headers and body of one HTTP exchange
//! - [`ApiError`] - the closed set of failure kinds
//! - [`Transport`] - the thin outbound boundary to any HTTP client
//! - [`AutoFillSpec`] - data-driven follow-up requests for a response
#![warn(missing_docs)]

pub mod autofill;
pub mod error;
pub mod key;
pub mod request;
pub mod response;
pub mod transport;
pub mod value;

pub use autofill::{AutoFillChild, AutoFillSpec};
pub use error::{ApiError, TransportKind};
pub use key::{CacheKey, KeyPart};
pub use request::{CachePolicy, Method, ParamValue, Params, Priority, Request};
pub use response::Response;
pub use transport::{Exchange, Transport, TransportError};
pub use value::{CacheState, CacheValue};

#[doc(hidden)]
pub use smol_str::SmolStr;

/// Raw byte data type used for serialized cache values.
/// Using `Bytes` provides efficient zero-copy cloning via reference counting.
pub type Raw = bytes::Bytes;
