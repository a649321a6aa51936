//! In-memory cache backend for tilbud, powered by [Moka](https://docs.rs/moka).
//!
//! This is the default backend of the dispatch engine: a bounded, concurrent
//! map that drops entries once their TTL has run out.
//!
//! ```
//! use tilbud_moka::MokaBackend;
//!
//! let backend = MokaBackend::builder().max_entries(10_000).build();
//! ```
#![warn(missing_docs)]

mod backend;
mod builder;
pub mod metrics;

pub use backend::MokaBackend;
pub use builder::{ByteCapacity, EntryCapacity, MokaBackendBuilder, NoCapacity};
pub use moka::policy::EvictionPolicy;
