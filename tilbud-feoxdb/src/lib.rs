//! Persistent cache backend for tilbud built on [FeOxDB](https://docs.rs/feoxdb).
//!
//! Use it when cached API responses should survive an application restart.
//! Every entry is written with a store-level TTL, so expired responses are
//! reclaimed by the database itself.
#![warn(missing_docs)]

mod backend;
mod error;

pub use backend::{FeOxDbBackend, FeOxDbBackendBuilder};
pub use error::FeOxDbError;
