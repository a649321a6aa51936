//! Traits and structs for tilbud cache backend interaction.
//!
//! A backend is a key-value store for serialized [`CacheValue`]s. The engine
//! only talks to it through [`CacheBackend`], which encodes responses with the
//! backend's [`Format`] and drops entries that are too old to serve.
//!
//! If you want to implement your own backend, implement [`Backend`]; the
//! [`CacheBackend`] methods come for free.
//!
//! [`CacheValue`]: tilbud_core::CacheValue
mod backend;
mod error;
pub mod format;
pub mod metrics;
mod null;

pub use backend::{Backend, BackendResult, CacheBackend};
pub use error::BackendError;
pub use format::{Format, FormatError};
pub use null::NullBackend;

/// Status of deleting result.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}
