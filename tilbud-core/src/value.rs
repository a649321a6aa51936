//! Cached value types with TTL metadata.
//!
//! A [`CacheValue`] wraps a payload with the moment it was stored, its
//! time-to-live and an optional entity tag. Freshness is a property of the
//! entry, not of the store: any backend can hold it and any reader can decide
//! whether it may be served.
//!
//! ## Freshness
//!
//! An entry stored at `T` with TTL `D` is **fresh** up to and including
//! `T + D` and **stale** afterwards:
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use tilbud_core::CacheValue;
//!
//! let stored = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
//! let value = CacheValue::new("payload", stored, std::time::Duration::from_secs(60));
//!
//! assert!(value.is_fresh_at(stored + Duration::seconds(59)));
//! assert!(!value.is_fresh_at(stored + Duration::seconds(61)));
//! ```
//!
//! Entries are replaced, never mutated in place: writers build a new value
//! and hand it to the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;

/// Outcome of evaluating a cached value against the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<T> {
    /// The entry is within its TTL.
    Fresh(T),
    /// The entry outlived its TTL and may only be served when explicitly allowed.
    Stale(T),
}

impl<T> CacheState<T> {
    /// Returns the wrapped value regardless of freshness.
    pub fn into_inner(self) -> T {
        match self {
            CacheState::Fresh(value) | CacheState::Stale(value) => value,
        }
    }

    /// Returns `true` for [`CacheState::Fresh`].
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheState::Fresh(_))
    }
}

/// A cached value with storage time, TTL and optional entity tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue<T> {
    data: T,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    etag: Option<SmolStr>,
}

impl<T> CacheValue<T> {
    /// Creates a new cache value stored at `stored_at` living for `ttl`.
    pub fn new(data: T, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        CacheValue {
            data,
            stored_at,
            ttl,
            etag: None,
        }
    }

    /// Attaches an entity tag.
    pub fn with_etag(mut self, etag: Option<SmolStr>) -> Self {
        self.etag = etag;
        self
    }

    /// Returns a reference to the cached data.
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Returns when the entry was stored.
    #[inline]
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// Returns the configured time-to-live.
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entity tag, if the server sent one.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Returns the instant after which the entry is stale.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `true` unless `now > stored_at + ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at()
    }

    /// Time left until the entry becomes stale, `None` once it is.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at() - now).to_std().ok()
    }

    /// Classifies the value as fresh or stale at `now`.
    pub fn cache_state(self, now: DateTime<Utc>) -> CacheState<Self> {
        if self.is_fresh_at(now) {
            CacheState::Fresh(self)
        } else {
            CacheState::Stale(self)
        }
    }

    /// Consumes the cache value and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Replaces the payload, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheValue<U> {
        CacheValue {
            data: f(self.data),
            stored_at: self.stored_at,
            ttl: self.ttl,
            etag: self.etag,
        }
    }
}
