//! Builder for configuring [`MokaBackend`].

use std::time::{Duration, Instant};

use chrono::Utc;
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;
use smol_str::SmolStr;

use crate::backend::MokaBackend;
use tilbud_backend::Format;
use tilbud_core::{CacheKey, CacheValue, Raw};

/// Expiration policy derived from each value's `stored_at + ttl`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Expiration {
    grace: Duration,
}

impl Expiry<CacheKey, CacheValue<Raw>> for Expiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheValue<Raw>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.time_to_live(value))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheValue<Raw>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Moka keeps the old deadline by default; a replaced entry gets a new one.
        Some(self.time_to_live(value))
    }
}

impl Expiration {
    fn time_to_live(&self, value: &CacheValue<Raw>) -> Duration {
        let remaining = value.remaining_ttl(Utc::now()).unwrap_or(Duration::ZERO);
        remaining.saturating_add(self.grace)
    }
}

/// Marker type: capacity has not been configured yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapacity;

/// Marker type: entry-count capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct EntryCapacity(pub(crate) u64);

/// Marker type: byte-based capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct ByteCapacity(pub(crate) u64);

/// Builder for creating and configuring a [`MokaBackend`].
///
/// Capacity is set with exactly one of [`max_entries`](Self::max_entries) or
/// [`max_bytes`](Self::max_bytes); `build()` only exists afterwards.
///
/// ```
/// use std::time::Duration;
/// use tilbud_backend::Format;
/// use tilbud_moka::MokaBackend;
///
/// let backend = MokaBackend::builder()
///     .label("offers")
///     .max_bytes(16 * 1024 * 1024)
///     .value_format(Format::Bincode)
///     .stale_grace(Duration::from_secs(600))
///     .build();
/// ```
pub struct MokaBackendBuilder<Cap> {
    capacity: Cap,
    format: Format,
    label: SmolStr,
    stale_grace: Duration,
    eviction_policy: Option<EvictionPolicy>,
}

impl MokaBackendBuilder<NoCapacity> {
    /// Creates a new builder with no capacity configured.
    pub fn new() -> Self {
        Self {
            capacity: NoCapacity,
            format: Format::Json,
            label: SmolStr::new_static("moka"),
            stale_grace: Duration::ZERO,
            eviction_policy: None,
        }
    }

    /// Sets the maximum number of entries the cache can hold.
    pub fn max_entries(self, capacity: u64) -> MokaBackendBuilder<EntryCapacity> {
        self.with_capacity(EntryCapacity(capacity))
    }

    /// Sets the approximate memory budget in bytes.
    pub fn max_bytes(self, bytes: u64) -> MokaBackendBuilder<ByteCapacity> {
        self.with_capacity(ByteCapacity(bytes))
    }

    fn with_capacity<Cap>(self, capacity: Cap) -> MokaBackendBuilder<Cap> {
        MokaBackendBuilder {
            capacity,
            format: self.format,
            label: self.label,
            stale_grace: self.stale_grace,
            eviction_policy: self.eviction_policy,
        }
    }
}

impl Default for MokaBackendBuilder<NoCapacity> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cap> MokaBackendBuilder<Cap> {
    /// Sets the name reported as the response source. Default `"moka"`.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the value serialization format. Default [`Format::Json`].
    pub fn value_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Keeps entries this long past their TTL so they can be served stale.
    pub fn stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    /// Overrides the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    fn finish(self, cache: Cache<CacheKey, CacheValue<Raw>>) -> MokaBackend {
        MokaBackend {
            cache,
            format: self.format,
            label: self.label,
        }
    }
}

impl MokaBackendBuilder<EntryCapacity> {
    /// Builds the [`MokaBackend`] with entry-count based capacity.
    pub fn build(mut self) -> MokaBackend {
        let policy = self
            .eviction_policy
            .take()
            .unwrap_or_else(EvictionPolicy::tiny_lfu);
        let cache = CacheBuilder::new(self.capacity.0)
            .eviction_policy(policy)
            .expire_after(Expiration {
                grace: self.stale_grace,
            })
            .build();
        self.finish(cache)
    }
}

impl MokaBackendBuilder<ByteCapacity> {
    /// Builds the [`MokaBackend`] with byte-based capacity.
    ///
    /// Defaults to LRU eviction: TinyLFU admission may reject a new weighted
    /// entry even when eviction could make room.
    pub fn build(mut self) -> MokaBackend {
        let policy = self.eviction_policy.take().unwrap_or_else(EvictionPolicy::lru);
        let cache = CacheBuilder::new(self.capacity.0)
            .weigher(byte_weigher)
            .eviction_policy(policy)
            .expire_after(Expiration {
                grace: self.stale_grace,
            })
            .build();
        self.finish(cache)
    }
}

/// Fixed overhead per entry for key and metadata bookkeeping.
const ENTRY_OVERHEAD: usize = 96;

fn byte_weigher(key: &CacheKey, value: &CacheValue<Raw>) -> u32 {
    let key_size = key.url().len()
        + key
            .parts()
            .iter()
            .map(|part| part.key().len() + part.value().map_or(0, str::len))
            .sum::<usize>();
    let size = ENTRY_OVERHEAD + key_size + value.data().len();
    size.min(u32::MAX as usize) as u32
}
