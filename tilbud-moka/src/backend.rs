//! Moka backend implementation.

use async_trait::async_trait;
use moka::future::Cache;
use smol_str::SmolStr;
use tilbud_backend::{Backend, BackendResult, DeleteStatus, Format};
use tilbud_core::{CacheKey, CacheValue, Raw};

use crate::builder::{MokaBackendBuilder, NoCapacity};
use crate::metrics;

/// In-memory cache backend powered by Moka.
///
/// Entries are dropped by Moka once `stored_at + ttl` (plus the configured
/// stale grace) has passed in wall-clock time. Freshness for serving is still
/// decided by the engine's clock on every lookup.
///
/// # Caveats
///
/// - Data is **not persisted**; use `tilbud-feoxdb` to survive restarts
/// - Expiration is **best-effort**; expired entries may briefly remain
///   readable until Moka's maintenance runs
#[derive(Clone)]
pub struct MokaBackend {
    pub(crate) cache: Cache<CacheKey, CacheValue<Raw>>,
    pub(crate) format: Format,
    pub(crate) label: SmolStr,
}

impl std::fmt::Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .field("format", &self.format)
            .finish()
    }
}

impl MokaBackend {
    /// Creates a new builder. Capacity must be set before `build()`.
    pub fn builder() -> MokaBackendBuilder<NoCapacity> {
        MokaBackendBuilder::new()
    }

    /// Access to the underlying Moka cache.
    pub fn cache(&self) -> &Cache<CacheKey, CacheValue<Raw>> {
        &self.cache
    }

    fn publish_usage(&self) {
        metrics::record_usage(
            &self.label,
            self.cache.entry_count(),
            self.cache.weighted_size(),
        );
    }
}

#[async_trait]
impl Backend for MokaBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.cache.get(key).await)
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        self.cache.insert(key.clone(), value).await;
        self.publish_usage();
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let value = self.cache.remove(key).await;
        self.publish_usage();
        match value {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    async fn clear(&self) -> BackendResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.publish_usage();
        tracing::debug!(backend = %self.label, "cache cleared");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn value_format(&self) -> Format {
        self.format
    }
}
