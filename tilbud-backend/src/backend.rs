use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tilbud_core::{CacheKey, CacheValue, Raw, Response};

use crate::{BackendError, DeleteStatus, format::Format, metrics};

pub type BackendResult<T> = Result<T, BackendError>;

/// Raw key-value storage for cached responses.
///
/// Implementations only move bytes; encoding and freshness checks live in
/// [`CacheBackend`]. All methods may be called concurrently from several
/// workers.
#[async_trait]
pub trait Backend: Sync + Send {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>>;

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()>;

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Drops every entry.
    async fn clear(&self) -> BackendResult<()>;

    /// Returns the name of this backend, reported as the response source.
    fn name(&self) -> &str {
        "backend"
    }

    fn value_format(&self) -> Format {
        Format::Json
    }
}

#[async_trait]
impl Backend for &dyn Backend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        (*self).read(key).await
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        (*self).write(key, value).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (*self).remove(key).await
    }

    async fn clear(&self) -> BackendResult<()> {
        (*self).clear().await
    }

    fn name(&self) -> &str {
        (*self).name()
    }

    fn value_format(&self) -> Format {
        (*self).value_format()
    }
}

#[async_trait]
impl Backend for Box<dyn Backend> {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        (**self).write(key, value).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> BackendResult<()> {
        (**self).clear().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn value_format(&self) -> Format {
        (**self).value_format()
    }
}

#[async_trait]
impl Backend for Arc<dyn Backend + Send + 'static> {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        (**self).write(key, value).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> BackendResult<()> {
        (**self).clear().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn value_format(&self) -> Format {
        (**self).value_format()
    }
}

/// High-level cache operations on typed responses.
///
/// `lookup` decodes the stored bytes and applies the freshness rule: an entry
/// stored at `T` with TTL `D` is served for any `now <= T + D`. A stale entry
/// is only returned when `allow_stale` is set.
pub trait CacheBackend: Backend {
    fn lookup(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
        allow_stale: bool,
    ) -> impl Future<Output = BackendResult<Option<CacheValue<Response>>>> + Send {
        async move {
            let timer = metrics::Timer::new();
            let read_result = self.read(key).await;
            metrics::record_read(self.name(), timer.elapsed());

            let raw = match read_result {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(err) => {
                    metrics::record_read_error(self.name());
                    return Err(err);
                }
            };

            if !allow_stale && !raw.is_fresh_at(now) {
                tracing::trace!(key = %key, "cache entry is stale");
                return Ok(None);
            }

            metrics::record_read_bytes(self.name(), raw.data().len());
            let response = self.value_format().deserialize::<Response>(raw.data())?;
            Ok(Some(raw.map(|_| response)))
        }
    }

    fn store(
        &self,
        key: &CacheKey,
        value: &CacheValue<Response>,
    ) -> impl Future<Output = BackendResult<()>> + Send {
        async move {
            let data = self.value_format().serialize(value.data())?;
            metrics::record_write_bytes(self.name(), data.len());
            let raw = CacheValue::new(data, value.stored_at(), value.ttl())
                .with_etag(value.etag().map(Into::into));

            let timer = metrics::Timer::new();
            let result = self.write(key, raw).await;
            metrics::record_write(self.name(), timer.elapsed());
            if result.is_err() {
                metrics::record_write_error(self.name());
            }
            result
        }
    }

    fn invalidate(&self, key: &CacheKey) -> impl Future<Output = BackendResult<DeleteStatus>> + Send {
        async move { self.remove(key).await }
    }
}

impl<T: Backend + ?Sized> CacheBackend for T {}
