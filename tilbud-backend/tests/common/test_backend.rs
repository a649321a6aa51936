//! Simple in-memory test backend implementation using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tilbud_backend::{Backend, BackendError, BackendResult, DeleteStatus, Format};
use tilbud_core::{CacheKey, CacheValue, Raw};

/// Simple in-memory backend for testing using DashMap.
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct TestBackend {
    store: Arc<DashMap<CacheKey, CacheValue<Raw>>>,
    format: Format,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::with_format(Format::Json)
    }

    pub fn with_format(format: Format) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            format,
        }
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.store.contains_key(key)
    }

    /// Raw stored value with its metadata, for inspection.
    pub fn get_raw(&self, key: &CacheKey) -> Option<CacheValue<Raw>> {
        self.store.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for TestBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.store.get(key).map(|v| v.clone()))
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        self.store.insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let existed = self.store.remove(key).is_some();
        Ok(if existed {
            DeleteStatus::Deleted(1)
        } else {
            DeleteStatus::Missing
        })
    }

    async fn clear(&self) -> BackendResult<()> {
        self.store.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }

    fn value_format(&self) -> Format {
        self.format
    }
}

/// Backend that always returns errors (for error testing).
#[derive(Clone, Default)]
pub struct ErrorBackend;

#[async_trait]
impl Backend for ErrorBackend {
    async fn read(&self, _key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Err(BackendError::internal(std::io::Error::other("simulated error")))
    }

    async fn write(&self, _key: &CacheKey, _value: CacheValue<Raw>) -> BackendResult<()> {
        Err(BackendError::internal(std::io::Error::other("simulated error")))
    }

    async fn remove(&self, _key: &CacheKey) -> BackendResult<DeleteStatus> {
        Err(BackendError::internal(std::io::Error::other("simulated error")))
    }

    async fn clear(&self) -> BackendResult<()> {
        Err(BackendError::internal(std::io::Error::other("simulated error")))
    }

    fn name(&self) -> &str {
        "error"
    }
}
