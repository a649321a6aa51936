use async_trait::async_trait;
use tilbud_core::{CacheKey, CacheValue, Raw};

use crate::{Backend, BackendResult, DeleteStatus};

/// A backend that stores nothing. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

#[async_trait]
impl Backend for NullBackend {
    async fn read(&self, _key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(None)
    }

    async fn write(&self, _key: &CacheKey, _value: CacheValue<Raw>) -> BackendResult<()> {
        Ok(())
    }

    async fn remove(&self, _key: &CacheKey) -> BackendResult<DeleteStatus> {
        Ok(DeleteStatus::Missing)
    }

    async fn clear(&self) -> BackendResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
