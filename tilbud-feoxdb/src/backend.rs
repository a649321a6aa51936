use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bincode::{
    config::standard as bincode_config,
    serde::{decode_from_slice, encode_to_vec},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use feoxdb::{FeoxError, FeoxStore};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tilbud_backend::{Backend, BackendError, BackendResult, DeleteStatus, Format};
use tilbud_core::{CacheKey, CacheValue, Raw};

use crate::FeOxDbError;

/// Reserved key holding the current cache generation.
const GENERATION_KEY: &[u8] = b"\0tilbud:generation";

/// Upper bound for store-level TTLs.
const MAX_STORE_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    etag: Option<SmolStr>,
}

impl From<CacheValue<Raw>> for StoredEntry {
    fn from(value: CacheValue<Raw>) -> Self {
        Self {
            data: value.data().to_vec(),
            stored_at: value.stored_at(),
            ttl: value.ttl(),
            etag: value.etag().map(SmolStr::new),
        }
    }
}

impl From<StoredEntry> for CacheValue<Raw> {
    fn from(entry: StoredEntry) -> Self {
        CacheValue::new(Bytes::from(entry.data), entry.stored_at, entry.ttl).with_etag(entry.etag)
    }
}

/// Disk-based cache backend using FeOxDB.
///
/// ```no_run
/// use tilbud_feoxdb::FeOxDbBackend;
///
/// let backend = FeOxDbBackend::builder()
///     .path("/var/cache/tilbud")
///     .max_file_size(1024 * 1024 * 1024)
///     .build()?;
/// # Ok::<(), tilbud_feoxdb::FeOxDbError>(())
/// ```
///
/// Cloning is cheap; clones share the same underlying database.
///
/// `clear()` bumps a generation counter that prefixes every stored key, so
/// earlier entries become unreachable at once and are reclaimed when their
/// store-level TTL runs out.
#[derive(Clone)]
pub struct FeOxDbBackend {
    store: Arc<FeoxStore>,
    generation: Arc<AtomicU64>,
    format: Format,
    label: SmolStr,
    stale_grace: Duration,
}

impl std::fmt::Debug for FeOxDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeOxDbBackend")
            .field("label", &self.label)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl FeOxDbBackend {
    /// Starts building a new backend.
    pub fn builder() -> FeOxDbBackendBuilder {
        FeOxDbBackendBuilder::default()
    }

    /// In-memory backend. Data is lost when dropped.
    ///
    /// ```
    /// use tilbud_feoxdb::FeOxDbBackend;
    ///
    /// let backend = FeOxDbBackend::in_memory().expect("in-memory store");
    /// ```
    pub fn in_memory() -> Result<Self, FeOxDbError> {
        Self::builder().build()
    }

    /// Forces pending writes to disk. No-op in memory-only mode.
    pub fn flush(&self) {
        self.store.flush();
    }

    fn storage_key(&self, key: &CacheKey) -> Vec<u8> {
        let generation = self.generation.load(Ordering::Acquire);
        format!("{generation}|{key}").into_bytes()
    }

    fn store_ttl(&self, value: &CacheValue<Raw>) -> u64 {
        let remaining = value.remaining_ttl(Utc::now()).unwrap_or(Duration::ZERO);
        remaining
            .saturating_add(self.stale_grace)
            .min(MAX_STORE_TTL)
            .as_secs()
            .max(1)
    }
}

/// Builder for [`FeOxDbBackend`].
pub struct FeOxDbBackendBuilder {
    path: Option<PathBuf>,
    max_file_size: Option<u64>,
    max_memory: Option<usize>,
    format: Format,
    label: SmolStr,
    stale_grace: Duration,
}

impl Default for FeOxDbBackendBuilder {
    fn default() -> Self {
        Self {
            path: None,
            max_file_size: None,
            max_memory: None,
            format: Format::Bincode,
            label: SmolStr::new_static("feoxdb"),
            stale_grace: Duration::ZERO,
        }
    }
}

impl FeOxDbBackendBuilder {
    /// Enables persistent storage at the given path.
    ///
    /// If path is a directory, creates `cache.db` inside it.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Pre-allocates disk space and caps maximum storage.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Limits RAM usage. Writes fail once the limit is reached.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Name reported as the response source.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Value serialization format. Default [`Format::Bincode`].
    pub fn value_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Keeps entries this long past their TTL so they can be served stale.
    pub fn stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    /// Creates the backend.
    ///
    /// Fails if the database file can't be opened or created.
    pub fn build(self) -> Result<FeOxDbBackend, FeOxDbError> {
        let mut builder = FeoxStore::builder().enable_ttl(true);

        if let Some(mut path) = self.path {
            if path.is_dir() {
                path.push("cache.db");
            }
            builder = builder.device_path(path.to_string_lossy().to_string());
        }
        if let Some(file_size) = self.max_file_size {
            builder = builder.file_size(file_size);
        }
        if let Some(memory) = self.max_memory {
            builder = builder.max_memory(memory);
        }

        let store = builder.build()?;
        let generation = match store.get(GENERATION_KEY) {
            Ok(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| FeOxDbError::CorruptGeneration(bytes.len()))?;
                u64::from_le_bytes(raw)
            }
            Err(FeoxError::KeyNotFound) => 0,
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(label = %self.label, generation, "feoxdb backend opened");

        Ok(FeOxDbBackend {
            store: Arc::new(store),
            generation: Arc::new(AtomicU64::new(generation)),
            format: self.format,
            label: self.label,
            stale_grace: self.stale_grace,
        })
    }
}

#[async_trait]
impl Backend for FeOxDbBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        let store = self.store.clone();
        let key_bytes = self.storage_key(key);

        tokio::task::spawn_blocking(move || match store.get(&key_bytes) {
            Ok(encoded) => {
                let (entry, _): (StoredEntry, _) =
                    decode_from_slice(&encoded, bincode_config()).map_err(BackendError::internal)?;
                Ok(Some(entry.into()))
            }
            Err(FeoxError::KeyNotFound) => Ok(None),
            Err(e) => Err(BackendError::internal(e)),
        })
        .await
        .map_err(BackendError::internal)?
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        let store = self.store.clone();
        let key_bytes = self.storage_key(key);
        let ttl_secs = self.store_ttl(&value);

        let entry: StoredEntry = value.into();
        let value_bytes = encode_to_vec(&entry, bincode_config()).map_err(BackendError::internal)?;

        tokio::task::spawn_blocking(move || {
            store
                .insert_with_ttl(&key_bytes, &value_bytes, ttl_secs)
                .map_err(BackendError::internal)?;
            Ok(())
        })
        .await
        .map_err(BackendError::internal)?
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let store = self.store.clone();
        let key_bytes = self.storage_key(key);

        tokio::task::spawn_blocking(move || {
            if store.contains_key(&key_bytes) {
                store.delete(&key_bytes).map_err(BackendError::internal)?;
                Ok(DeleteStatus::Deleted(1))
            } else {
                Ok(DeleteStatus::Missing)
            }
        })
        .await
        .map_err(BackendError::internal)?
    }

    async fn clear(&self) -> BackendResult<()> {
        let store = self.store.clone();
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(label = %self.label, generation = next, "feoxdb cache cleared");

        tokio::task::spawn_blocking(move || {
            store
                .insert(GENERATION_KEY, &next.to_le_bytes())
                .map_err(BackendError::internal)?;
            Ok(())
        })
        .await
        .map_err(BackendError::internal)?
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn value_format(&self) -> Format {
        self.format
    }
}
