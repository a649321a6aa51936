mod common;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tilbud_backend::{Backend, BackendError, CacheBackend, DeleteStatus, Format, NullBackend};
use tilbud_core::{CacheValue, Request, Response};

use common::{ErrorBackend, TestBackend};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn stores_key() -> tilbud_core::CacheKey {
    Request::get("https://example.com/v2/stores")
        .default_page()
        .cache_key()
}

fn entry(ttl_secs: u64) -> CacheValue<Response> {
    CacheValue::new(
        Response::json_ok(r#"[{"id":"s1"}]"#),
        t0(),
        Duration::from_secs(ttl_secs),
    )
}

#[tokio::test]
async fn test_store_then_lookup_within_ttl() {
    let backend = TestBackend::new();
    let key = stores_key();
    backend.store(&key, &entry(60)).await.unwrap();

    let hit = backend
        .lookup(&key, t0() + ChronoDuration::seconds(59), false)
        .await
        .unwrap()
        .expect("fresh entry");
    assert_eq!(hit.data(), entry(60).data());
    assert_eq!(hit.stored_at(), t0());
}

#[tokio::test]
async fn test_expired_entry_is_a_miss() {
    let backend = TestBackend::new();
    let key = stores_key();
    backend.store(&key, &entry(60)).await.unwrap();

    let later = t0() + ChronoDuration::seconds(61);
    assert!(backend.lookup(&key, later, false).await.unwrap().is_none());
    // Still stored: expiry is decided on read.
    assert!(backend.has(&key));
    let stale = backend.lookup(&key, later, true).await.unwrap();
    assert!(stale.is_some_and(|value| !value.is_fresh_at(later)));
}

#[tokio::test]
async fn test_bincode_format_round_trips_through_backend() {
    let backend = TestBackend::with_format(Format::Bincode);
    let key = stores_key();
    let value = entry(30).with_etag(Some("\"abc\"".into()));
    backend.store(&key, &value).await.unwrap();

    let hit = backend.lookup(&key, t0(), false).await.unwrap().unwrap();
    assert_eq!(hit, value);
}

#[tokio::test]
async fn test_invalidate_and_clear() {
    let backend = TestBackend::new();
    let key = stores_key();
    backend.store(&key, &entry(60)).await.unwrap();

    assert_eq!(backend.invalidate(&key).await.unwrap(), DeleteStatus::Deleted(1));
    assert_eq!(backend.invalidate(&key).await.unwrap(), DeleteStatus::Missing);

    backend.store(&key, &entry(60)).await.unwrap();
    backend.clear().await.unwrap();
    assert_eq!(backend.len(), 0);
}

#[tokio::test]
async fn test_corrupt_entry_is_format_error() {
    let backend = TestBackend::new();
    let key = stores_key();
    backend
        .write(
            &key,
            CacheValue::new(bytes::Bytes::from_static(b"garbage"), t0(), Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let result = backend.lookup(&key, t0(), false).await;
    assert!(matches!(result, Err(BackendError::Format(_))));
}

#[tokio::test]
async fn test_errors_propagate() {
    let backend = ErrorBackend;
    let key = stores_key();
    assert!(backend.lookup(&key, t0(), false).await.is_err());
    assert!(backend.store(&key, &entry(1)).await.is_err());
}

#[tokio::test]
async fn test_trait_objects_delegate() {
    let backend: Arc<dyn Backend + Send + 'static> = Arc::new(TestBackend::new());
    let key = stores_key();
    backend.store(&key, &entry(60)).await.unwrap();
    assert_eq!(backend.name(), "test");
    assert!(backend.lookup(&key, t0(), false).await.unwrap().is_some());

    let boxed: Box<dyn Backend> = Box::new(NullBackend);
    boxed.store(&key, &entry(60)).await.unwrap();
    assert!(boxed.lookup(&key, t0(), false).await.unwrap().is_none());
}
