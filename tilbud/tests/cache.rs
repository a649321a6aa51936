mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BrokenBackend, complete, json, test_config};
use tilbud::{
    CachePolicy, CacheStatus, Completion, ManualClock, Method, MockReply, MockTransport,
    QueueConfig, Request, RequestQueue, ResponseSource,
};
use tilbud_backend::Backend;
use tilbud_moka::MokaBackend;

fn cached_queue(
    mock: &MockTransport,
    clock: Arc<ManualClock>,
    config: QueueConfig,
) -> RequestQueue {
    RequestQueue::builder()
        .transport(mock.clone())
        .backend(MokaBackend::builder().max_entries(100).build())
        .clock(clock)
        .config(config)
        .build()
}

fn reply(completion: Completion) -> tilbud::Reply {
    match completion {
        Completion::Delivered(reply) => reply,
        other => panic!("expected a delivered reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fresh_entry_is_served_until_ttl_expires() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json(r#"[{"id":"c1"}]"#));
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(
        &mock,
        clock.clone(),
        test_config().with_default_ttl(Duration::from_secs(60)),
    );
    queue.start();

    let first = reply(complete(&queue, Request::get("/v2/catalogs")).await);
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(first.source, ResponseSource::Upstream);

    clock.advance(Duration::from_secs(59));
    let second = reply(complete(&queue, Request::get("/v2/catalogs")).await);
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(second.source, ResponseSource::Backend("moka".into()));
    assert!(second.from_cache());
    assert_eq!(second.response().body(), first.response().body());
    assert_eq!(mock.calls(), 1);

    clock.advance(Duration::from_secs(2));
    let third = reply(complete(&queue, Request::get("/v2/catalogs")).await);
    assert_eq!(third.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 2);

    queue.stop().await;
}

#[tokio::test]
async fn test_request_ttl_overrides_default() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/dealers", json("[]"));
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(&mock, clock.clone(), test_config());
    queue.start();

    let request = || Request::get("/v2/dealers").with_ttl(Duration::from_secs(5));
    complete(&queue, request()).await;
    clock.advance(Duration::from_secs(6));
    let again = reply(complete(&queue, request()).await);

    assert_eq!(again.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn test_network_only_refreshes_the_cache() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/stores", json(r#"[{"id":"s1"}]"#));
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(&mock, clock, test_config());
    queue.start();

    let fresh = reply(
        complete(
            &queue,
            Request::get("/v2/stores").cache_policy(CachePolicy::NetworkOnly),
        )
        .await,
    );
    assert_eq!(fresh.status, CacheStatus::Miss);

    let cached = reply(complete(&queue, Request::get("/v2/stores")).await);
    assert_eq!(cached.status, CacheStatus::Hit);
    assert_eq!(mock.calls(), 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_network_only_skips_a_fresh_entry() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/stores", json("[]"));
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(&mock, clock, test_config());
    queue.start();

    complete(&queue, Request::get("/v2/stores")).await;
    let refreshed = reply(
        complete(
            &queue,
            Request::get("/v2/stores").cache_policy(CachePolicy::NetworkOnly),
        )
        .await,
    );

    assert_eq!(refreshed.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn test_ignore_cache_never_writes() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/offers", json("[]"));
    let clock = Arc::new(ManualClock::new());
    let backend = MokaBackend::builder().max_entries(100).build();
    let queue = RequestQueue::builder()
        .transport(mock.clone())
        .backend(backend.clone())
        .clock(clock)
        .config(test_config())
        .build();
    queue.start();

    let request = Request::get("/v2/offers").cache_policy(CachePolicy::IgnoreCache);
    let key = request.clone().resolve(common::BASE_URL).cache_key();
    complete(&queue, request).await;

    assert!(backend.read(&key).await.unwrap().is_none());
    let next = reply(complete(&queue, Request::get("/v2/offers")).await);
    assert_eq!(next.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let mock = MockTransport::new();
    mock.script(
        Method::Get,
        "/v2/catalogs",
        [MockReply::status(500), MockReply::from(json("[]"))],
    );
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(&mock, clock, test_config());
    queue.start();

    let failed = complete(&queue, Request::get("/v2/catalogs")).await;
    assert_eq!(failed.error().and_then(|e| e.status()), Some(500));

    let next = reply(complete(&queue, Request::get("/v2/catalogs")).await);
    assert_eq!(next.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn test_stale_entry_served_when_network_fails() {
    let mock = MockTransport::new();
    mock.script(
        Method::Get,
        "/v2/catalogs",
        [MockReply::from(json(r#"[{"id":"c1"}]"#)), MockReply::status(503)],
    );
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(
        &mock,
        clock.clone(),
        test_config().with_default_ttl(Duration::from_secs(60)),
    );
    queue.start();

    complete(&queue, Request::get("/v2/catalogs")).await;
    clock.advance(Duration::from_secs(120));

    let stale = reply(complete(&queue, Request::get("/v2/catalogs").stale_if_error()).await);
    assert_eq!(stale.status, CacheStatus::Stale);
    assert!(stale.from_cache());
    assert_eq!(stale.response().body().as_ref(), br#"[{"id":"c1"}]"#);

    // Without opting in, the failure surfaces.
    let failed = complete(&queue, Request::get("/v2/catalogs")).await;
    assert_eq!(failed.error().and_then(|e| e.status()), Some(503));
    assert_eq!(mock.calls(), 3);
    queue.stop().await;
}

#[tokio::test]
async fn test_broken_backend_degrades_to_network() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json("[]"));
    let queue = RequestQueue::builder()
        .transport(mock.clone())
        .backend(BrokenBackend)
        .config(test_config())
        .build();
    queue.start();

    for _ in 0..2 {
        let delivered = reply(complete(&queue, Request::get("/v2/catalogs")).await);
        assert_eq!(delivered.status, CacheStatus::Miss);
    }
    assert_eq!(mock.calls(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn test_invalidated_entry_is_fetched_again() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json("[]"));
    let clock = Arc::new(ManualClock::new());
    let queue = cached_queue(&mock, clock, test_config());
    queue.start();

    let request = Request::get("/v2/catalogs").default_page();
    complete(&queue, request.clone()).await;
    assert!(queue.invalidate(&request).await);
    assert!(!queue.invalidate(&request).await);

    let refetched = reply(complete(&queue, request.clone()).await);
    assert_eq!(refetched.status, CacheStatus::Miss);

    queue.clear_cache().await.unwrap();
    let after_clear = reply(complete(&queue, request).await);
    assert_eq!(after_clear.status, CacheStatus::Miss);
    assert_eq!(mock.calls(), 3);
    queue.stop().await;
}
