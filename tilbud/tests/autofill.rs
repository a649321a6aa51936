mod common;

use std::time::Duration;

use common::{complete, json, queue, test_config};
use tilbud::{
    ApiError, AutoFillChild, AutoFillSpec, Completion, Method, MockReply, MockTransport, Request,
};

const STORES: &str = r#"[
    {"id": "s1", "dealer_id": "d1"},
    {"id": "s2", "dealer_id": "d2", "dealer": {"id": "d2", "name": "Netto"}},
    {"id": "s3", "dealer_id": "d1", "dealer": null}
]"#;

fn dealers_spec() -> AutoFillSpec {
    AutoFillSpec::fill_missing("dealers", "dealer", "dealer_id", "/v2/dealers", "dealer_ids")
}

fn stores() -> Request {
    Request::get("/v2/stores").default_page().with_autofill(dealers_spec())
}

#[tokio::test]
async fn test_missing_dealers_are_fetched_before_delivery() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/stores", json(STORES));
    mock.respond(
        Method::Get,
        "/v2/dealers",
        json(r#"[{"id": "d1", "name": "Føtex"}]"#),
    );
    let queue = queue(&mock, test_config());
    queue.start();

    let reply = complete(&queue, stores()).await.into_result().unwrap();

    assert_eq!(reply.filled.len(), 1);
    let dealers = reply.filled[0].response().json_value().unwrap();
    assert_eq!(dealers[0]["id"], "d1");
    assert_eq!(mock.calls_to(Method::Get, "/v2/dealers"), 1);

    // Every store now carries its dealer.
    let stores = reply.response().json_value().unwrap();
    assert_eq!(stores[0]["dealer"]["name"], "Føtex");
    assert_eq!(stores[1]["dealer"]["name"], "Netto");
    assert_eq!(stores[2]["dealer"]["name"], "Føtex");
    assert_eq!(reply.response().status(), 200);

    let exchanges = mock.exchanges();
    let child = exchanges
        .iter()
        .find(|exchange| exchange.path() == "/v2/dealers")
        .unwrap();
    assert_eq!(child.query(), Some("dealer_ids=d1&limit=1&offset=0"));
    queue.stop().await;
}

#[tokio::test]
async fn test_mandatory_child_failure_fails_the_parent() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/stores", json(STORES));
    mock.respond_with(Method::Get, "/v2/dealers", MockReply::status(500));
    let queue = queue(&mock, test_config());
    queue.start();

    let completion = complete(&queue, stores()).await;

    match completion {
        Completion::Failed(ApiError::AutoFillChildFailed { source }) => {
            assert_eq!(source.status(), Some(500));
        }
        other => panic!("expected an auto-fill failure, got {other:?}"),
    }
    queue.stop().await;
}

#[tokio::test]
async fn test_one_failing_mandatory_child_fails_the_parent() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs/c1", json(r#"{"id": "c1"}"#));
    mock.respond(Method::Get, "/v2/a", json("[]"));
    mock.respond_with(Method::Get, "/v2/b", MockReply::status(503));
    let queue = queue(&mock, test_config());
    queue.start();

    let spec = AutoFillSpec::always("pair", |_| {
        vec![
            AutoFillChild::mandatory(Request::get("/v2/a")),
            AutoFillChild::mandatory(Request::get("/v2/b")),
        ]
    });
    let completion = complete(&queue, Request::get("/v2/catalogs/c1").with_autofill(spec)).await;

    match completion {
        Completion::Failed(ApiError::AutoFillChildFailed { source }) => {
            assert_eq!(source.status(), Some(503));
        }
        other => panic!("expected an auto-fill failure, got {other:?}"),
    }
    assert_eq!(mock.calls_to(Method::Get, "/v2/a"), 1);
    assert_eq!(mock.calls_to(Method::Get, "/v2/b"), 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_custom_merge_shapes_the_delivered_body() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs/c1", json(r#"{"id": "c1"}"#));
    mock.respond(Method::Get, "/v2/catalogs/c1/pages", json(r#"["p1.jpg", "p2.jpg"]"#));
    let queue = queue(&mock, test_config());
    queue.start();

    let spec = AutoFillSpec::always("pages", |_| {
        vec![AutoFillChild::mandatory(Request::get("/v2/catalogs/c1/pages"))]
    })
    .with_merge(|catalog, children| {
        catalog["pages"] = children[0].clone();
    });
    let reply = complete(&queue, Request::get("/v2/catalogs/c1").with_autofill(spec))
        .await
        .into_result()
        .unwrap();

    let catalog = reply.response().json_value().unwrap();
    assert_eq!(catalog["id"], "c1");
    assert_eq!(catalog["pages"][1], "p2.jpg");
    queue.stop().await;
}

#[tokio::test]
async fn test_complete_response_issues_no_children() {
    let mock = MockTransport::new();
    mock.respond(
        Method::Get,
        "/v2/stores",
        json(r#"[{"id": "s2", "dealer_id": "d2", "dealer": {"id": "d2"}}]"#),
    );
    let queue = queue(&mock, test_config());
    queue.start();

    let reply = complete(&queue, stores()).await.into_result().unwrap();

    assert!(reply.filled.is_empty());
    assert_eq!(mock.calls_to(Method::Get, "/v2/dealers"), 0);
    assert_eq!(mock.calls(), 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_optional_child_failure_is_tolerated() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs/c1", json(r#"{"id": "c1"}"#));
    mock.respond(Method::Get, "/v2/catalogs/c1/pages", json(r#"["p1.jpg"]"#));
    mock.respond_with(
        Method::Get,
        "/v2/catalogs/c1/hotspots",
        MockReply::status(500),
    );
    let queue = queue(&mock, test_config());
    queue.start();

    let spec = AutoFillSpec::always("catalog-extras", |_| {
        vec![
            AutoFillChild::mandatory(Request::get("/v2/catalogs/c1/pages")),
            AutoFillChild::optional(Request::get("/v2/catalogs/c1/hotspots")),
        ]
    });
    let reply = complete(&queue, Request::get("/v2/catalogs/c1").with_autofill(spec))
        .await
        .into_result()
        .unwrap();

    assert_eq!(reply.filled.len(), 1);
    assert_eq!(reply.filled[0].response().body().as_ref(), br#"["p1.jpg"]"#);
    assert_eq!(mock.calls(), 3);
    queue.stop().await;
}

#[tokio::test]
async fn test_child_repeating_an_ancestor_is_skipped() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/stores", json(STORES));
    let queue = queue(&mock, test_config());
    queue.start();

    let spec = AutoFillSpec::always("self", |_| {
        vec![AutoFillChild::mandatory(Request::get("/v2/stores"))]
    });
    let reply = complete(&queue, Request::get("/v2/stores").with_autofill(spec))
        .await
        .into_result()
        .unwrap();

    assert!(reply.filled.is_empty());
    assert_eq!(mock.calls(), 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_chain_depth_is_bounded() {
    let mock = MockTransport::new();
    for path in ["/v2/level0", "/v2/level1", "/v2/level2"] {
        mock.respond(Method::Get, path, json("{}"));
    }
    let queue = queue(&mock, test_config().with_max_autofill_depth(1));
    queue.start();

    let level1 = AutoFillSpec::always("level1", |_| {
        vec![AutoFillChild::mandatory(Request::get("/v2/level2"))]
    });
    let level0 = AutoFillSpec::always("level0", move |_| {
        vec![AutoFillChild::mandatory(
            Request::get("/v2/level1").with_autofill(level1.clone()),
        )]
    });
    let reply = complete(&queue, Request::get("/v2/level0").with_autofill(level0))
        .await
        .into_result()
        .unwrap();

    assert_eq!(reply.filled.len(), 1);
    assert!(reply.filled[0].filled.is_empty());
    assert_eq!(mock.calls_to(Method::Get, "/v2/level2"), 0);
    queue.stop().await;
}

#[tokio::test]
async fn test_cancelling_the_parent_cancels_its_children() {
    let mock = MockTransport::new().latency(Duration::from_millis(300));
    mock.respond(Method::Get, "/v2/stores", json(STORES));
    mock.respond(Method::Get, "/v2/dealers", json("[]"));
    let queue = queue(&mock, test_config());
    queue.start();

    let (handle, pending) = queue.fetch(stores());
    // The parent answered; its child is on the wire.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mock.calls_to(Method::Get, "/v2/dealers"), 1);

    assert!(queue.cancel(&handle));
    let completion = tokio::time::timeout(Duration::from_millis(100), pending)
        .await
        .unwrap();
    assert!(completion.is_cancelled());

    tokio::time::timeout(Duration::from_millis(150), async {
        while queue.in_flight() > 0 || queue.outstanding() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("child execution aborted");
    queue.stop().await;
}

#[tokio::test]
async fn test_children_inherit_the_parent_tag() {
    let mock = MockTransport::new().latency(Duration::from_millis(200));
    mock.respond(Method::Get, "/v2/stores", json(STORES));
    mock.respond(Method::Get, "/v2/dealers", json("[]"));
    let queue = queue(&mock, test_config());
    queue.start();

    let (_handle, pending) = queue.fetch(stores().with_tag("store-list"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Parent and child both carry the tag.
    assert_eq!(queue.cancel_all("store-list"), 2);
    assert!(pending.await.is_cancelled());
    queue.stop().await;
}
