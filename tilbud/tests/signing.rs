mod common;

use std::sync::Arc;

use common::{complete, json, test_config};
use tilbud::signer::{HEADER_X_SIGNATURE, HEADER_X_TOKEN, signature};
use tilbud::{
    Credentials, Method, MockTransport, Request, RequestQueue, Session, StaticCredentials,
};
use tilbud_backend::NullBackend;

fn signed_queue<C: Credentials + 'static>(mock: &MockTransport, credentials: C) -> RequestQueue {
    RequestQueue::builder()
        .transport(mock.clone())
        .backend(NullBackend)
        .credentials(credentials)
        .config(test_config())
        .build()
}

#[tokio::test]
async fn test_session_token_signs_every_request() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json("[]"));
    let session = Arc::new(Session::new("key-123"));
    session.set_token("secret-token");
    let queue = signed_queue(&mock, session);
    queue.start();

    complete(&queue, Request::get("/v2/catalogs")).await;

    let exchange = &mock.exchanges()[0];
    assert_eq!(exchange.header(HEADER_X_TOKEN), Some("secret-token"));
    assert_eq!(
        exchange.header(HEADER_X_SIGNATURE),
        Some("91eac16a19713e2e0d5f1da88cd546636c18a08569d7585c30eb6ab021be9f22")
    );
    queue.stop().await;
}

#[tokio::test]
async fn test_anonymous_requests_carry_no_signature() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json("[]"));
    let queue = signed_queue(&mock, StaticCredentials::anonymous("key-123"));
    queue.start();

    complete(&queue, Request::get("/v2/catalogs")).await;

    let exchange = &mock.exchanges()[0];
    assert_eq!(exchange.header(HEADER_X_TOKEN), None);
    assert_eq!(exchange.header(HEADER_X_SIGNATURE), None);
    queue.stop().await;
}

#[tokio::test]
async fn test_refreshed_token_is_used_by_later_requests() {
    let mock = MockTransport::new();
    mock.respond(Method::Post, "/v2/sessions", json("{}"));
    let session = Arc::new(Session::new("key-123"));
    let queue = signed_queue(&mock, session.clone());
    queue.start();

    complete(&queue, Request::post("/v2/sessions")).await;
    session.set_token("issued");
    complete(&queue, Request::post("/v2/sessions")).await;
    session.clear_token();
    complete(&queue, Request::post("/v2/sessions")).await;

    let tokens: Vec<Option<String>> = mock
        .exchanges()
        .iter()
        .map(|exchange| exchange.header(HEADER_X_TOKEN).map(str::to_string))
        .collect();
    assert_eq!(tokens, [None, Some("issued".to_string()), None]);
    assert_eq!(
        mock.exchanges()[1].header(HEADER_X_SIGNATURE),
        Some(signature("key-123", "issued").as_str())
    );
    queue.stop().await;
}

#[tokio::test]
async fn test_caller_cannot_forge_signature_headers() {
    let mock = MockTransport::new();
    mock.respond(Method::Get, "/v2/catalogs", json("[]"));
    let queue = signed_queue(&mock, StaticCredentials::new("key-123", "real"));
    queue.start();

    complete(
        &queue,
        Request::get("/v2/catalogs")
            .header("x-token", "forged")
            .header("Accept-Language", "da"),
    )
    .await;

    let exchange = &mock.exchanges()[0];
    assert_eq!(exchange.header(HEADER_X_TOKEN), Some("real"));
    assert_eq!(exchange.header("Accept-Language"), Some("da"));
    let tokens = exchange
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(HEADER_X_TOKEN))
        .count();
    assert_eq!(tokens, 1);
    queue.stop().await;
}
