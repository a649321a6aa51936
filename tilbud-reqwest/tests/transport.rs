//! Integration tests for ReqwestTransport using wiremock.

use std::time::Duration;
use tilbud_core::{Exchange, Method, Transport, TransportKind};
use tilbud_reqwest::ReqwestTransport;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn exchange(method: Method, url: String) -> Exchange {
    Exchange {
        method,
        url,
        headers: vec![],
        body: None,
    }
}

#[tokio::test]
async fn test_get_with_query_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/stores"))
        .and(query_param("limit", "25"))
        .and(header("X-Token", "tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"id": "s1"}]))
                .insert_header("ETag", "\"v1\""),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::default();
    let mut request = exchange(
        Method::Get,
        format!("{}/v2/stores?limit=25", mock_server.uri()),
    );
    request.headers.push(("X-Token".into(), "tok".to_owned()));

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.etag(), Some("\"v1\""));
    assert_eq!(response.json_value().unwrap()[0]["id"], "s1");
}

#[tokio::test]
async fn test_post_sends_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/sessions"))
        .and(body_string("api_key=k"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::default();
    let mut request = exchange(Method::Post, format!("{}/v2/sessions", mock_server.uri()));
    request.body = Some(bytes::Bytes::from_static(b"api_key=k"));

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_server_error_is_a_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::default();
    let response = transport
        .send(exchange(Method::Get, format!("{}/down", mock_server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.body().as_ref(), b"maintenance");
}

#[tokio::test]
async fn test_timeout_is_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let err = transport
        .send(exchange(Method::Get, format!("{}/slow", mock_server.uri())))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportKind::Timeout);
}

#[tokio::test]
async fn test_refused_connection_is_classified() {
    // Bind then drop a listener to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let uri = format!("http://127.0.0.1:{port}");

    let transport = ReqwestTransport::default();
    let err = transport
        .send(exchange(Method::Get, format!("{uri}/gone")))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportKind::Connect);
}
