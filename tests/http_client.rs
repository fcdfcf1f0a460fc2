mod common;

use std::time::{Duration, Instant};

use apicheck::engine::{CancelHandle, CancelSignal};
use apicheck::error::TransportErrorKind;
use apicheck::http::{ApiHttpClient, ClientConfig, ExecuteError, ExecuteOptions, HttpMethod, ResolvedBody, ResolvedRequest};
use common::{refused_url, spawn_stub};
use serde_json::json;

fn client() -> ApiHttpClient {
    ApiHttpClient::new(&ClientConfig::default()).unwrap()
}

fn get(url: String) -> ResolvedRequest {
    ResolvedRequest::new(HttpMethod::Get, url)
}

#[tokio::test]
async fn error_statuses_are_responses() {
    let stub = spawn_stub();
    let exchange = client()
        .execute(&get(stub.url("/status/503")), &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(exchange.response.status, 503);
    assert!(!exchange.response.is_transport_failure());
    assert_eq!(exchange.attempts, 1);
}

#[tokio::test]
async fn redirects_follow_only_when_asked() {
    let stub = spawn_stub();
    let client = client();

    let followed = client
        .execute(&get(stub.url("/redirect")), &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(followed.response.status, 200);
    assert_eq!(followed.response.json, Some(json!({ "status": "ok" })));

    let options = ExecuteOptions {
        follow_redirects: false,
        ..ExecuteOptions::default()
    };
    let direct = client
        .execute(&get(stub.url("/redirect")), &options, &CancelSignal::never())
        .await
        .unwrap();
    assert!((300..400).contains(&direct.response.status));
    assert_eq!(direct.response.header("location"), Some("/health"));
    assert_eq!(stub.paths(), vec!["/redirect", "/health", "/redirect"]);
}

#[tokio::test]
async fn oversized_bodies_are_truncated() {
    let stub = spawn_stub();
    let client = ApiHttpClient::new(&ClientConfig {
        max_body_bytes: 64,
        ..ClientConfig::default()
    })
    .unwrap();
    let exchange = client
        .execute(&get(stub.url("/large/4096")), &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap();
    assert!(exchange.response.truncated);
    assert_eq!(exchange.response.body.len(), 64);
}

#[tokio::test]
async fn headers_and_json_body_are_sent() {
    let stub = spawn_stub();
    let request = ResolvedRequest::new(HttpMethod::Post, stub.url("/items"))
        .with_header("X-Trace", "abc")
        .with_body(ResolvedBody::Json(json!({ "name": "bolt" })));
    let exchange = client()
        .execute(&request, &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(exchange.response.status, 201);

    let seen = stub.seen();
    assert_eq!(seen[0].headers.get("x-trace").map(String::as_str), Some("abc"));
    assert_eq!(seen[0].headers.get("content-type").map(String::as_str), Some("application/json"));
    assert_eq!(seen[0].body, r#"{"name":"bolt"}"#);
}

#[tokio::test]
async fn timeouts_are_transport_failures() {
    let stub = spawn_stub();
    let options = ExecuteOptions {
        timeout: Duration::from_millis(100),
        ..ExecuteOptions::default()
    };
    let exchange = client()
        .execute(&get(stub.url("/slow/1000")), &options, &CancelSignal::never())
        .await
        .unwrap();
    let error = exchange.response.transport_error.expect("transport error");
    assert_eq!(error.kind, TransportErrorKind::Timeout);
}

#[tokio::test]
async fn refused_connections_are_classified() {
    let exchange = client()
        .execute(&get(refused_url()), &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(
        exchange.response.transport_error.map(|e| e.kind),
        Some(TransportErrorKind::Connect)
    );
}

#[tokio::test]
async fn invalid_urls_are_request_errors() {
    let err = client()
        .execute(&get("not a url".to_string()), &ExecuteOptions::default(), &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecuteError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancellation_interrupts_a_send() {
    let stub = spawn_stub();
    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let err = client()
        .execute(&get(stub.url("/slow/2000")), &ExecuteOptions::default(), &signal)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecuteError::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(1));
}
