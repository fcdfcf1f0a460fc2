//! In-process HTTP stub for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::runtime::Builder;
use tokio::sync::oneshot;

/// One request the stub saw.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Clone, Default)]
struct StubState {
    seen: Arc<Mutex<Vec<Seen>>>,
    next_id: Arc<AtomicU64>,
}

pub struct StubServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl StubServer {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().map_or_else(|_| Vec::new(), |entries| entries.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.path).collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Routes:
/// - `GET /health` -> `{"status": "ok"}`
/// - `POST /items` -> 201 `{"id": n, "name": <body.name>}`, `Location` header
/// - `GET /items/{id}` -> 200 for ids handed out by `POST /items`, else 404
/// - `GET /status/{code}` -> that status, empty body
/// - `GET /slow/{ms}` -> sleeps, then 200
/// - `GET /redirect` -> redirects to `/health`
/// - `GET /large/{bytes}` -> that many `x` bytes
/// - `GET /echo` -> request headers as JSON
pub fn spawn_stub() -> StubServer {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("stub bind");
    listener.set_nonblocking(true).expect("stub nonblocking");
    let addr = listener.local_addr().expect("stub addr");

    let state = StubState::default();
    let seen = Arc::clone(&state.seen);
    let app = Router::new()
        .route("/health", get(health))
        .route("/items", post(create_item))
        .route("/items/{id}", get(get_item))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
        .route("/redirect", get(|| async { Redirect::to("/health") }))
        .route("/large/{bytes}", get(large))
        .route("/echo", get(echo))
        .layer(axum::middleware::from_fn_with_state(state.clone(), record))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = thread::spawn(move || {
        let Ok(runtime) = Builder::new_current_thread().enable_all().build() else {
            return;
        };
        runtime.block_on(async move {
            let Ok(listener) = tokio::net::TcpListener::from_std(listener) else {
                return;
            };
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });
    });

    StubServer {
        base_url: format!("http://{addr}"),
        shutdown: Some(shutdown_tx),
        join: Some(join),
        seen,
    }
}

/// A local port with nothing listening on it.
pub fn refused_url() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

async fn record(
    State(state): State<StubState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, 1 << 20).await.unwrap_or_default();
    let headers = parts
        .headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    if let Ok(mut seen) = state.seen.lock() {
        seen.push(Seen {
            method: parts.method.to_string(),
            path: parts.uri.path_and_query().map(|p| p.to_string()).unwrap_or_default(),
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    let request = axum::extract::Request::from_parts(parts, axum::body::Body::from(bytes));
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_item(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let name = body.get("name").cloned().unwrap_or(Value::Null);
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/items/{id}"))],
        Json(json!({ "id": id, "name": name })),
    )
        .into_response()
}

async fn get_item(State(state): State<StubState>, Path(id): Path<u64>) -> Response {
    if id == 0 || id > state.next_id.load(Ordering::SeqCst) {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response();
    }
    Json(json!({ "id": id, "name": "widget", "tags": ["a", "b"] })).into_response()
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "slept_ms": ms }))
}

async fn large(Path(bytes): Path<usize>) -> String {
    "x".repeat(bytes)
}

async fn echo(headers: HeaderMap) -> Json<Value> {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned())))
        .collect();
    Json(Value::Object(map))
}
