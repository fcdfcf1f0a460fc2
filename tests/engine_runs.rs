mod common;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use apicheck::collections::{ApiCollection, ApiRequest};
use apicheck::engine::{
    ApiRequestResult, ApiTestEngine, ApiTestRun, CancelHandle, NoopObserver, RequestFailure, RequestStatus,
    RunConfig, RunObserver, RunReason, RunStatus,
};
use apicheck::environment::ApiEnvironment;
use apicheck::http::RetryPolicy;
use apicheck::testing::{AssertionKind, AssertionSpec, ExtractionRule, Operator};
use common::{refused_url, spawn_stub};
use serde_json::json;

fn engine() -> ApiTestEngine {
    ApiTestEngine::with_defaults().expect("client")
}

fn status_of(run: &ApiTestRun) -> Vec<RequestStatus> {
    run.results().iter().map(|r| r.status).collect()
}

#[tokio::test]
async fn chained_requests_share_captured_values() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("items")
        .with_base_url(stub.base_url())
        .with_header("X-Suite", "chained")
        .with_request(ApiRequest::get("health", "/health").with_assertion(AssertionSpec::body_equals("$.status", "ok")))
        .with_request(
            ApiRequest::post("create", "/items")
                .with_json(json!({ "name": "{{itemName}}" }))
                .with_assertion(AssertionSpec::status(201))
                .with_assertion(AssertionSpec::header("Location", Operator::Exists))
                .with_extraction(ExtractionRule::body("itemId", "$.id"))
                .with_extraction(ExtractionRule::header("itemUrl", "Location")),
        )
        .with_request(
            ApiRequest::get("fetch", "{{itemUrl}}")
                .with_query("verbose", "{{verbose}}")
                .with_assertion(AssertionSpec::status(200))
                .with_assertion(AssertionSpec::body_equals("$.name", "widget"))
                .with_assertion(AssertionSpec::body_equals("$.tags[1]", "b")),
        );
    let env = ApiEnvironment::new("local")
        .with_variable("itemName", "gadget")
        .with_variable("verbose", true);

    let run = engine().run(&collection, Some(&env), &RunConfig::default()).await;

    assert_eq!(run.status(), RunStatus::Passed, "{:?}", run.reason());
    assert_eq!(run.reason(), Some(&RunReason::AllPassed { requests: 3 }));
    assert_eq!(run.environment(), Some("local"));
    let create = run.result("create").unwrap();
    assert_eq!(create.extracted.get("itemId"), Some(&json!(1)));
    assert_eq!(create.extracted.get("itemUrl"), Some(&json!("/items/1")));

    let seen = stub.seen();
    assert_eq!(
        seen.iter().map(|s| s.path.as_str()).collect::<Vec<_>>(),
        vec!["/health", "/items", "/items/1?verbose=true"]
    );
    assert_eq!(seen[1].body, r#"{"name":"gadget"}"#);
    assert_eq!(seen[1].headers.get("x-suite").map(String::as_str), Some("chained"));

    let summary = run.summary();
    assert_eq!(summary.passed_requests, 3);
    assert_eq!(summary.total_assertions, 6);
    assert_eq!(summary.failed_assertions, 0);
}

#[tokio::test]
async fn stops_on_first_failure_by_default() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("stop")
        .with_base_url(stub.base_url())
        .with_request(ApiRequest::get("broken", "/status/500").with_assertion(AssertionSpec::status(200)))
        .with_request(ApiRequest::get("health", "/health"));

    let run = engine().run(&collection, None, &RunConfig::default()).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.results().len(), 1);
    assert!(matches!(run.reason(), Some(RunReason::StoppedOnFailure { index: 0, .. })));
    assert_eq!(run.summary().total_requests - run.summary().executed_requests, 1);
    assert_eq!(stub.paths(), vec!["/status/500"]);
}

#[tokio::test]
async fn continue_on_failure_runs_everything() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("continue")
        .with_base_url(stub.base_url())
        .with_request(ApiRequest::get("missing", "/status/404").with_assertion(AssertionSpec::status(200)))
        .with_request(ApiRequest::get("health", "/health").with_assertion(AssertionSpec::status(200)));

    let run = engine()
        .run(&collection, None, &RunConfig::default().continue_on_failure())
        .await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(status_of(&run), vec![RequestStatus::Failed, RequestStatus::Passed]);
    assert_eq!(run.reason(), Some(&RunReason::FailuresRecorded { failed: 1, total: 2 }));
    // a 4xx is an observed response, not a transport failure
    let missing = run.result("missing").unwrap();
    assert_eq!(missing.response.as_ref().map(|r| r.status), Some(404));
    assert_eq!(missing.failure, Some(RequestFailure::AssertionsFailed { failed: 1, total: 1 }));
}

#[tokio::test]
async fn captures_only_flow_forward() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("forward")
        .with_base_url(stub.base_url())
        .with_request(ApiRequest::get("early", "/items/{{itemId}}"))
        .with_request(
            ApiRequest::post("create", "/items")
                .with_json(json!({ "name": "x" }))
                .with_extraction(ExtractionRule::body("itemId", "$.id")),
        );

    let run = engine()
        .run(&collection, None, &RunConfig::default().continue_on_failure())
        .await;

    let early = run.result("early").unwrap();
    assert_eq!(early.status, RequestStatus::Failed);
    assert_eq!(
        early.failure,
        Some(RequestFailure::UnresolvedVariables {
            names: vec!["itemId".into()]
        })
    );
    assert!(early.response.is_none());
    assert_eq!(run.result("create").unwrap().status, RequestStatus::Passed);
    assert_eq!(stub.paths(), vec!["/items"]);
}

#[tokio::test]
async fn every_assertion_gets_a_result() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("totality").with_base_url(stub.base_url()).with_request(
        ApiRequest::get("health", "/health")
            .with_assertion(AssertionSpec::status(201))
            .with_assertion(AssertionSpec::body_contains("ok"))
            .with_assertion(AssertionSpec::header("content-type", Operator::Contains).expecting("json"))
            .with_assertion(AssertionSpec::response_time(10_000))
            .with_extraction(ExtractionRule::body("nothing", "$.absent")),
    );

    let run = engine().run(&collection, None, &RunConfig::default()).await;

    let result = run.result("health").unwrap();
    let passed: Vec<bool> = result.assertions.iter().map(|a| a.passed).collect();
    assert_eq!(passed, vec![false, true, true, true]);
    assert_eq!(result.assertions[3].kind, AssertionKind::ResponseTime);
    assert_eq!(result.extraction_misses, vec!["nothing".to_string()]);
    assert!(result.extracted.is_empty());
}

#[tokio::test]
async fn transport_failure_fails_only_that_request() {
    let stub = spawn_stub();
    let refused = refused_url();
    let collection = ApiCollection::new("transport")
        .with_request(ApiRequest::get("first", stub.url("/health")).with_assertion(AssertionSpec::status(200)))
        .with_request(
            ApiRequest::get("down", format!("{refused}/health"))
                .with_assertion(AssertionSpec::status(200))
                .with_assertion(AssertionSpec::body_exists("$.status")),
        )
        .with_request(ApiRequest::get("third", stub.url("/health")));

    let run = engine().run(&collection, None, &RunConfig::default()).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.results().len(), 2);
    let down = run.result("down").unwrap();
    assert!(matches!(down.failure, Some(RequestFailure::Transport { .. })));
    assert_eq!(down.attempts, 1);
    assert_eq!(down.assertions.len(), 2);
    assert!(down.assertions.iter().all(|a| !a.passed));
}

#[tokio::test]
async fn absolute_urls_skip_the_collection_base() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("absolute")
        .with_base_url("{{base}}")
        .with_request(ApiRequest::get("direct", stub.url("/health")).with_assertion(AssertionSpec::status(200)))
        .with_request(ApiRequest::get("down", format!("{}/x", refused_url())));

    let run = engine()
        .run(&collection, None, &RunConfig::default().continue_on_failure())
        .await;

    assert!(run.result("direct").unwrap().passed());
    let down = run.result("down").unwrap();
    assert!(matches!(down.failure, Some(RequestFailure::Transport { .. })), "{:?}", down.failure);
}

#[tokio::test]
async fn malformed_assertion_is_an_engine_fault() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("fault")
        .with_base_url(stub.base_url())
        .with_request(
            ApiRequest::get("bad", "/health").with_assertion(AssertionSpec::new(AssertionKind::Unknown, Operator::Equals)),
        )
        .with_request(ApiRequest::get("health", "/health"));

    let run = engine()
        .run(&collection, None, &RunConfig::default().continue_on_failure())
        .await;

    assert_eq!(run.status(), RunStatus::Error);
    assert!(matches!(run.reason(), Some(RunReason::EngineFault { index: 0, .. })));
    assert_eq!(status_of(&run), vec![RequestStatus::Error]);
    assert!(stub.paths().is_empty());
}

#[tokio::test]
async fn empty_collection_passes() {
    let run = engine().run(&ApiCollection::new("empty"), None, &RunConfig::default()).await;
    assert_eq!(run.status(), RunStatus::Passed);
    assert_eq!(run.reason(), Some(&RunReason::NoRequests));
    assert!(run.finished_at().is_some());
}

struct CancelAfterFirst {
    handle: CancelHandle,
    finished: Mutex<Vec<String>>,
}

impl RunObserver for CancelAfterFirst {
    fn request_finished(&self, result: &ApiRequestResult) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.push(result.name.clone());
        }
        self.handle.cancel();
    }
}

#[tokio::test]
async fn cancellation_is_observed_between_requests() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("cancel")
        .with_base_url(stub.base_url())
        .with_request(ApiRequest::get("one", "/health"))
        .with_request(ApiRequest::get("two", "/health"))
        .with_request(ApiRequest::get("three", "/health"));
    let handle = CancelHandle::new();
    let observer = CancelAfterFirst {
        handle: handle.clone(),
        finished: Mutex::new(Vec::new()),
    };

    let run = engine()
        .run_with(&collection, None, &RunConfig::default(), &handle.signal(), &observer)
        .await;

    assert_eq!(run.status(), RunStatus::Error);
    assert_eq!(run.reason(), Some(&RunReason::Cancelled { completed: 1 }));
    assert_eq!(run.results().len(), 1);
    assert_eq!(stub.paths(), vec!["/health"]);
}

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("cancel").with_request(ApiRequest::get("one", stub.url("/health")));
    let handle = CancelHandle::new();
    handle.cancel();

    let run = engine()
        .run_with(&collection, None, &RunConfig::default(), &handle.signal(), &NoopObserver)
        .await;

    assert_eq!(run.reason(), Some(&RunReason::Cancelled { completed: 0 }));
    assert!(run.results().is_empty());
    assert!(stub.paths().is_empty());
}

#[tokio::test]
async fn in_flight_request_can_be_interrupted() {
    let stub = spawn_stub();
    let collection = ApiCollection::new("slow").with_request(ApiRequest::get("slow", stub.url("/slow/1500")));
    let handle = CancelHandle::new();
    let trigger = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let config = RunConfig::default().interrupting_in_flight();
    let run = engine()
        .run_with(&collection, None, &config, &handle.signal(), &NoopObserver)
        .await;

    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert_eq!(run.reason(), Some(&RunReason::Cancelled { completed: 0 }));
}

#[tokio::test]
async fn retries_are_counted_on_transport_errors() {
    let collection = ApiCollection::new("retry").with_request(ApiRequest::get("down", format!("{}/x", refused_url())));
    let config = RunConfig::default().with_retry(RetryPolicy::attempts(3).with_backoff(1, 2.0, 5));

    let run = engine().run(&collection, None, &config).await;

    assert_eq!(run.results()[0].attempts, 3);
    assert_eq!(run.status(), RunStatus::Failed);
}

#[tokio::test]
async fn concurrent_runs_are_isolated() {
    let stub = spawn_stub();
    let engine = engine();
    let make = |name: &str, value: &str| {
        ApiCollection::new(name)
            .with_base_url(stub.base_url())
            .with_variable("itemName", value)
            .with_request(
                ApiRequest::post("create", "/items")
                    .with_json(json!({ "name": "{{itemName}}" }))
                    .with_assertion(AssertionSpec::body_equals("$.name", value)),
            )
    };
    let first = make("first", "alpha");
    let second = make("second", "beta");

    let config = RunConfig::default();
    let (a, b) = tokio::join!(engine.run(&first, None, &config), engine.run(&second, None, &config));

    assert!(a.passed() && b.passed());
    assert_ne!(a.id(), b.id());
    let mut bodies: Vec<String> = stub.seen().into_iter().map(|s| s.body).collect();
    bodies.sort();
    assert_eq!(bodies, vec![r#"{"name":"alpha"}"#, r#"{"name":"beta"}"#]);
}
