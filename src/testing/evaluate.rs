use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::assertion::{AssertionKind, AssertionSpec};
use super::compile::{Check, CompiledAssertion, StatusCheck, TextCheck, ValueCheck, scalar_text};
use crate::error::AssertionEvaluationError;
use crate::http::HttpResponse;

const MAX_ACTUAL_TEXT: usize = 256;

/// Outcome of a single assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub description: String,
    pub kind: AssertionKind,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub message: String,
}

/// Evaluates assertions against a response.
///
/// Evaluation is total: every compiled assertion yields exactly one result
/// and a failing check never stops the ones after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionEngine;

impl AssertionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Validate every spec up front. The first malformed one is reported
    /// with its position.
    pub fn compile(&self, specs: &[AssertionSpec]) -> Result<Vec<CompiledAssertion>, AssertionEvaluationError> {
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                CompiledAssertion::compile(spec).map_err(|message| AssertionEvaluationError { index, message })
            })
            .collect()
    }

    pub fn evaluate(
        &self,
        specs: &[AssertionSpec],
        response: &HttpResponse,
    ) -> Result<Vec<AssertionResult>, AssertionEvaluationError> {
        let compiled = self.compile(specs)?;
        Ok(self.evaluate_compiled(&compiled, response))
    }

    pub fn evaluate_compiled(&self, compiled: &[CompiledAssertion], response: &HttpResponse) -> Vec<AssertionResult> {
        compiled
            .iter()
            .map(|assertion| evaluate_one(assertion, response))
            .collect()
    }

    /// Failed results for assertions that never saw a response.
    pub fn not_evaluated(&self, compiled: &[CompiledAssertion], reason: &str) -> Vec<AssertionResult> {
        compiled
            .iter()
            .map(|assertion| AssertionResult {
                description: assertion.description.clone(),
                kind: assertion.kind,
                passed: false,
                expected: expected_of(&assertion.check),
                actual: None,
                message: format!("not evaluated: {reason}"),
            })
            .collect()
    }
}

fn evaluate_one(assertion: &CompiledAssertion, response: &HttpResponse) -> AssertionResult {
    let (passed, actual, message) = match &assertion.check {
        Check::Status(check) => {
            let status = response.status;
            let passed = match check {
                StatusCheck::Equals(code) => status == *code,
                StatusCheck::NotEquals(code) => status != *code,
                StatusCheck::In(codes) => codes.contains(&status),
                StatusCheck::Range(low, high) => (*low..=*high).contains(&status),
            };
            (passed, Some(json!(status)), format!("status was {status}"))
        }
        Check::Header { name, check } => {
            let actual = response.header(name);
            let message = match actual {
                Some(value) => format!("header {name} was {value:?}"),
                None => format!("header {name} is absent"),
            };
            (text_passes(check, actual), actual.map(|v| json!(v)), message)
        }
        Check::BodyPath { path, check } => match &response.json {
            Some(document) => {
                let actual = path.lookup(document);
                let message = match actual {
                    Some(value) => format!("{path} was {value}"),
                    None => format!("{path} not found"),
                };
                (value_passes(check, actual), actual.cloned(), message)
            }
            None => (
                matches!(check, ValueCheck::NotExists),
                None,
                "response body is not JSON".to_string(),
            ),
        },
        Check::BodyText(check) => {
            let text = response.text();
            let passed = text_passes(check, Some(&text));
            let shown = truncate(&text, MAX_ACTUAL_TEXT);
            let message = format!("body was {} bytes", response.body.len());
            (passed, Some(json!(shown)), message)
        }
        Check::ResponseTime { max_ms } => {
            let elapsed = response.elapsed_ms;
            (
                elapsed <= *max_ms,
                Some(json!(elapsed)),
                format!("response took {elapsed}ms"),
            )
        }
    };

    let message = if passed {
        "ok".to_string()
    } else {
        format!("expected {}, but {message}", assertion.check)
    };

    AssertionResult {
        description: assertion.description.clone(),
        kind: assertion.kind,
        passed,
        expected: expected_of(&assertion.check),
        actual,
        message,
    }
}

fn text_passes(check: &TextCheck, actual: Option<&str>) -> bool {
    match check {
        TextCheck::Exists => actual.is_some(),
        TextCheck::NotExists => actual.is_none(),
        TextCheck::Equals(expected) => actual == Some(expected.as_str()),
        TextCheck::NotEquals(expected) => actual != Some(expected.as_str()),
        TextCheck::Contains(expected) => actual.is_some_and(|text| text.contains(expected.as_str())),
        TextCheck::NotContains(expected) => !actual.is_some_and(|text| text.contains(expected.as_str())),
        TextCheck::Matches(re) => actual.is_some_and(|text| re.is_match(text)),
    }
}

fn value_passes(check: &ValueCheck, actual: Option<&Value>) -> bool {
    match check {
        ValueCheck::Exists => actual.is_some(),
        ValueCheck::NotExists => actual.is_none(),
        ValueCheck::Equals(expected) => actual.is_some_and(|value| values_equal(value, expected)),
        ValueCheck::NotEquals(expected) => !actual.is_some_and(|value| values_equal(value, expected)),
        ValueCheck::OneOf(options) => {
            actual.is_some_and(|value| options.iter().any(|option| values_equal(value, option)))
        }
        ValueCheck::Contains(expected) => actual.is_some_and(|value| contains(value, expected)),
        ValueCheck::NotContains(expected) => !actual.is_some_and(|value| contains(value, expected)),
        ValueCheck::Matches(re) => actual.is_some_and(|value| re.is_match(&scalar_text(value))),
        ValueCheck::TypeIs(ty) => actual.is_some_and(|value| ty.matches(value)),
        ValueCheck::GreaterThan(limit) => actual.and_then(as_number).is_some_and(|n| n > *limit),
        ValueCheck::LessThan(limit) => actual.and_then(as_number).is_some_and(|n| n < *limit),
    }
}

/// JSON equality, plus numeric equality across integer/float and a scalar
/// compared against its string spelling.
pub(crate) fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(_) | Value::Bool(_), Value::String(text)) => actual.to_string() == *text,
        (Value::String(text), Value::Number(_) | Value::Bool(_)) => *text == expected.to_string(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}

/// Substring for strings, membership for arrays, key or subset for objects.
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(text), expected) => text.contains(scalar_text(expected).as_str()),
        (Value::Array(items), Value::Array(wanted)) => {
            wanted.iter().all(|w| items.iter().any(|item| values_equal(item, w)))
        }
        (Value::Array(items), expected) => items.iter().any(|item| values_equal(item, expected)),
        (Value::Object(fields), Value::String(key)) => fields.contains_key(key),
        (Value::Object(fields), Value::Object(subset)) => subset
            .iter()
            .all(|(key, value)| fields.get(key).is_some_and(|actual| values_equal(actual, value))),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn expected_of(check: &Check) -> Option<Value> {
    match check {
        Check::Status(StatusCheck::Equals(code)) | Check::Status(StatusCheck::NotEquals(code)) => Some(json!(code)),
        Check::Status(StatusCheck::In(codes)) => Some(json!(codes)),
        Check::Status(StatusCheck::Range(low, high)) => Some(json!([low, high])),
        Check::Header { check, .. } | Check::BodyText(check) => match check {
            TextCheck::Exists | TextCheck::NotExists => None,
            TextCheck::Equals(text)
            | TextCheck::NotEquals(text)
            | TextCheck::Contains(text)
            | TextCheck::NotContains(text) => Some(json!(text)),
            TextCheck::Matches(re) => Some(json!(re.as_str())),
        },
        Check::BodyPath { check, .. } => match check {
            ValueCheck::Exists | ValueCheck::NotExists => None,
            ValueCheck::Equals(value)
            | ValueCheck::NotEquals(value)
            | ValueCheck::Contains(value)
            | ValueCheck::NotContains(value) => Some(value.clone()),
            ValueCheck::OneOf(values) => Some(Value::Array(values.clone())),
            ValueCheck::Matches(re) => Some(json!(re.as_str())),
            ValueCheck::TypeIs(ty) => Some(json!(ty.as_str())),
            ValueCheck::GreaterThan(n) | ValueCheck::LessThan(n) => Some(json!(n)),
        },
        Check::ResponseTime { max_ms } => Some(json!(max_ms)),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseHeaders;
    use crate::testing::Operator;
    use bytes::Bytes;
    use std::time::Duration;

    fn response(status: u16, body: &str) -> HttpResponse {
        let headers: ResponseHeaders = [("Content-Type", "application/json"), ("X-Trace", "abc-123")]
            .into_iter()
            .collect();
        HttpResponse::from_parts(status, headers, Bytes::from(body.to_string()), Duration::from_millis(40))
    }

    fn run(specs: &[AssertionSpec], response: &HttpResponse) -> Vec<AssertionResult> {
        AssertionEngine::new().evaluate(specs, response).unwrap()
    }

    #[test]
    fn every_assertion_yields_a_result() {
        let resp = response(404, r#"{"error": "missing"}"#);
        let results = run(
            &[
                AssertionSpec::status(200),
                AssertionSpec::body_equals("$.error", "missing"),
                AssertionSpec::body_exists("$.id"),
            ],
            &resp,
        );
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.passed).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(results[0].actual, Some(json!(404)));
        assert_eq!(results[0].message, "expected status == 200, but status was 404");
    }

    #[test]
    fn status_membership_and_range() {
        let resp = response(201, "{}");
        let results = run(
            &[AssertionSpec::status_in(&[200, 201]), AssertionSpec::status_range(200, 299)],
            &resp,
        );
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn header_checks_are_case_insensitive() {
        let resp = response(200, "{}");
        let results = run(
            &[
                AssertionSpec::header("content-type", Operator::Contains).expecting("json"),
                AssertionSpec::header("x-trace", Operator::Matches).expecting(r"^abc-\d+$"),
                AssertionSpec::header("X-Missing", Operator::NotExists),
                AssertionSpec::header("X-Missing", Operator::Exists),
            ],
            &resp,
        );
        assert_eq!(
            results.iter().map(|r| r.passed).collect::<Vec<_>>(),
            vec![true, true, true, false]
        );
    }

    #[test]
    fn body_path_operators() {
        let resp = response(200, r#"{"id": 5, "name": "widget", "tags": ["a", "b"], "price": 9.5}"#);
        let results = run(
            &[
                AssertionSpec::body_equals("$.id", 5.0),
                AssertionSpec::body_equals("$.id", "5"),
                AssertionSpec::body_path("$.tags", Operator::Contains).expecting("b"),
                AssertionSpec::body_path("$.name", Operator::Matches).expecting("^wid"),
                AssertionSpec::body_path("$.name", Operator::TypeIs).expecting("string"),
                AssertionSpec::body_path("$.price", Operator::GreaterThan).expecting(9),
                AssertionSpec::body_path("$.price", Operator::LessThan).expecting(9),
                AssertionSpec::body_path("$.nope", Operator::NotExists),
                AssertionSpec::body_path("$", Operator::Contains).expecting(json!({ "name": "widget" })),
            ],
            &resp,
        );
        assert_eq!(
            results.iter().map(|r| r.passed).collect::<Vec<_>>(),
            vec![true, true, true, true, true, true, false, true, true]
        );
    }

    #[test]
    fn body_path_on_non_json_body() {
        let resp = response(200, "plain text");
        let results = run(
            &[AssertionSpec::body_exists("$.id"), AssertionSpec::body_path("$.id", Operator::NotExists)],
            &resp,
        );
        assert!(!results[0].passed);
        assert!(results[0].message.contains("not JSON"));
        assert!(results[1].passed);
    }

    #[test]
    fn body_text_and_timing() {
        let resp = response(200, "hello world");
        let results = run(
            &[
                AssertionSpec::body_contains("world"),
                AssertionSpec::response_time(40),
                AssertionSpec::response_time(39),
            ],
            &resp,
        );
        assert_eq!(
            results.iter().map(|r| r.passed).collect::<Vec<_>>(),
            vec![true, true, false]
        );
    }

    #[test]
    fn malformed_assertion_reports_index() {
        let resp = response(200, "{}");
        let err = AssertionEngine::new()
            .evaluate(
                &[
                    AssertionSpec::status(200),
                    AssertionSpec::new(AssertionKind::Status, Operator::Equals).expecting("abc"),
                ],
                &resp,
            )
            .unwrap_err();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn not_evaluated_results_fail() {
        let engine = AssertionEngine::new();
        let compiled = engine.compile(&[AssertionSpec::status(200)]).unwrap();
        let results = engine.not_evaluated(&compiled, "connect error");
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].message, "not evaluated: connect error");
    }

    #[test]
    fn long_bodies_are_truncated_in_actual() {
        let body = "é".repeat(300);
        let resp = response(200, &body);
        let results = run(&[AssertionSpec::body_contains("zzz")], &resp);
        let shown = results[0].actual.as_ref().and_then(Value::as_str).unwrap();
        assert!(shown.ends_with("..."));
        assert!(shown.len() <= MAX_ACTUAL_TEXT + 3);
    }
}
