use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collections::PassthroughStep;
use crate::environment::VariableMap;
use crate::error::{AssertionEvaluationError, ResolveError, TransportError};
use crate::http::{HttpResponse, ResolvedRequest};
use crate::testing::AssertionResult;

/// What kind of source a run executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    Collection,
    KarateFeature,
}

impl Display for RunOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOrigin::Collection => write!(f, "collection"),
            RunOrigin::KarateFeature => write!(f, "karate_feature"),
        }
    }
}

/// Lifecycle: `Pending -> Running -> {Passed | Failed | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed | RunStatus::Error)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Why a run ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RunReason {
    AllPassed { requests: usize },
    NoRequests,
    StoppedOnFailure { index: usize, request: String, cause: String },
    FailuresRecorded { failed: usize, total: usize },
    Cancelled { completed: usize },
    EngineFault { index: usize, request: String, message: String },
}

impl RunReason {
    pub fn code(&self) -> &'static str {
        match self {
            RunReason::AllPassed { .. } => "all_passed",
            RunReason::NoRequests => "no_requests",
            RunReason::StoppedOnFailure { .. } => "stopped_on_failure",
            RunReason::FailuresRecorded { .. } => "failures_recorded",
            RunReason::Cancelled { .. } => "cancelled",
            RunReason::EngineFault { .. } => "engine_fault",
        }
    }
}

impl Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunReason::AllPassed { requests } => write!(f, "all {requests} request(s) passed"),
            RunReason::NoRequests => write!(f, "nothing to run"),
            RunReason::StoppedOnFailure { index, request, cause } => {
                write!(f, "stopped at request #{} `{request}`: {cause}", index + 1)
            }
            RunReason::FailuresRecorded { failed, total } => {
                write!(f, "{failed} of {total} request(s) failed")
            }
            RunReason::Cancelled { completed } => {
                write!(f, "cancelled after {completed} completed request(s)")
            }
            RunReason::EngineFault { index, request, message } => {
                write!(f, "engine fault at request #{} `{request}`: {message}", index + 1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Passed,
    /// Assertion failures, transport errors and unresolved variables.
    Failed,
    /// The request's own definition is broken (malformed assertion).
    Error,
}

/// Why a single request did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestFailure {
    Transport { error: TransportError },
    UnresolvedVariables { names: Vec<String> },
    ResolutionTooDeep { name: String, limit: usize },
    InvalidRequest { message: String },
    AssertionsFailed { failed: usize, total: usize },
    InvalidAssertion { error: AssertionEvaluationError },
}

impl From<ResolveError> for RequestFailure {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unresolved { names } => RequestFailure::UnresolvedVariables { names },
            ResolveError::TooDeep { name, limit } => RequestFailure::ResolutionTooDeep { name, limit },
        }
    }
}

impl Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailure::Transport { error } => write!(f, "{error}"),
            RequestFailure::UnresolvedVariables { names } => {
                write!(f, "unresolved variable(s): {}", names.join(", "))
            }
            RequestFailure::ResolutionTooDeep { name, limit } => {
                write!(f, "variable `{name}` nests deeper than {limit} levels")
            }
            RequestFailure::InvalidRequest { message } => write!(f, "invalid request: {message}"),
            RequestFailure::AssertionsFailed { failed, total } => {
                write!(f, "{failed} of {total} assertion(s) failed")
            }
            RequestFailure::InvalidAssertion { error } => write!(f, "{error}"),
        }
    }
}

/// Outcome of one request in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestResult {
    pub index: usize,
    pub request_id: Uuid,
    pub name: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RequestFailure>,
    /// What was actually sent, when resolution got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub extracted: VariableMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction_misses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unconverted_steps: Vec<PassthroughStep>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ApiRequestResult {
    pub fn passed(&self) -> bool {
        self.status == RequestStatus::Passed
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertions.iter().filter(|a| !a.passed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_requests: usize,
    pub executed_requests: usize,
    pub passed_requests: usize,
    pub failed_requests: usize,
    pub errored_requests: usize,
    pub total_assertions: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
    pub duration_ms: u64,
}

/// A finished (or in-progress, when observed) execution of one source.
///
/// Runs are produced by the engine; callers only read them. Once terminal a
/// run never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTestRun {
    id: Uuid,
    name: String,
    origin: RunOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<RunReason>,
    total_requests: usize,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    results: Vec<ApiRequestResult>,
}

impl ApiTestRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> RunOrigin {
        self.origin
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&RunReason> {
        self.reason.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Results in execution order.
    pub fn results(&self) -> &[ApiRequestResult] {
        &self.results
    }

    pub fn result(&self, name: &str) -> Option<&ApiRequestResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => u64::try_from((end - start).num_milliseconds()).unwrap_or(0),
            _ => 0,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total_requests: self.total_requests,
            executed_requests: self.results.len(),
            duration_ms: self.duration_ms(),
            ..RunSummary::default()
        };
        for result in &self.results {
            match result.status {
                RequestStatus::Passed => summary.passed_requests += 1,
                RequestStatus::Failed => summary.failed_requests += 1,
                RequestStatus::Error => summary.errored_requests += 1,
            }
            summary.total_assertions += result.assertions.len();
            summary.passed_assertions += result.assertions.iter().filter(|a| a.passed).count();
        }
        summary.failed_assertions = summary.total_assertions - summary.passed_assertions;
        summary
    }
}

/// Builds an [`ApiTestRun`]. `finish` consumes the recorder, so a run is
/// terminated exactly once and nothing is appended afterwards.
#[derive(Debug)]
pub(crate) struct RunRecorder {
    run: ApiTestRun,
}

impl RunRecorder {
    pub(crate) fn new(name: String, origin: RunOrigin, environment: Option<String>, total_requests: usize) -> Self {
        Self {
            run: ApiTestRun {
                id: Uuid::new_v4(),
                name,
                origin,
                environment,
                status: RunStatus::Pending,
                reason: None,
                total_requests,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                results: Vec::new(),
            },
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.run.id
    }

    pub(crate) fn run(&self) -> &ApiTestRun {
        &self.run
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.run.status, RunStatus::Pending);
        self.run.status = RunStatus::Running;
        self.run.started_at = Some(Utc::now());
    }

    pub(crate) fn push(&mut self, result: ApiRequestResult) {
        debug_assert_eq!(self.run.status, RunStatus::Running);
        self.run.results.push(result);
    }

    pub(crate) fn completed(&self) -> usize {
        self.run.results.len()
    }

    pub(crate) fn finish(mut self, status: RunStatus, reason: RunReason) -> ApiTestRun {
        debug_assert!(status.is_terminal());
        self.run.status = status;
        self.run.reason = Some(reason);
        self.run.finished_at = Some(Utc::now());
        self.run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AssertionKind;

    fn result(index: usize, status: RequestStatus, assertions: &[bool]) -> ApiRequestResult {
        let now = Utc::now();
        ApiRequestResult {
            index,
            request_id: Uuid::new_v4(),
            name: format!("req-{index}"),
            status,
            failure: None,
            resolved: None,
            response: None,
            assertions: assertions
                .iter()
                .map(|passed| AssertionResult {
                    description: "status == 200".into(),
                    kind: AssertionKind::Status,
                    passed: *passed,
                    expected: None,
                    actual: None,
                    message: String::new(),
                })
                .collect(),
            extracted: VariableMap::new(),
            extraction_misses: Vec::new(),
            unconverted_steps: Vec::new(),
            attempts: 1,
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn recorder_walks_the_lifecycle() {
        let mut recorder = RunRecorder::new("smoke".into(), RunOrigin::Collection, None, 2);
        assert_eq!(recorder.run().status(), RunStatus::Pending);
        recorder.start();
        assert_eq!(recorder.run().status(), RunStatus::Running);
        recorder.push(result(0, RequestStatus::Passed, &[true, true]));
        recorder.push(result(1, RequestStatus::Failed, &[true, false]));
        assert_eq!(recorder.completed(), 2);

        let run = recorder.finish(RunStatus::Failed, RunReason::FailuresRecorded { failed: 1, total: 2 });
        assert!(run.is_finished());
        assert!(run.finished_at().is_some());

        let summary = run.summary();
        assert_eq!(summary.passed_requests, 1);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.total_assertions, 4);
        assert_eq!(summary.failed_assertions, 1);
    }

    #[test]
    fn reason_codes_are_stable() {
        let reason = RunReason::StoppedOnFailure {
            index: 0,
            request: "health".into(),
            cause: "1 of 1 assertion(s) failed".into(),
        };
        assert_eq!(reason.code(), "stopped_on_failure");
        assert_eq!(reason.to_string(), "stopped at request #1 `health`: 1 of 1 assertion(s) failed");
        let value = serde_json::to_value(&reason).unwrap();
        assert_eq!(value["code"], "stopped_on_failure");
    }

    #[test]
    fn resolve_errors_map_to_failures() {
        let failure = RequestFailure::from(ResolveError::Unresolved {
            names: vec!["token".into()],
        });
        assert_eq!(failure.to_string(), "unresolved variable(s): token");
    }
}
