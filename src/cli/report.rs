use std::fmt::Write as _;
use std::io::{self, Write as _};

use crate::collections::ApiRequest;
use crate::engine::{ApiRequestResult, ApiTestRun, RequestStatus, RunObserver};

/// Prints one line per finished request to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressObserver;

impl RunObserver for ProgressObserver {
    fn request_started(&self, index: usize, request: &ApiRequest) {
        tracing::debug!(index, request = %request.name, "sending");
    }

    fn request_finished(&self, result: &ApiRequestResult) {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", result_line(result));
    }
}

fn result_line(result: &ApiRequestResult) -> String {
    let mark = match result.status {
        RequestStatus::Passed => "PASS",
        RequestStatus::Failed => "FAIL",
        RequestStatus::Error => "ERR ",
    };
    let status = result
        .response
        .as_ref()
        .filter(|r| r.transport_error.is_none())
        .map(|r| r.status.to_string())
        .unwrap_or_else(|| "---".into());
    format!("{mark} {status} {:>6}ms  {}", result.elapsed_ms, result.name)
}

/// Human-readable run report.
pub fn render_text(run: &ApiTestRun) -> String {
    let mut out = String::new();
    let summary = run.summary();
    let _ = writeln!(out, "{} ({}): {}", run.name(), run.origin(), run.status().to_string().to_uppercase());
    if let Some(env) = run.environment() {
        let _ = writeln!(out, "environment: {env}");
    }
    for result in run.results() {
        let _ = writeln!(out, "  {}", result_line(result));
        if let Some(failure) = &result.failure {
            let _ = writeln!(out, "      {failure}");
        }
        for assertion in result.failed_assertions() {
            let _ = writeln!(out, "      x {}: {}", assertion.description, assertion.message);
        }
        for miss in &result.extraction_misses {
            let _ = writeln!(out, "      ? {miss}");
        }
        if !result.unconverted_steps.is_empty() {
            let _ = writeln!(out, "      {} unconverted step(s) skipped", result.unconverted_steps.len());
        }
    }
    if let Some(reason) = run.reason() {
        let _ = writeln!(out, "{reason}");
    }
    let _ = writeln!(
        out,
        "requests: {} passed, {} failed, {} errored, {} not run | assertions: {}/{} passed | {}ms",
        summary.passed_requests,
        summary.failed_requests,
        summary.errored_requests,
        summary.total_requests - summary.executed_requests,
        summary.passed_assertions,
        summary.total_assertions,
        summary.duration_ms,
    );
    out
}
