use super::run::{ApiRequestResult, ApiTestRun};
use crate::collections::ApiRequest;

/// Progress callbacks. Invoked on the task driving the run, in order.
pub trait RunObserver: Send + Sync {
    fn run_started(&self, _run: &ApiTestRun) {}

    fn request_started(&self, _index: usize, _request: &ApiRequest) {}

    fn request_finished(&self, _result: &ApiRequestResult) {}

    fn run_finished(&self, _run: &ApiTestRun) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
