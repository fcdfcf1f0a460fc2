use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{Instrument, debug, info, info_span, warn};

use super::cancel::CancelSignal;
use super::config::{FailurePolicy, RunConfig};
use super::executable::Executable;
use super::observer::{NoopObserver, RunObserver};
use super::prepare::{PrepareError, prepare_request};
use super::run::{ApiRequestResult, ApiTestRun, RequestFailure, RequestStatus, RunReason, RunRecorder, RunStatus};
use crate::collections::{ApiCollection, ApiRequest};
use crate::environment::{ApiEnvironment, ScopeStack, VariableMap, VariableResolver};
use crate::error::{Cancelled, ClientError};
use crate::http::client::{ApiHttpClient, ClientConfig, ExecuteError, ExecuteOptions};
use crate::http::response::duration_ms;
use crate::testing::{AssertionEngine, extract_all};

/// Runs collections (and anything that reduces to one) request by request.
///
/// The engine holds no per-run state; one instance can drive any number of
/// concurrent runs.
#[derive(Debug, Clone)]
pub struct ApiTestEngine {
    client: ApiHttpClient,
    resolver: VariableResolver,
    assertions: AssertionEngine,
}

impl ApiTestEngine {
    pub fn new(client: ApiHttpClient) -> Self {
        Self {
            client,
            resolver: VariableResolver::new(),
            assertions: AssertionEngine::new(),
        }
    }

    pub fn with_defaults() -> Result<Self, ClientError> {
        Ok(Self::new(ApiHttpClient::new(&ClientConfig::default())?))
    }

    pub fn client(&self) -> &ApiHttpClient {
        &self.client
    }

    pub async fn run<E>(&self, source: &E, environment: Option<&ApiEnvironment>, config: &RunConfig) -> ApiTestRun
    where
        E: Executable + ?Sized,
    {
        self.run_with(source, environment, config, &CancelSignal::never(), &NoopObserver)
            .await
    }

    pub async fn run_with<E>(
        &self,
        source: &E,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
        cancel: &CancelSignal,
        observer: &dyn RunObserver,
    ) -> ApiTestRun
    where
        E: Executable + ?Sized,
    {
        let collection = source.to_collection();
        let recorder = RunRecorder::new(
            collection.name.clone(),
            source.origin(),
            environment.map(|env| env.name.clone()),
            collection.requests.len(),
        );
        let span = info_span!(
            "api_run",
            run_id = %recorder.id(),
            name = %collection.name,
            origin = %source.origin(),
        );
        self.drive(recorder, &collection, environment, config, cancel, observer)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        mut recorder: RunRecorder,
        collection: &ApiCollection,
        environment: Option<&ApiEnvironment>,
        config: &RunConfig,
        cancel: &CancelSignal,
        observer: &dyn RunObserver,
    ) -> ApiTestRun {
        recorder.start();
        observer.run_started(recorder.run());
        info!(requests = collection.requests.len(), environment = ?environment.map(|e| &e.name), "run started");

        let mut scopes = ScopeStack::new(
            config.default_variables.clone(),
            collection.variables.clone(),
            environment.map(ApiEnvironment::variable_map).unwrap_or_default(),
        );

        let total = collection.requests.len();
        let mut failed = 0;
        let mut ended: Option<(RunStatus, RunReason)> = None;

        for (index, request) in collection.requests.iter().enumerate() {
            if cancel.is_cancelled() {
                ended = Some(cancelled(recorder.completed()));
                break;
            }
            observer.request_started(index, request);

            let result = match self
                .execute_request(index, request, collection, environment, &scopes, config, cancel)
                .await
            {
                Ok(result) => result,
                Err(Cancelled) => {
                    ended = Some(cancelled(recorder.completed()));
                    break;
                }
            };

            for (name, value) in &result.extracted {
                scopes.capture(name.clone(), value.clone());
            }

            let status = result.status;
            let cause = result.failure.as_ref().map(ToString::to_string).unwrap_or_default();
            observer.request_finished(&result);
            recorder.push(result);

            match status {
                RequestStatus::Passed => {}
                RequestStatus::Error => {
                    ended = Some((
                        RunStatus::Error,
                        RunReason::EngineFault {
                            index,
                            request: request.name.clone(),
                            message: cause,
                        },
                    ));
                    break;
                }
                RequestStatus::Failed => {
                    failed += 1;
                    if config.failure_policy == FailurePolicy::StopOnFirstFailure {
                        ended = Some((
                            RunStatus::Failed,
                            RunReason::StoppedOnFailure {
                                index,
                                request: request.name.clone(),
                                cause,
                            },
                        ));
                        break;
                    }
                }
            }
        }

        let (status, reason) = ended.unwrap_or_else(|| {
            if failed > 0 {
                (RunStatus::Failed, RunReason::FailuresRecorded { failed, total })
            } else if total == 0 {
                (RunStatus::Passed, RunReason::NoRequests)
            } else {
                (RunStatus::Passed, RunReason::AllPassed { requests: total })
            }
        });

        let run = recorder.finish(status, reason);
        info!(
            status = %run.status(),
            reason = run.reason().map(|r| r.code()).unwrap_or_default(),
            duration_ms = run.duration_ms(),
            "run finished"
        );
        observer.run_finished(&run);
        run
    }

    /// One request: compile assertions, resolve, send, evaluate, extract.
    /// Only cancellation escapes as an error.
    #[allow(clippy::too_many_arguments)]
    async fn execute_request(
        &self,
        index: usize,
        request: &ApiRequest,
        collection: &ApiCollection,
        environment: Option<&ApiEnvironment>,
        scopes: &ScopeStack,
        config: &RunConfig,
        cancel: &CancelSignal,
    ) -> Result<ApiRequestResult, Cancelled> {
        let clock = Instant::now();
        let mut result = ApiRequestResult {
            index,
            request_id: request.id,
            name: request.name.clone(),
            status: RequestStatus::Passed,
            failure: None,
            resolved: None,
            response: None,
            assertions: Vec::new(),
            extracted: VariableMap::new(),
            extraction_misses: Vec::new(),
            unconverted_steps: request.passthrough.clone(),
            attempts: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            elapsed_ms: 0,
        };

        if !request.passthrough.is_empty() {
            warn!(
                request = %request.name,
                steps = request.passthrough.len(),
                "request carries unconverted steps that need manual review"
            );
        }

        let compiled = match self.assertions.compile(&request.assertions) {
            Ok(compiled) => compiled,
            Err(error) => {
                warn!(request = %request.name, %error, "malformed assertion");
                return Ok(finish(
                    result,
                    RequestStatus::Error,
                    Some(RequestFailure::InvalidAssertion { error }),
                    clock,
                ));
            }
        };

        let resolved = match prepare_request(&self.resolver, scopes, collection, environment, request) {
            Ok(resolved) => resolved,
            Err(err) => {
                let failure = match err {
                    PrepareError::Resolve(err) => RequestFailure::from(err),
                    PrepareError::Invalid(err) => RequestFailure::InvalidRequest { message: err.message },
                };
                warn!(request = %request.name, %failure, "request not sent");
                result.assertions = self.assertions.not_evaluated(&compiled, &failure.to_string());
                return Ok(finish(result, RequestStatus::Failed, Some(failure), clock));
            }
        };

        let options = ExecuteOptions {
            timeout: request
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.default_timeout()),
            follow_redirects: request.follow_redirects.unwrap_or(config.follow_redirects),
            retry: config.retry.clone(),
        };
        debug!(request = %request.name, method = %resolved.method, url = %resolved.url, "sending");

        let never = CancelSignal::never();
        let in_flight = if config.interrupt_in_flight { cancel } else { &never };
        let exchange = match self.client.execute(&resolved, &options, in_flight).await {
            Ok(exchange) => exchange,
            Err(ExecuteError::Cancelled(cancelled)) => return Err(cancelled),
            Err(ExecuteError::InvalidRequest(err)) => {
                let failure = RequestFailure::InvalidRequest { message: err.message };
                result.assertions = self.assertions.not_evaluated(&compiled, &failure.to_string());
                result.resolved = Some(resolved);
                return Ok(finish(result, RequestStatus::Failed, Some(failure), clock));
            }
        };
        result.resolved = Some(resolved);
        result.attempts = exchange.attempts;
        let response = exchange.response;

        if let Some(error) = response.transport_error.clone() {
            result.assertions = self.assertions.not_evaluated(&compiled, &error.to_string());
            result.response = Some(response);
            return Ok(finish(
                result,
                RequestStatus::Failed,
                Some(RequestFailure::Transport { error }),
                clock,
            ));
        }

        result.assertions = self.assertions.evaluate_compiled(&compiled, &response);

        let extraction = extract_all(&request.extractions, &response);
        for name in &extraction.misses {
            warn!(request = %request.name, variable = %name, "extraction found no value");
        }
        result.extracted = extraction.values;
        result.extraction_misses = extraction.misses;
        result.response = Some(response);

        let total = result.assertions.len();
        let failed = result.failed_assertions().count();
        if failed == 0 {
            Ok(finish(result, RequestStatus::Passed, None, clock))
        } else {
            Ok(finish(
                result,
                RequestStatus::Failed,
                Some(RequestFailure::AssertionsFailed { failed, total }),
                clock,
            ))
        }
    }
}

fn finish(
    mut result: ApiRequestResult,
    status: RequestStatus,
    failure: Option<RequestFailure>,
    clock: Instant,
) -> ApiRequestResult {
    result.status = status;
    result.failure = failure;
    result.finished_at = Utc::now();
    result.elapsed_ms = duration_ms(clock.elapsed());
    debug!(request = %result.name, status = ?result.status, elapsed_ms = result.elapsed_ms, "request finished");
    result
}

fn cancelled(completed: usize) -> (RunStatus, RunReason) {
    info!(completed, "run cancelled");
    (RunStatus::Error, RunReason::Cancelled { completed })
}
