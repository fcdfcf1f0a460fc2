use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::VariableMap;
use crate::http::RetryPolicy;
use crate::http::client::DEFAULT_TIMEOUT_MS;

/// What the engine does after a request fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run at the first failed request. Later requests get no result.
    #[default]
    #[serde(alias = "stop-on-first-failure", alias = "stop")]
    StopOnFirstFailure,
    #[serde(alias = "continue-on-failure", alias = "continue")]
    ContinueOnFailure,
}

/// Per-run knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub failure_policy: FailurePolicy,
    /// Applied to requests without their own `timeout_ms`.
    pub default_timeout_ms: u64,
    pub follow_redirects: bool,
    pub retry: RetryPolicy,
    /// Lowest-priority variables, below the collection's own.
    pub default_variables: VariableMap,
    /// Abort the in-flight request on cancellation instead of letting it
    /// finish and stopping before the next one.
    pub interrupt_in_flight: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::StopOnFirstFailure,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            follow_redirects: true,
            retry: RetryPolicy::default(),
            default_variables: VariableMap::new(),
            interrupt_in_flight: false,
        }
    }
}

impl RunConfig {
    pub fn continue_on_failure(mut self) -> Self {
        self.failure_policy = FailurePolicy::ContinueOnFailure;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_variables.insert(name.into(), value.into());
        self
    }

    pub fn interrupting_in_flight(mut self) -> Self {
        self.interrupt_in_flight = true;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
