//! # Test Engine
//!
//! Sequential execution of collections: resolve, send, assert, extract,
//! record. Captured variables flow forward only. Each run owns its scope
//! stack; the engine itself is stateless and shareable.

mod cancel;
mod config;
mod executable;
mod observer;
mod prepare;
mod run;
mod runner;

pub use cancel::{CancelHandle, CancelRegistry, CancelSignal};
pub use config::{FailurePolicy, RunConfig};
pub use executable::Executable;
pub use observer::{NoopObserver, RunObserver};
pub use run::{
    ApiRequestResult, ApiTestRun, RequestFailure, RequestStatus, RunOrigin, RunReason, RunStatus, RunSummary,
};
pub use runner::ApiTestEngine;
