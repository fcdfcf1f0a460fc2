//! # Testing & Assertions
//!
//! Declarative response checks (status, headers, body paths, body text,
//! timing) and variable extraction. Specs are stored flat and serializable;
//! they are compiled into tagged checks before a request is sent so a
//! malformed definition is caught without touching the network.

mod assertion;
mod compile;
mod evaluate;
mod extract;
mod path;

pub use assertion::{AssertionKind, AssertionSpec, Operator};
pub use compile::{Check, CompiledAssertion, JsonType, StatusCheck, TextCheck, ValueCheck};
pub use evaluate::{AssertionEngine, AssertionResult};
pub use extract::{ExtractionOutcome, ExtractionRule, ExtractionSource, extract_all};
pub use path::{BodyPath, Segment};
