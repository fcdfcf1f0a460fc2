//! Error taxonomy for the engine.
//!
//! Request-scoped errors (`ResolveError`, `TransportError`,
//! `InvalidRequestError`) are captured into the request's result and never
//! cross the run boundary. Structural errors (`AssertionEvaluationError`,
//! `FeatureSyntaxError`, `UnsupportedFormatError`) terminate the run or import
//! they belong to.

use std::fmt::{self, Display};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to resolve `{{token}}` templates against the scope stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ResolveError {
    /// One or more tokens had no value in any scope.
    #[error("unresolved variable(s): {}", .names.join(", "))]
    Unresolved { names: Vec<String> },
    /// A value kept expanding into further tokens past the depth bound.
    #[error("variable `{name}` nests deeper than {limit} levels (circular reference?)")]
    TooDeep { name: String, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Redirect,
    Body,
    Other,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Redirect => "redirect",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "transport",
        };
        write!(f, "{label}")
    }
}

/// Failure below the HTTP application layer. A 4xx/5xx is never one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The resolved request could not be turned into a wire request
/// (bad URL, header, method or body encoding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("invalid request: {message}")]
pub struct InvalidRequestError {
    pub message: String,
}

impl InvalidRequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A malformed assertion definition. This is an engine fault, not a test
/// failure: the run ends in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("assertion #{index} cannot be evaluated: {message}")]
pub struct AssertionEvaluationError {
    pub index: usize,
    pub message: String,
}

/// Malformed feature text. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("feature syntax error at line {line}, column {column}: {message}")]
pub struct FeatureSyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl FeatureSyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// An import source that cannot be mapped onto the collection model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("unsupported {format} document: {reason}")]
pub struct UnsupportedFormatError {
    pub format: String,
    pub reason: String,
}

impl UnsupportedFormatError {
    pub fn new(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            reason: reason.into(),
        }
    }
}

/// Caller-initiated cancellation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

#[derive(Debug, Error)]
#[error("failed to build HTTP client: {message}")]
pub struct ClientError {
    pub message: String,
}

/// Reading or writing collections, environments, settings and reports.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write `{}`: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse `{}`: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize {what}: {message}")]
    Serialize { what: String, message: String },
    #[error("invalid setting: {0}")]
    Invalid(String),
}
