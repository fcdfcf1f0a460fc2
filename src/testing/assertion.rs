use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which part of the response an assertion inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Status,
    Header,
    #[serde(alias = "jsonpath", alias = "json_path", alias = "body")]
    BodyPath,
    #[serde(alias = "body_contains")]
    BodyText,
    #[serde(alias = "timing")]
    ResponseTime,
    /// Anything unrecognised; rejected when the assertion is compiled.
    #[serde(other)]
    Unknown,
}

impl AssertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::Status => "status",
            AssertionKind::Header => "header",
            AssertionKind::BodyPath => "body_path",
            AssertionKind::BodyText => "body_text",
            AssertionKind::ResponseTime => "response_time",
            AssertionKind::Unknown => "unknown",
        }
    }
}

impl Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "!=")]
    NotEquals,
    #[serde(alias = "one_of")]
    In,
    Range,
    #[serde(alias = "present")]
    Exists,
    #[serde(alias = "absent")]
    NotExists,
    Contains,
    NotContains,
    #[serde(alias = "regex")]
    Matches,
    #[serde(alias = "type")]
    TypeIs,
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "max_ms", alias = "lte", alias = "<=")]
    AtMost,
    #[serde(other)]
    Unknown,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::In => "in",
            Operator::Range => "range",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Matches => "matches",
            Operator::TypeIs => "type_is",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::AtMost => "at_most",
            Operator::Unknown => "unknown",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declarative check as stored in a collection.
///
/// `target` is the header name for header checks and the body path for
/// body-path checks. When `operator` is omitted each kind has a default:
/// `equals` for status, `exists` for headers, `contains` for body text,
/// `at_most` for response time, and for body paths `equals` when an
/// expected value is given, else `exists`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionSpec {
    #[serde(rename = "type", alias = "kind")]
    pub kind: AssertionKind,
    #[serde(default, alias = "path", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, alias = "value", skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AssertionSpec {
    pub fn new(kind: AssertionKind, operator: Operator) -> Self {
        Self {
            kind,
            target: None,
            operator: Some(operator),
            expected: None,
            name: None,
        }
    }

    pub fn status(code: u16) -> Self {
        Self::new(AssertionKind::Status, Operator::Equals).expecting(code)
    }

    pub fn status_in(codes: &[u16]) -> Self {
        Self::new(AssertionKind::Status, Operator::In).expecting(codes.to_vec())
    }

    pub fn status_range(low: u16, high: u16) -> Self {
        Self::new(AssertionKind::Status, Operator::Range).expecting(vec![low, high])
    }

    pub fn header(name: impl Into<String>, operator: Operator) -> Self {
        Self::new(AssertionKind::Header, operator).on(name)
    }

    pub fn body_path(path: impl Into<String>, operator: Operator) -> Self {
        Self::new(AssertionKind::BodyPath, operator).on(path)
    }

    pub fn body_equals(path: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self::body_path(path, Operator::Equals).expecting(expected)
    }

    pub fn body_exists(path: impl Into<String>) -> Self {
        Self::body_path(path, Operator::Exists)
    }

    pub fn body_contains(text: impl Into<String>) -> Self {
        Self::new(AssertionKind::BodyText, Operator::Contains).expecting(text.into())
    }

    pub fn response_time(max_ms: u64) -> Self {
        Self::new(AssertionKind::ResponseTime, Operator::AtMost).expecting(max_ms)
    }

    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn expecting(mut self, expected: impl Into<Value>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_flat_form() {
        let spec: AssertionSpec = serde_json::from_value(json!({
            "type": "jsonpath",
            "path": "$.id",
            "operator": "exists"
        }))
        .unwrap();
        assert_eq!(spec, AssertionSpec::body_exists("$.id"));
    }

    #[test]
    fn unknown_kind_and_operator_are_captured() {
        let spec: AssertionSpec = serde_json::from_value(json!({
            "type": "telepathy",
            "operator": "feels_like",
            "expected": 1
        }))
        .unwrap();
        assert_eq!(spec.kind, AssertionKind::Unknown);
        assert_eq!(spec.operator, Some(Operator::Unknown));
    }

    #[test]
    fn serializes_compactly() {
        let value = serde_json::to_value(AssertionSpec::status(200)).unwrap();
        assert_eq!(
            value,
            json!({ "type": "status", "operator": "equals", "expected": 200 })
        );
    }
}
