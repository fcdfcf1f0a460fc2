use std::fmt::{self, Display};

use regex::Regex;
use serde_json::Value;

use super::assertion::{AssertionKind, AssertionSpec, Operator};
use super::path::BodyPath;

/// An assertion validated and normalized for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledAssertion {
    pub description: String,
    pub kind: AssertionKind,
    pub check: Check,
}

#[derive(Debug, Clone)]
pub enum Check {
    Status(StatusCheck),
    Header { name: String, check: TextCheck },
    BodyPath { path: BodyPath, check: ValueCheck },
    BodyText(TextCheck),
    ResponseTime { max_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheck {
    Equals(u16),
    NotEquals(u16),
    In(Vec<u16>),
    Range(u16, u16),
}

#[derive(Debug, Clone)]
pub enum TextCheck {
    Exists,
    NotExists,
    Equals(String),
    NotEquals(String),
    Contains(String),
    NotContains(String),
    Matches(Regex),
}

#[derive(Debug, Clone)]
pub enum ValueCheck {
    Exists,
    NotExists,
    Equals(Value),
    NotEquals(Value),
    OneOf(Vec<Value>),
    Contains(Value),
    NotContains(Value),
    Matches(Regex),
    TypeIs(JsonType),
    GreaterThan(f64),
    LessThan(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_lowercase().as_str() {
            "string" => JsonType::String,
            "number" => JsonType::Number,
            "integer" | "int" => JsonType::Integer,
            "boolean" | "bool" => JsonType::Boolean,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            "null" => JsonType::Null,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
            JsonType::Null => "null",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Array => value.is_array(),
            JsonType::Object => value.is_object(),
            JsonType::Null => value.is_null(),
        }
    }
}

impl CompiledAssertion {
    pub fn compile(spec: &AssertionSpec) -> Result<Self, String> {
        let check = match spec.kind {
            AssertionKind::Status => Check::Status(compile_status(spec)?),
            AssertionKind::Header => {
                let name = spec
                    .target
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or("header assertion needs a header name")?;
                let operator = spec.operator.unwrap_or(Operator::Exists);
                Check::Header {
                    name: name.to_string(),
                    check: compile_text(operator, spec.expected.as_ref(), "header")?,
                }
            }
            AssertionKind::BodyPath => {
                let path = BodyPath::parse(spec.target.as_deref().unwrap_or("$"))?;
                let operator = spec.operator.unwrap_or(if spec.expected.is_some() {
                    Operator::Equals
                } else {
                    Operator::Exists
                });
                Check::BodyPath {
                    path,
                    check: compile_value(operator, spec.expected.as_ref())?,
                }
            }
            AssertionKind::BodyText => {
                let operator = spec.operator.unwrap_or(Operator::Contains);
                if matches!(operator, Operator::Exists | Operator::NotExists) {
                    return Err(format!("operator `{operator}` is not valid for body_text assertions"));
                }
                Check::BodyText(compile_text(operator, spec.expected.as_ref(), "body_text")?)
            }
            AssertionKind::ResponseTime => {
                let operator = spec.operator.unwrap_or(Operator::AtMost);
                let limit = spec
                    .expected
                    .as_ref()
                    .and_then(as_u64)
                    .ok_or("response_time assertion needs a non-negative number of milliseconds")?;
                let max_ms = match operator {
                    Operator::AtMost => limit,
                    Operator::LessThan => limit
                        .checked_sub(1)
                        .ok_or("response_time `less_than 0` can never pass")?,
                    other => {
                        return Err(format!("operator `{other}` is not valid for response_time assertions"));
                    }
                };
                Check::ResponseTime { max_ms }
            }
            AssertionKind::Unknown => return Err("unknown assertion type".to_string()),
        };

        let description = spec
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| check.to_string());

        Ok(Self {
            description,
            kind: spec.kind,
            check,
        })
    }
}

fn compile_status(spec: &AssertionSpec) -> Result<StatusCheck, String> {
    let operator = spec.operator.unwrap_or(Operator::Equals);
    let expected = spec
        .expected
        .as_ref()
        .ok_or("status assertion needs an expected value")?;

    match operator {
        Operator::Equals => match expected.as_str().and_then(status_class) {
            Some((low, high)) => Ok(StatusCheck::Range(low, high)),
            None => Ok(StatusCheck::Equals(status_code(expected)?)),
        },
        Operator::NotEquals => Ok(StatusCheck::NotEquals(status_code(expected)?)),
        Operator::In => {
            let codes = expected
                .as_array()
                .ok_or("`in` expects a list of status codes")?
                .iter()
                .map(status_code)
                .collect::<Result<Vec<_>, _>>()?;
            if codes.is_empty() {
                return Err("`in` expects at least one status code".to_string());
            }
            Ok(StatusCheck::In(codes))
        }
        Operator::Range => {
            let (low, high) = match expected {
                Value::Array(bounds) if bounds.len() == 2 => {
                    (status_code(&bounds[0])?, status_code(&bounds[1])?)
                }
                Value::Object(bounds) => (
                    status_code(bounds.get("min").ok_or("range needs `min`")?)?,
                    status_code(bounds.get("max").ok_or("range needs `max`")?)?,
                ),
                Value::String(text) => match text.split_once('-') {
                    Some((low, high)) => (
                        parse_status(low.trim())?,
                        parse_status(high.trim())?,
                    ),
                    None => status_class(text).ok_or("range expects `low-high`")?,
                },
                _ => return Err("range expects [low, high]".to_string()),
            };
            if low > high {
                return Err(format!("empty status range {low}..={high}"));
            }
            Ok(StatusCheck::Range(low, high))
        }
        other => Err(format!("operator `{other}` is not valid for status assertions")),
    }
}

/// `2xx` style classes.
fn status_class(text: &str) -> Option<(u16, u16)> {
    let text = text.trim().to_ascii_lowercase();
    let digit = text.strip_suffix("xx")?.parse::<u16>().ok()?;
    (1..=5).contains(&digit).then(|| (digit * 100, digit * 100 + 99))
}

fn status_code(value: &Value) -> Result<u16, String> {
    match value {
        Value::Number(_) => value
            .as_u64()
            .and_then(|code| u16::try_from(code).ok())
            .filter(|code| (100..=599).contains(code))
            .ok_or_else(|| format!("`{value}` is not an HTTP status code")),
        Value::String(text) => parse_status(text),
        other => Err(format!("`{other}` is not an HTTP status code")),
    }
}

fn parse_status(text: &str) -> Result<u16, String> {
    text.trim()
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| format!("`{text}` is not an HTTP status code"))
}

fn compile_text(operator: Operator, expected: Option<&Value>, kind: &str) -> Result<TextCheck, String> {
    let text = || {
        expected
            .map(scalar_text)
            .ok_or_else(|| format!("operator `{operator}` needs an expected value"))
    };
    Ok(match operator {
        Operator::Exists => TextCheck::Exists,
        Operator::NotExists => TextCheck::NotExists,
        Operator::Equals => TextCheck::Equals(text()?),
        Operator::NotEquals => TextCheck::NotEquals(text()?),
        Operator::Contains => TextCheck::Contains(text()?),
        Operator::NotContains => TextCheck::NotContains(text()?),
        Operator::Matches => TextCheck::Matches(compile_regex(&text()?)?),
        other => return Err(format!("operator `{other}` is not valid for {kind} assertions")),
    })
}

fn compile_value(operator: Operator, expected: Option<&Value>) -> Result<ValueCheck, String> {
    let required = || expected.cloned().ok_or_else(|| format!("operator `{operator}` needs an expected value"));
    Ok(match operator {
        Operator::Exists => ValueCheck::Exists,
        Operator::NotExists => ValueCheck::NotExists,
        Operator::Equals => ValueCheck::Equals(expected.cloned().unwrap_or(Value::Null)),
        Operator::NotEquals => ValueCheck::NotEquals(expected.cloned().unwrap_or(Value::Null)),
        Operator::In => match required()? {
            Value::Array(options) => ValueCheck::OneOf(options),
            _ => return Err("`in` expects a list of values".to_string()),
        },
        Operator::Contains => ValueCheck::Contains(required()?),
        Operator::NotContains => ValueCheck::NotContains(required()?),
        Operator::Matches => ValueCheck::Matches(compile_regex(&scalar_text(&required()?))?),
        Operator::TypeIs => {
            let name = scalar_text(&required()?);
            ValueCheck::TypeIs(JsonType::parse(&name).ok_or_else(|| format!("unknown JSON type `{name}`"))?)
        }
        Operator::GreaterThan => ValueCheck::GreaterThan(number(&required()?)?),
        Operator::LessThan => ValueCheck::LessThan(number(&required()?)?),
        other => return Err(format!("operator `{other}` is not valid for body_path assertions")),
    })
}

fn compile_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|err| format!("invalid pattern `{pattern}`: {err}"))
}

fn number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("`{value}` is not a number"))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Strings as-is, everything else as compact JSON.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Status(StatusCheck::Equals(code)) => write!(f, "status == {code}"),
            Check::Status(StatusCheck::NotEquals(code)) => write!(f, "status != {code}"),
            Check::Status(StatusCheck::In(codes)) => write!(f, "status in {codes:?}"),
            Check::Status(StatusCheck::Range(low, high)) => write!(f, "status in {low}..={high}"),
            Check::Header { name, check } => write!(f, "header {name} {check}"),
            Check::BodyPath { path, check } => write!(f, "body {path} {check}"),
            Check::BodyText(check) => write!(f, "body {check}"),
            Check::ResponseTime { max_ms } => write!(f, "response time <= {max_ms}ms"),
        }
    }
}

impl Display for TextCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextCheck::Exists => write!(f, "exists"),
            TextCheck::NotExists => write!(f, "does not exist"),
            TextCheck::Equals(text) => write!(f, "== {text:?}"),
            TextCheck::NotEquals(text) => write!(f, "!= {text:?}"),
            TextCheck::Contains(text) => write!(f, "contains {text:?}"),
            TextCheck::NotContains(text) => write!(f, "does not contain {text:?}"),
            TextCheck::Matches(re) => write!(f, "matches /{}/", re.as_str()),
        }
    }
}

impl Display for ValueCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueCheck::Exists => write!(f, "exists"),
            ValueCheck::NotExists => write!(f, "does not exist"),
            ValueCheck::Equals(value) => write!(f, "== {value}"),
            ValueCheck::NotEquals(value) => write!(f, "!= {value}"),
            ValueCheck::OneOf(values) => write!(f, "in {}", Value::Array(values.clone())),
            ValueCheck::Contains(value) => write!(f, "contains {value}"),
            ValueCheck::NotContains(value) => write!(f, "does not contain {value}"),
            ValueCheck::Matches(re) => write!(f, "matches /{}/", re.as_str()),
            ValueCheck::TypeIs(ty) => write!(f, "is {}", ty.as_str()),
            ValueCheck::GreaterThan(n) => write!(f, "> {n}"),
            ValueCheck::LessThan(n) => write!(f, "< {n}"),
        }
    }
}
