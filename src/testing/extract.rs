use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::path::BodyPath;
use crate::environment::VariableMap;
use crate::http::HttpResponse;

/// Where an extracted value comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    #[default]
    #[serde(alias = "jsonpath", alias = "json_path")]
    Body,
    Header,
    Status,
    RawBody,
    Regex,
    /// Unrecognised source; always a miss.
    #[serde(other)]
    Unknown,
}

/// Captures a value from a response into a run variable.
///
/// `path` is a body path for `body`, a header name for `header`, and a
/// pattern for `regex` (first capture group, else the whole match). When
/// nothing is found `default` is used; without one the rule is a miss and
/// the variable stays unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    #[serde(alias = "variable")]
    pub name: String,
    #[serde(default)]
    pub source: ExtractionSource,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ExtractionRule {
    pub fn new(name: impl Into<String>, source: ExtractionSource, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            path: path.into(),
            default: None,
        }
    }

    pub fn body(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, ExtractionSource::Body, path)
    }

    pub fn header(name: impl Into<String>, header: impl Into<String>) -> Self {
        Self::new(name, ExtractionSource::Header, header)
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn extract(&self, response: &HttpResponse) -> Option<Value> {
        let found = match self.source {
            ExtractionSource::Body => {
                let path = BodyPath::parse(&self.path).ok()?;
                response.json.as_ref().and_then(|doc| path.lookup(doc)).cloned()
            }
            ExtractionSource::Header => response.header(&self.path).map(|value| json!(value)),
            ExtractionSource::Status => Some(json!(response.status)),
            ExtractionSource::RawBody => Some(json!(response.text())),
            ExtractionSource::Regex => {
                let re = Regex::new(&self.path).ok()?;
                let text = response.text();
                re.captures(&text).and_then(|caps| {
                    caps.get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| json!(m.as_str()))
                })
            }
            ExtractionSource::Unknown => None,
        };
        found.or_else(|| self.default.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub values: VariableMap,
    pub misses: Vec<String>,
}

/// Apply every rule. Later rules with the same name overwrite earlier ones.
pub fn extract_all(rules: &[ExtractionRule], response: &HttpResponse) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    for rule in rules {
        match rule.extract(response) {
            Some(value) => {
                outcome.values.insert(rule.name.clone(), value);
            }
            None => outcome.misses.push(rule.name.clone()),
        }
    }
    outcome
}
