use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::method::HttpMethod;

/// A request with every template resolved, ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResolvedBody,
}

impl ResolvedRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: ResolvedBody::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: ResolvedBody) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ResolvedBody {
    #[default]
    Empty,
    Json(Value),
    Form(BTreeMap<String, String>),
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    Binary {
        #[serde(with = "super::base64_bytes")]
        data: Bytes,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
}

impl ResolvedBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResolvedBody::Empty)
    }

    /// Content type sent when the request does not set one explicitly.
    /// Form bodies get theirs from the client.
    pub fn default_content_type(&self) -> Option<&str> {
        match self {
            ResolvedBody::Empty | ResolvedBody::Form(_) => None,
            ResolvedBody::Json(_) => Some("application/json"),
            ResolvedBody::Text { content_type, .. } => {
                Some(content_type.as_deref().unwrap_or("text/plain"))
            }
            ResolvedBody::Binary { content_type, .. } => {
                Some(content_type.as_deref().unwrap_or("application/octet-stream"))
            }
        }
    }
}
