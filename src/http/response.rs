use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Response headers with lowercased names. Repeated headers are joined
/// with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseHeaders(BTreeMap<String, String>);

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.0
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = ResponseHeaders::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }
}

/// Outcome of sending one request.
///
/// A transport failure is still a response: status `0`, empty body, and
/// `transport_error` set. It is never confused with an HTTP error status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: ResponseHeaders,
    #[serde(with = "super::base64_bytes")]
    pub body: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    pub elapsed_ms: u64,
    pub size_bytes: usize,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<TransportError>,
}

impl HttpResponse {
    /// Build a response from received parts; the body is parsed as JSON
    /// when it is well-formed JSON.
    pub fn from_parts(status: u16, headers: ResponseHeaders, body: Bytes, elapsed: Duration) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();
        let json = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };
        Self {
            status,
            status_text,
            headers,
            size_bytes: body.len(),
            body,
            json,
            elapsed_ms: duration_ms(elapsed),
            truncated: false,
            transport_error: None,
        }
    }

    pub fn transport_failure(error: TransportError, elapsed: Duration) -> Self {
        Self {
            status: 0,
            status_text: "Error".into(),
            headers: ResponseHeaders::new(),
            body: Bytes::new(),
            json: None,
            elapsed_ms: duration_ms(elapsed),
            size_bytes: 0,
            truncated: false,
            transport_error: Some(error),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.transport_error.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
