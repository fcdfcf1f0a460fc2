//! # HTTP
//!
//! Wire-level request/response types and the client that sends resolved
//! requests with timeouts, redirects, bounded retries and cancellation.

pub mod client;
pub mod method;
pub mod request;
pub mod response;

pub use client::{ApiHttpClient, ClientConfig, ExecuteError, ExecuteOptions, HttpExchange, RetryPolicy};
pub use method::HttpMethod;
pub use request::{ResolvedBody, ResolvedRequest};
pub use response::{HttpResponse, ResponseHeaders};

/// Serde adapter for binary payloads: base64 text in documents.
pub(crate) mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
