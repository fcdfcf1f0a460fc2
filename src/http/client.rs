use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, redirect};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::request::{ResolvedBody, ResolvedRequest};
use super::response::{HttpResponse, ResponseHeaders};
use crate::engine::CancelSignal;
use crate::error::{Cancelled, ClientError, InvalidRequestError, TransportError, TransportErrorKind};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Process-wide client settings. Per-request knobs live in [`ExecuteOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub verify_tls: bool,
    pub user_agent: String,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            user_agent: concat!("apicheck/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            proxy_url: None,
        }
    }
}

/// Bounded retry with exponential backoff. Applies to transport errors
/// only; any HTTP status is a final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retrying.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.backoff_multiplier = multiplier;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let delay = self.initial_backoff_ms as f64 * multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub retry: RetryPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            follow_redirects: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// The response plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub response: HttpResponse,
    pub attempts: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequestError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Shared HTTP client. Cheap to clone; safe to use from concurrent runs.
#[derive(Debug, Clone)]
pub struct ApiHttpClient {
    following: Client,
    direct: Client,
    max_body_bytes: usize,
}

impl ApiHttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            following: build_client(config, true)?,
            direct: build_client(config, false)?,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Send `request`. Transport failures come back as a response carrying
    /// `transport_error`; only malformed requests and cancellation are errors.
    pub async fn execute(
        &self,
        request: &ResolvedRequest,
        options: &ExecuteOptions,
        cancel: &CancelSignal,
    ) -> Result<HttpExchange, ExecuteError> {
        let client = if options.follow_redirects {
            &self.following
        } else {
            &self.direct
        };
        let prepared = prepare(client, request, options)?;
        let max_attempts = options.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let wire = prepared
                .try_clone()
                .ok_or_else(|| InvalidRequestError::new("request body cannot be replayed"))?;
            let started = Instant::now();

            let outcome = tokio::select! {
                res = self.send(client, wire, started) => res,
                _ = cancel.cancelled() => return Err(Cancelled.into()),
            };

            let error = match outcome {
                Ok(response) => {
                    debug!(
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        elapsed_ms = response.elapsed_ms,
                        attempt,
                        "response received"
                    );
                    return Ok(HttpExchange {
                        response,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if attempt >= max_attempts || !is_retryable(error.kind) {
                warn!(url = %request.url, kind = %error.kind, attempt, "request failed: {}", error.message);
                return Ok(HttpExchange {
                    response: HttpResponse::transport_failure(error, started.elapsed()),
                    attempts: attempt,
                });
            }

            let delay = options.retry.backoff(attempt);
            warn!(
                url = %request.url,
                kind = %error.kind,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "transport error, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = cancel.cancelled() => return Err(Cancelled.into()),
            }
        }
    }

    async fn send(
        &self,
        client: &Client,
        request: reqwest::Request,
        started: Instant,
    ) -> Result<HttpResponse, TransportError> {
        let mut response = client.execute(request).await.map_err(|err| classify(&err))?;

        let status = response.status().as_u16();
        let headers: ResponseHeaders = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        let mut body = BytesMut::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|err| classify(&err))? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let mut parsed = HttpResponse::from_parts(status, headers, body.freeze(), started.elapsed());
        if truncated {
            warn!(limit = self.max_body_bytes, "response body truncated");
            parsed.truncated = true;
            parsed.json = None;
        }
        Ok(parsed)
    }
}

fn build_client(config: &ClientConfig, follow_redirects: bool) -> Result<Client, ClientError> {
    let policy = if follow_redirects {
        redirect::Policy::limited(config.max_redirects)
    } else {
        redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .redirect(policy)
        .user_agent(config.user_agent.clone());

    if let Some(proxy_url) = config.proxy_url.as_deref().filter(|url| !url.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|err| ClientError {
            message: format!("invalid proxy URL: {err}"),
        })?;
        builder = builder.proxy(proxy);
    }

    if !config.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|err| ClientError {
        message: err.to_string(),
    })
}

fn prepare(
    client: &Client,
    request: &ResolvedRequest,
    options: &ExecuteOptions,
) -> Result<reqwest::Request, InvalidRequestError> {
    let method = reqwest::Method::try_from(&request.method)?;
    let url = reqwest::Url::parse(&request.url)
        .map_err(|err| InvalidRequestError::new(format!("invalid URL `{}`: {err}", request.url)))?;
    let mut headers = build_headers(&request.headers)?;

    if !headers.contains_key(CONTENT_TYPE) {
        if let Some(content_type) = request.body.default_content_type() {
            let value = HeaderValue::from_str(content_type).map_err(|err| {
                InvalidRequestError::new(format!("invalid content type `{content_type}`: {err}"))
            })?;
            headers.insert(CONTENT_TYPE, value);
        }
    }

    let mut builder = client.request(method, url).timeout(options.timeout);
    builder = match &request.body {
        ResolvedBody::Empty => builder,
        ResolvedBody::Json(value) => {
            let bytes = serde_json::to_vec(value)
                .map_err(|err| InvalidRequestError::new(format!("failed to encode JSON body: {err}")))?;
            builder.body(bytes)
        }
        ResolvedBody::Form(fields) => builder.form(fields),
        ResolvedBody::Text { text, .. } => builder.body(text.clone()),
        ResolvedBody::Binary { data, .. } => builder.body(data.clone()),
    };

    // Explicit headers go last so they win over anything the body set.
    builder
        .headers(headers)
        .build()
        .map_err(|err| InvalidRequestError::new(format!("failed to build request: {err}")))
}

pub fn build_headers(input: &BTreeMap<String, String>) -> Result<HeaderMap, InvalidRequestError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| InvalidRequestError::new(format!("invalid header name `{key}`: {err}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| InvalidRequestError::new(format!("invalid header value for `{key}`: {err}")))?;
        headers.append(header_name, header_value);
    }

    Ok(headers)
}

fn is_retryable(kind: TransportErrorKind) -> bool {
    !matches!(kind, TransportErrorKind::Tls | TransportErrorKind::Redirect)
}

/// Map a reqwest failure onto the transport taxonomy. DNS and TLS failures
/// surface as connect errors, so the source chain text decides.
fn classify(err: &reqwest::Error) -> TransportError {
    let chain = error_chain(err);
    let lowered = chain.to_ascii_lowercase();

    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_redirect() {
        TransportErrorKind::Redirect
    } else if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        TransportErrorKind::Dns
    } else if lowered.contains("certificate") || lowered.contains("tls") {
        TransportErrorKind::Tls
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, chain)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
