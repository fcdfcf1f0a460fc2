//! # Collections
//!
//! The canonical test model: an ordered list of requests with shared
//! variables, defaults and auth. Every importer produces one of these and
//! the engine runs nothing else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthMethod;
use crate::environment::VariableMap;
use crate::http::HttpMethod;
use crate::testing::{AssertionSpec, ExtractionRule};

/// Where a collection came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionSource {
    #[default]
    Native,
    Postman,
    OpenApi,
    Karate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCollection {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub source: CollectionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: VariableMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMethod>,
    #[serde(default)]
    pub requests: Vec<ApiRequest>,
    /// Setup steps an importer could not map. Kept for review.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passthrough: Vec<PassthroughStep>,
}

impl ApiCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            source: CollectionSource::Native,
            base_url: None,
            variables: VariableMap::new(),
            default_headers: BTreeMap::new(),
            auth: None,
            requests: Vec::new(),
            passthrough: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_request(mut self, request: ApiRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn find_request(&self, name: &str) -> Option<&ApiRequest> {
        self.requests.iter().find(|request| request.name == name)
    }

    pub fn assertion_count(&self) -> usize {
        self.requests.iter().map(|request| request.assertions.len()).sum()
    }

    /// Requests carrying steps that were not converted.
    pub fn needs_review(&self) -> bool {
        !self.passthrough.is_empty() || self.requests.iter().any(|r| !r.passthrough.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute URL or a path joined onto the base URL. May hold tokens.
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "RequestBody::is_none")]
    pub body: RequestBody,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extractions: Vec<ExtractionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passthrough: Vec<PassthroughStep>,
}

impl ApiRequest {
    pub fn new(name: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            method,
            url: url.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: RequestBody::None,
            assertions: Vec::new(),
            extractions: Vec::new(),
            auth: None,
            timeout_ms: None,
            follow_redirects: None,
            folder: None,
            tags: Vec::new(),
            description: None,
            passthrough: Vec::new(),
        }
    }

    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, HttpMethod::Get, url)
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_json(mut self, content: Value) -> Self {
        self.body = RequestBody::Json { content };
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_assertion(mut self, assertion: AssertionSpec) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_extraction(mut self, rule: ExtractionRule) -> Self {
        self.extractions.push(rule);
        self
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Request payload as authored. Templates are resolved at send time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    #[default]
    None,
    Json {
        content: Value,
    },
    Form {
        fields: BTreeMap<String, String>,
    },
    Raw {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    /// Base64-encoded bytes.
    Binary {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    #[serde(rename = "graphql")]
    GraphQl {
        query: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        variables: Value,
    },
}

impl RequestBody {
    pub fn is_none(&self) -> bool {
        matches!(self, RequestBody::None)
    }
}

/// Whether an unconverted step sat before or after the request was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    #[default]
    BeforeSend,
    AfterSend,
}

/// A source step with no mapping onto the model, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughStep {
    pub keyword: String,
    pub text: String,
    #[serde(default)]
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<Vec<String>>>,
}
