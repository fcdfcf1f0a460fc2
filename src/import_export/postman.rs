use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{ApiKeyLocation, AuthMethod};
use crate::collections::{ApiCollection, ApiRequest, CollectionSource, RequestBody};
use crate::environment::{ApiEnvironment, EnvVariable};
use crate::error::UnsupportedFormatError;
use crate::http::HttpMethod;
use crate::testing::{AssertionKind, AssertionSpec, ExtractionRule, Operator};

const FORMAT: &str = "postman";

static STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pm\.response\.to\.have\.status\(\s*(\d{3})\s*\)").expect("static pattern"));
static EQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pm\.expect\(\s*jsonData((?:\.[A-Za-z_$][\w$]*|\[\d+\])+)\s*\)\.to\.(?:eql|equal)\(\s*(.+?)\s*\)\s*;?\s*$")
        .expect("static pattern")
});
static BELOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pm\.expect\(\s*pm\.response\.responseTime\s*\)\.to\.be\.below\(\s*(\d+)\s*\)").expect("static pattern")
});
static HAS_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"pm\.response\.to\.have\.header\(\s*["']([^"']+)["']\s*\)"#).expect("static pattern")
});
static SET_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"pm\.(?:environment|collectionVariables|variables|globals)\.set\(\s*["']([A-Za-z_][\w\-]*)["']\s*,\s*jsonData((?:\.[A-Za-z_$][\w$]*|\[\d+\])+)\s*\)"#,
    )
    .expect("static pattern")
});

#[derive(Debug, Deserialize)]
struct Document {
    info: Info,
    #[serde(default)]
    item: Vec<Item>,
    #[serde(default)]
    variable: Vec<KeyValue>,
    #[serde(default)]
    auth: Option<Auth>,
}

#[derive(Debug, Deserialize)]
struct Info {
    #[serde(default)]
    name: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    description: Option<Description>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Description {
    Text(String),
    Rich { content: String },
}

impl Description {
    fn text(&self) -> &str {
        match self {
            Description::Text(text) | Description::Rich { content: text } => text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    name: String,
    #[serde(default)]
    item: Option<Vec<Item>>,
    #[serde(default)]
    request: Option<RequestDef>,
    #[serde(default)]
    event: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequestDef {
    Url(String),
    Full(Box<Request>),
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<Url>,
    #[serde(default)]
    header: Vec<KeyValue>,
    #[serde(default)]
    body: Option<Body>,
    #[serde(default)]
    auth: Option<Auth>,
    #[serde(default)]
    description: Option<Description>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Url {
    Raw(String),
    Parts {
        #[serde(default)]
        raw: Option<String>,
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        host: Option<Segments>,
        #[serde(default)]
        path: Option<Segments>,
        #[serde(default)]
        query: Vec<KeyValue>,
        #[serde(default)]
        variable: Vec<KeyValue>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Segments {
    Joined(String),
    List(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct KeyValue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl KeyValue {
    fn active(&self) -> bool {
        !self.disabled && self.enabled.unwrap_or(true) && !self.key.is_empty()
    }

    fn text(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    raw: Option<String>,
    #[serde(default)]
    options: Option<Value>,
    #[serde(default)]
    urlencoded: Vec<KeyValue>,
    #[serde(default)]
    formdata: Vec<KeyValue>,
    #[serde(default)]
    graphql: Option<GraphQl>,
}

#[derive(Debug, Deserialize)]
struct GraphQl {
    #[serde(default)]
    query: String,
    #[serde(default)]
    variables: Value,
}

/// Auth parameters are a key/value list in v2.1 and a plain object in v2.0.
#[derive(Debug, Deserialize)]
struct Auth {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    params: BTreeMap<String, Value>,
}

impl Auth {
    fn param(&self, key: &str) -> String {
        let Some(block) = self.params.get(&self.kind) else {
            return String::new();
        };
        let found = match block {
            Value::Array(entries) => entries
                .iter()
                .find(|entry| entry.get("key").and_then(Value::as_str) == Some(key))
                .and_then(|entry| entry.get("value")),
            Value::Object(fields) => fields.get(key),
            _ => None,
        };
        match found {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn to_method(&self) -> Option<AuthMethod> {
        match self.kind.as_str() {
            "noauth" => Some(AuthMethod::None),
            "bearer" => Some(AuthMethod::Bearer {
                token: self.param("token"),
            }),
            "basic" => Some(AuthMethod::Basic {
                username: self.param("username"),
                password: self.param("password"),
            }),
            "apikey" => Some(AuthMethod::ApiKey {
                key: self.param("key"),
                value: self.param("value"),
                location: if self.param("in") == "query" {
                    ApiKeyLocation::Query
                } else {
                    ApiKeyLocation::Header
                },
            }),
            other => {
                warn!(auth = other, "unsupported postman auth type ignored");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    listen: String,
    #[serde(default)]
    script: Option<Script>,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    exec: Option<Segments>,
}

/// Import a Postman collection (schema v2.0 or v2.1).
pub fn import_collection(text: &str) -> Result<ApiCollection, UnsupportedFormatError> {
    let document: Document = serde_json::from_str(text)
        .map_err(|err| UnsupportedFormatError::new(FORMAT, format!("not a postman collection: {err}")))?;

    let schema = document.info.schema.as_deref().unwrap_or_default();
    if !(schema.contains("/v2.0") || schema.contains("/v2.1")) {
        return Err(UnsupportedFormatError::new(
            FORMAT,
            format!("schema `{schema}` is not v2.0 or v2.1"),
        ));
    }

    let mut collection = ApiCollection::new(if document.info.name.is_empty() {
        "Imported Collection".to_string()
    } else {
        document.info.name.clone()
    });
    collection.source = CollectionSource::Postman;
    collection.description = document
        .info
        .description
        .as_ref()
        .map(|d| d.text().to_string())
        .filter(|d| !d.is_empty());
    collection.auth = document.auth.as_ref().and_then(Auth::to_method);

    for var in document.variable.iter().filter(|v| v.active()) {
        collection.variables.insert(var.key.clone(), var.value.clone());
        if collection.base_url.is_none()
            && matches!(var.key.to_ascii_lowercase().as_str(), "baseurl" | "base_url" | "host" | "url")
        {
            collection.base_url = Some(var.text());
        }
    }

    collect_items(&document.item, &mut Vec::new(), &mut collection.requests);
    debug!(collection = %collection.name, requests = collection.requests.len(), "imported postman collection");
    Ok(collection)
}

fn collect_items(items: &[Item], folders: &mut Vec<String>, out: &mut Vec<ApiRequest>) {
    for item in items {
        if let Some(children) = &item.item {
            folders.push(if item.name.is_empty() { "Folder".to_string() } else { item.name.clone() });
            collect_items(children, folders, out);
            folders.pop();
        } else if let Some(request) = &item.request {
            let mut converted = convert_request(item, request);
            if !folders.is_empty() {
                let folder = folders.join(" / ");
                converted.name = format!("{folder} / {}", converted.name);
                converted.folder = Some(folder);
            }
            out.push(converted);
        }
    }
}

fn convert_request(item: &Item, request: &RequestDef) -> ApiRequest {
    let name = if item.name.is_empty() { "Request" } else { item.name.as_str() };
    let request = match request {
        RequestDef::Url(url) => {
            let (url, query) = split_query(url);
            let mut converted = ApiRequest::get(name, path_params(&url, &[]));
            converted.query = query;
            return with_tests(converted, &item.event);
        }
        RequestDef::Full(request) => request,
    };

    let method = request.method.as_deref().map(HttpMethod::from).unwrap_or_default();
    let (url, query) = match &request.url {
        None => (String::new(), BTreeMap::new()),
        Some(url) => convert_url(url),
    };
    let mut converted = ApiRequest::new(name, method, url);
    converted.query = query;
    converted.headers = request
        .header
        .iter()
        .filter(|h| h.active())
        .map(|h| (h.key.clone(), h.text()))
        .collect();
    converted.body = request.body.as_ref().map(convert_body).unwrap_or_default();
    converted.auth = request.auth.as_ref().and_then(Auth::to_method);
    converted.description = request
        .description
        .as_ref()
        .map(|d| d.text().to_string())
        .filter(|d| !d.is_empty());
    with_tests(converted, &item.event)
}

fn convert_url(url: &Url) -> (String, BTreeMap<String, String>) {
    match url {
        Url::Raw(raw) => {
            let (base, query) = split_query(raw);
            (path_params(&base, &[]), query)
        }
        Url::Parts {
            raw,
            protocol,
            host,
            path,
            query,
            variable,
        } => {
            let base = match raw {
                Some(raw) => split_query(raw).0,
                None => {
                    let host = match host {
                        Some(Segments::List(parts)) => parts.join("."),
                        Some(Segments::Joined(host)) => host.clone(),
                        None => String::new(),
                    };
                    let path = match path {
                        Some(Segments::List(parts)) => parts.join("/"),
                        Some(Segments::Joined(path)) => path.trim_start_matches('/').to_string(),
                        None => String::new(),
                    };
                    let scheme = protocol.as_deref().map(|p| format!("{p}://")).unwrap_or_default();
                    format!("{scheme}{host}/{path}")
                }
            };
            let query = query.iter().filter(|q| q.active()).map(|q| (q.key.clone(), q.text())).collect();
            (path_params(&base, variable), query)
        }
    }
}

fn split_query(raw: &str) -> (String, BTreeMap<String, String>) {
    match raw.split_once('?') {
        None => (raw.to_string(), BTreeMap::new()),
        Some((base, query)) => {
            let pairs = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (pair.to_string(), String::new()),
                })
                .collect();
            (base.to_string(), pairs)
        }
    }
}

/// `:id` path segments become `{{id}}`, or the literal value when the
/// request supplies one.
fn path_params(url: &str, variables: &[KeyValue]) -> String {
    url.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => variables
                .iter()
                .find(|v| v.key == name)
                .map(KeyValue::text)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| format!("{{{{{name}}}}}")),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn convert_body(body: &Body) -> RequestBody {
    match body.mode.as_deref() {
        Some("raw") => {
            let raw = body.raw.clone().unwrap_or_default();
            let language = body
                .options
                .as_ref()
                .and_then(|o| o.pointer("/raw/language"))
                .and_then(Value::as_str)
                .unwrap_or("text");
            if language == "json"
                && let Ok(content) = serde_json::from_str::<Value>(&raw)
            {
                return RequestBody::Json { content };
            }
            let content_type = match language {
                "json" => "application/json",
                "xml" => "application/xml",
                "html" => "text/html",
                "javascript" => "application/javascript",
                _ => "text/plain",
            };
            RequestBody::Raw {
                content: raw,
                content_type: Some(content_type.to_string()),
            }
        }
        Some("urlencoded") => RequestBody::Form {
            fields: body.urlencoded.iter().filter(|f| f.active()).map(|f| (f.key.clone(), f.text())).collect(),
        },
        Some("formdata") => {
            let fields = body
                .formdata
                .iter()
                .filter(|f| f.active())
                .filter(|f| {
                    let file = f.kind.as_deref() == Some("file");
                    if file {
                        warn!(field = %f.key, "file form fields are not imported");
                    }
                    !file
                })
                .map(|f| (f.key.clone(), f.text()))
                .collect();
            RequestBody::Form { fields }
        }
        Some("graphql") => {
            let graphql = body.graphql.as_ref();
            let variables = match graphql.map(|g| &g.variables) {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    serde_json::from_str(text).unwrap_or(Value::Null)
                }
                Some(Value::String(_)) | None => Value::Null,
                Some(other) => other.clone(),
            };
            RequestBody::GraphQl {
                query: graphql.map(|g| g.query.clone()).unwrap_or_default(),
                variables,
            }
        }
        Some(other) => {
            warn!(mode = other, "unsupported postman body mode ignored");
            RequestBody::None
        }
        None => RequestBody::None,
    }
}

fn with_tests(mut request: ApiRequest, events: &[Event]) -> ApiRequest {
    let lines = events
        .iter()
        .filter(|event| event.listen == "test")
        .filter_map(|event| event.script.as_ref()?.exec.as_ref())
        .flat_map(|exec| match exec {
            Segments::Joined(text) => text.lines().map(str::to_string).collect::<Vec<_>>(),
            Segments::List(lines) => lines.clone(),
        });
    for line in lines {
        if let Some(caps) = STATUS.captures(&line) {
            if let Ok(code) = caps[1].parse::<u16>() {
                request.assertions.push(AssertionSpec::status(code));
            }
        } else if let Some(caps) = EQL.captures(&line) {
            let expected = parse_literal(&caps[2]);
            request
                .assertions
                .push(AssertionSpec::body_equals(format!("${}", &caps[1]), expected));
        } else if let Some(caps) = BELOW.captures(&line) {
            if let Ok(limit) = caps[1].parse::<u64>() {
                request
                    .assertions
                    .push(AssertionSpec::new(AssertionKind::ResponseTime, Operator::LessThan).expecting(limit));
            }
        } else if let Some(caps) = HAS_HEADER.captures(&line) {
            request.assertions.push(AssertionSpec::header(&caps[1], Operator::Exists));
        } else if let Some(caps) = SET_VAR.captures(&line) {
            request
                .extractions
                .push(ExtractionRule::body(&caps[1], format!("${}", &caps[2])));
        }
    }
    request
}

/// A JS literal from a test script: JSON, or a single-quoted string.
fn parse_literal(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .unwrap_or(raw);
    Value::String(unquoted.to_string())
}

#[derive(Debug, Deserialize)]
struct EnvironmentDocument {
    #[serde(default)]
    name: String,
    values: Vec<KeyValue>,
}

/// Import a Postman environment export. Disabled entries are kept but stay
/// disabled.
pub fn import_environment(text: &str) -> Result<ApiEnvironment, UnsupportedFormatError> {
    let document: EnvironmentDocument = serde_json::from_str(text)
        .map_err(|err| UnsupportedFormatError::new("postman environment", err.to_string()))?;
    let mut environment = ApiEnvironment::new(if document.name.is_empty() {
        "Imported Environment".to_string()
    } else {
        document.name
    });
    environment.variables = document
        .values
        .into_iter()
        .filter(|v| !v.key.is_empty())
        .map(|v| EnvVariable {
            enabled: !v.disabled && v.enabled.unwrap_or(true),
            key: v.key,
            value: v.value,
        })
        .collect();
    Ok(environment)
}
