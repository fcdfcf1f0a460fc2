use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::auth::{ApiKeyLocation, AuthMethod};
use crate::collections::{ApiCollection, ApiRequest, CollectionSource, RequestBody};
use crate::error::UnsupportedFormatError;
use crate::http::HttpMethod;
use crate::testing::AssertionSpec;

const FORMAT: &str = "openapi";
const MAX_REF_DEPTH: usize = 8;
const REQUIRED_FIELD_CHECKS: usize = 3;
const METHODS: [(&str, HttpMethod); 7] = [
    ("get", HttpMethod::Get),
    ("post", HttpMethod::Post),
    ("put", HttpMethod::Put),
    ("patch", HttpMethod::Patch),
    ("delete", HttpMethod::Delete),
    ("head", HttpMethod::Head),
    ("options", HttpMethod::Options),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Swagger2,
    OpenApi3,
}

/// Import an OpenAPI 3.x or Swagger 2.0 document, JSON or YAML.
///
/// Every operation becomes one request named by its `operationId` (or
/// `METHOD /path`) and filed under its first tag. Parameters become
/// `{{name}}` tokens; declared examples and defaults seed the collection
/// variables.
pub fn import_document(text: &str) -> Result<ApiCollection, UnsupportedFormatError> {
    let document = parse(text)?;
    let dialect = dialect(&document)?;
    Importer { document: &document, dialect }.run()
}

fn parse(text: &str) -> Result<Value, UnsupportedFormatError> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(_) => serde_yaml::from_str::<Value>(text)
            .map_err(|err| UnsupportedFormatError::new(FORMAT, format!("neither JSON nor YAML: {err}"))),
    }
}

fn dialect(document: &Value) -> Result<Dialect, UnsupportedFormatError> {
    if !document.is_object() {
        return Err(UnsupportedFormatError::new(FORMAT, "document root is not an object"));
    }
    let version = |key: &str| document.get(key).and_then(Value::as_str).map(str::to_string);
    if let Some(version) = version("openapi") {
        return if version.starts_with("3.") {
            Ok(Dialect::OpenApi3)
        } else {
            Err(UnsupportedFormatError::new(FORMAT, format!("openapi version `{version}` is not 3.x")))
        };
    }
    match version("swagger") {
        Some(version) if version.starts_with("2.") => Ok(Dialect::Swagger2),
        Some(version) => Err(UnsupportedFormatError::new(
            FORMAT,
            format!("swagger version `{version}` is not 2.0"),
        )),
        None => Err(UnsupportedFormatError::new(FORMAT, "missing `openapi` or `swagger` version field")),
    }
}

struct Importer<'a> {
    document: &'a Value,
    dialect: Dialect,
}

impl Importer<'_> {
    fn run(&self) -> Result<ApiCollection, UnsupportedFormatError> {
        let info = self.document.get("info");
        let title = info
            .and_then(|i| i.get("title"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("Imported API");
        let mut collection = ApiCollection::new(title);
        collection.source = CollectionSource::OpenApi;
        collection.description = info
            .and_then(|i| i.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);
        collection.base_url = self.base_url();

        let Some(paths) = self.document.get("paths").and_then(Value::as_object) else {
            return Err(UnsupportedFormatError::new(FORMAT, "document has no `paths`"));
        };

        collection.auth = self.document.get("security").and_then(|s| self.security(s));
        for (path, item) in paths {
            let item = self.resolve(item);
            let shared = item.get("parameters");
            for (key, method) in &METHODS {
                let Some(operation) = item.get(*key) else { continue };
                let operation = self.resolve(operation);
                let mut request = self.operation(path, method.clone(), operation, shared, &mut collection.variables);
                if let Some(security) = operation.get("security") {
                    request.auth = Some(self.security(security).unwrap_or(AuthMethod::None));
                }
                collection.requests.push(request);
            }
        }
        if collection.requests.is_empty() {
            warn!(collection = %collection.name, "openapi document declares no operations");
        }
        debug!(collection = %collection.name, requests = collection.requests.len(), "imported openapi document");
        Ok(collection)
    }

    fn base_url(&self) -> Option<String> {
        match self.dialect {
            Dialect::OpenApi3 => {
                let server = self.document.get("servers")?.as_array()?.first()?;
                let mut url = server.get("url")?.as_str()?.to_string();
                if let Some(variables) = server.get("variables").and_then(Value::as_object) {
                    for (name, variable) in variables {
                        if let Some(default) = variable.get("default").and_then(Value::as_str) {
                            url = url.replace(&format!("{{{name}}}"), default);
                        }
                    }
                }
                Some(url.trim_end_matches('/').to_string())
            }
            Dialect::Swagger2 => {
                let host = self.document.get("host")?.as_str()?;
                let scheme = self
                    .document
                    .get("schemes")
                    .and_then(Value::as_array)
                    .and_then(|s| s.first())
                    .and_then(Value::as_str)
                    .unwrap_or("https");
                let base_path = self.document.get("basePath").and_then(Value::as_str).unwrap_or("");
                Some(format!("{scheme}://{host}{}", base_path.trim_end_matches('/')))
            }
        }
    }

    fn operation(
        &self,
        path: &str,
        method: HttpMethod,
        operation: &Value,
        shared: Option<&Value>,
        variables: &mut BTreeMap<String, Value>,
    ) -> ApiRequest {
        let name = operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{method} {path}"));
        let mut request = ApiRequest::new(name, method, templated_path(path));
        request.folder = operation
            .get("tags")
            .and_then(Value::as_array)
            .and_then(|tags| tags.first())
            .and_then(Value::as_str)
            .map(str::to_string);
        request.tags = operation
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        request.description = operation
            .get("summary")
            .or_else(|| operation.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);

        for parameter in self.parameters(shared, operation.get("parameters")) {
            self.apply_parameter(&mut request, parameter, variables);
        }
        if self.dialect == Dialect::OpenApi3
            && let Some(body) = operation.get("requestBody")
        {
            request.body = self.request_body(self.resolve(body));
        }
        self.add_assertions(&mut request, operation);
        request
    }

    /// Path-level parameters merged under operation-level ones, keyed by
    /// name and location.
    fn parameters<'v>(&'v self, shared: Option<&'v Value>, own: Option<&'v Value>) -> Vec<&'v Value> {
        let mut merged: Vec<&Value> = Vec::new();
        let lists = [shared, own];
        for parameter in lists.into_iter().flatten().filter_map(Value::as_array).flatten() {
            let parameter = self.resolve(parameter);
            let key = |p: &Value| (p.get("name").cloned(), p.get("in").cloned());
            merged.retain(|existing| key(*existing) != key(parameter));
            merged.push(parameter);
        }
        merged
    }

    fn apply_parameter(&self, request: &mut ApiRequest, parameter: &Value, variables: &mut BTreeMap<String, Value>) {
        let Some(name) = parameter.get("name").and_then(Value::as_str) else { return };
        let location = parameter.get("in").and_then(Value::as_str).unwrap_or("");
        let required = parameter.get("required").and_then(Value::as_bool).unwrap_or(location == "path");
        let sample = parameter_sample(parameter);
        let token = format!("{{{{{name}}}}}");

        match location {
            "path" => {}
            "query" | "header" if !required && sample.is_none() => return,
            "query" => {
                request.query.insert(name.to_string(), token);
            }
            "header" => {
                request.headers.insert(name.to_string(), token);
            }
            "body" => {
                if let Some(schema) = parameter.get("schema") {
                    request.body = RequestBody::Json {
                        content: self.example(schema, 0),
                    };
                }
                return;
            }
            "formData" => {
                match &mut request.body {
                    RequestBody::Form { fields } => {
                        fields.insert(name.to_string(), token);
                    }
                    _ => {
                        request.body = RequestBody::Form {
                            fields: BTreeMap::from([(name.to_string(), token)]),
                        }
                    }
                }
            }
            _ => return,
        }
        if let Some(sample) = sample {
            variables.entry(name.to_string()).or_insert(sample);
        }
    }

    fn request_body(&self, body: &Value) -> RequestBody {
        let Some(content) = body.get("content").and_then(Value::as_object) else {
            return RequestBody::None;
        };
        if let Some(media) = content.get("application/json").or_else(|| {
            content
                .iter()
                .find(|(kind, _)| kind.ends_with("+json"))
                .map(|(_, media)| media)
        }) {
            return RequestBody::Json {
                content: self.media_example(media),
            };
        }
        if let Some(media) = content.get("application/x-www-form-urlencoded") {
            let fields = match self.media_example(media) {
                Value::Object(map) => map.into_iter().map(|(k, v)| (k, scalar_text(&v))).collect(),
                _ => BTreeMap::new(),
            };
            return RequestBody::Form { fields };
        }
        match content.iter().next() {
            Some((kind, media)) => {
                let example = self.media_example(media);
                RequestBody::Raw {
                    content: scalar_text(&example),
                    content_type: Some(kind.clone()),
                }
            }
            None => RequestBody::None,
        }
    }

    fn media_example(&self, media: &Value) -> Value {
        if let Some(example) = media.get("example") {
            return example.clone();
        }
        if let Some(example) = media
            .get("examples")
            .and_then(Value::as_object)
            .and_then(|examples| examples.values().next())
        {
            let example = self.resolve(example);
            return example.get("value").cloned().unwrap_or(Value::Null);
        }
        media.get("schema").map(|schema| self.example(schema, 0)).unwrap_or(Value::Null)
    }

    fn add_assertions(&self, request: &mut ApiRequest, operation: &Value) {
        let Some(responses) = operation.get("responses").and_then(Value::as_object) else {
            request.assertions.push(AssertionSpec::status_range(200, 299));
            return;
        };
        let success = responses
            .keys()
            .filter_map(|code| code.parse::<u16>().ok())
            .filter(|code| (200..300).contains(code))
            .min();
        let Some(code) = success else {
            request.assertions.push(AssertionSpec::status_range(200, 299));
            return;
        };
        request.assertions.push(AssertionSpec::status(code));

        let response = self.resolve(&responses[&code.to_string()]);
        let schema = match self.dialect {
            Dialect::OpenApi3 => response.pointer("/content/application~1json/schema"),
            Dialect::Swagger2 => response.get("schema"),
        };
        let Some(schema) = schema.map(|s| self.resolve(s)) else { return };
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).take(REQUIRED_FIELD_CHECKS))
            .into_iter()
            .flatten();
        for field in required {
            request.assertions.push(AssertionSpec::body_exists(format!("$.{field}")));
        }
    }

    fn security(&self, requirements: &Value) -> Option<AuthMethod> {
        let scheme_name = requirements.as_array()?.iter().find_map(|r| r.as_object()?.keys().next())?;
        let schemes = match self.dialect {
            Dialect::OpenApi3 => self.document.pointer("/components/securitySchemes")?,
            Dialect::Swagger2 => self.document.get("securityDefinitions")?,
        };
        let scheme = self.resolve(schemes.get(scheme_name)?);
        let kind = scheme.get("type").and_then(Value::as_str)?;
        let http_scheme = scheme.get("scheme").and_then(Value::as_str).map(str::to_ascii_lowercase);
        match (kind, http_scheme.as_deref()) {
            ("http", Some("bearer")) => Some(AuthMethod::Bearer {
                token: "{{auth_token}}".into(),
            }),
            ("http", Some("basic")) | ("basic", _) => Some(AuthMethod::Basic {
                username: "{{username}}".into(),
                password: "{{password}}".into(),
            }),
            ("apiKey", _) => Some(AuthMethod::ApiKey {
                key: scheme.get("name").and_then(Value::as_str).unwrap_or("X-API-Key").to_string(),
                value: "{{api_key}}".into(),
                location: if scheme.get("in").and_then(Value::as_str) == Some("query") {
                    ApiKeyLocation::Query
                } else {
                    ApiKeyLocation::Header
                },
            }),
            (other, _) => {
                debug!(scheme = %scheme_name, kind = other, "security scheme not mapped");
                None
            }
        }
    }

    /// Follow local `$ref`s. Unresolvable references are returned as-is.
    fn resolve<'v>(&'v self, value: &'v Value) -> &'v Value {
        let mut current = value;
        for _ in 0..MAX_REF_DEPTH {
            let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
                return current;
            };
            match reference.strip_prefix('#').and_then(|pointer| self.document.pointer(pointer)) {
                Some(target) => current = target,
                None => {
                    warn!(reference, "unresolvable $ref");
                    return current;
                }
            }
        }
        current
    }

    /// A representative value for a schema.
    fn example(&self, schema: &Value, depth: usize) -> Value {
        if depth > MAX_REF_DEPTH {
            return Value::Null;
        }
        let schema = self.resolve(schema);
        if let Some(example) = schema.get("example").or_else(|| schema.get("default")) {
            return example.clone();
        }
        if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
            return first.clone();
        }
        if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
            let mut merged = Map::new();
            for part in parts {
                if let Value::Object(fields) = self.example(part, depth + 1) {
                    merged.extend(fields);
                }
            }
            return Value::Object(merged);
        }
        if let Some(first) = ["oneOf", "anyOf"]
            .iter()
            .find_map(|key| schema.get(*key).and_then(Value::as_array).and_then(|v| v.first()))
        {
            return self.example(first, depth + 1);
        }

        let kind = schema.get("type").and_then(Value::as_str).or_else(|| {
            if schema.get("properties").is_some() { Some("object") } else { None }
        });
        match kind {
            Some("object") => {
                let properties = schema.get("properties").and_then(Value::as_object);
                Value::Object(
                    properties
                        .into_iter()
                        .flatten()
                        .map(|(name, property)| (name.clone(), self.example(property, depth + 1)))
                        .collect(),
                )
            }
            Some("array") => match schema.get("items") {
                Some(items) => json!([self.example(items, depth + 1)]),
                None => json!([]),
            },
            Some("string") => match schema.get("format").and_then(Value::as_str) {
                Some("date-time") => json!("2024-01-01T00:00:00Z"),
                Some("date") => json!("2024-01-01"),
                Some("email") => json!("user@example.com"),
                Some("uuid") => json!("00000000-0000-0000-0000-000000000000"),
                _ => json!("string"),
            },
            Some("integer") => json!(0),
            Some("number") => json!(0.0),
            Some("boolean") => json!(true),
            _ => Value::Null,
        }
    }
}

/// `/items/{id}` becomes `/items/{{id}}`.
fn templated_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 8);
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else { break };
        out.push_str(&rest[..start]);
        out.push_str("{{");
        out.push_str(&rest[start + 1..start + len]);
        out.push_str("}}");
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

fn parameter_sample(parameter: &Value) -> Option<Value> {
    parameter
        .get("example")
        .or_else(|| parameter.get("default"))
        .or_else(|| parameter.get("schema").and_then(|s| s.get("example").or_else(|| s.get("default"))))
        .cloned()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
