use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::json;

use crate::auth::AuthCredential;
use crate::collections::{ApiCollection, ApiRequest, RequestBody};
use crate::environment::{ApiEnvironment, ScopeStack, UnresolvedCollector, VariableResolver};
use crate::error::{InvalidRequestError, ResolveError};
use crate::http::{ResolvedBody, ResolvedRequest};

#[derive(Debug)]
pub(crate) enum PrepareError {
    Resolve(ResolveError),
    Invalid(InvalidRequestError),
}

impl From<ResolveError> for PrepareError {
    fn from(err: ResolveError) -> Self {
        PrepareError::Resolve(err)
    }
}

impl From<InvalidRequestError> for PrepareError {
    fn from(err: InvalidRequestError) -> Self {
        PrepareError::Invalid(err)
    }
}

/// Turn an authored request into a wire-ready one.
///
/// Headers merge collection defaults, then environment defaults, then the
/// request's own, then auth. The base URL comes from the environment when
/// it sets one, else the collection, and is only resolved for relative URLs. Every unresolved name across URL,
/// query, headers, auth and body is reported together.
pub(crate) fn prepare_request(
    resolver: &VariableResolver,
    scopes: &ScopeStack,
    collection: &ApiCollection,
    environment: Option<&ApiEnvironment>,
    request: &ApiRequest,
) -> Result<ResolvedRequest, PrepareError> {
    let mut collect = UnresolvedCollector::default();

    let url = collect.take(resolver.resolve(&request.url, scopes))?;
    let base = environment
        .and_then(|env| env.base_url.as_deref())
        .or(collection.base_url.as_deref())
        .filter(|base| !base.is_empty() && !is_absolute(&url));
    let base = match base {
        Some(base) => Some(collect.take(resolver.resolve(base, scopes))?),
        None => None,
    };

    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    let layers = [
        Some(&collection.default_headers),
        environment.map(|env| &env.default_headers),
        Some(&request.headers),
    ];
    for layer in layers.into_iter().flatten() {
        for (name, value) in layer {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            merged.insert(name.clone(), value.clone());
        }
    }
    let mut headers: BTreeMap<String, String> = collect
        .take(resolver.resolve_all(&merged, scopes))?
        .into_iter()
        .collect();

    let mut query: Vec<(String, String)> = collect.take(resolver.resolve_all(&request.query, scopes))?;

    let auth = request
        .auth
        .as_ref()
        .or(environment.and_then(|env| env.auth.as_ref()))
        .or(collection.auth.as_ref());
    if let Some(auth) = auth {
        match collect.take(auth.credential(resolver, scopes))? {
            Some(AuthCredential::Header { name, value }) => {
                headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
                headers.insert(name, value);
            }
            Some(AuthCredential::Query { name, value }) => query.push((name, value)),
            None => {}
        }
    }

    let body = resolve_body(resolver, scopes, &request.body, &mut collect)?;

    collect.finish()?;

    let url = join_url(base.as_deref(), &url);
    let url = append_query(&url, &query)?;

    Ok(ResolvedRequest {
        method: request.method.clone(),
        url,
        headers,
        body,
    })
}

fn resolve_body(
    resolver: &VariableResolver,
    scopes: &ScopeStack,
    body: &RequestBody,
    collect: &mut UnresolvedCollector,
) -> Result<ResolvedBody, PrepareError> {
    Ok(match body {
        RequestBody::None => ResolvedBody::Empty,
        RequestBody::Json { content } => ResolvedBody::Json(collect.take(resolver.resolve_value(content, scopes))?),
        RequestBody::Form { fields } => {
            ResolvedBody::Form(collect.take(resolver.resolve_all(fields, scopes))?.into_iter().collect())
        }
        RequestBody::Raw { content, content_type } => ResolvedBody::Text {
            text: collect.take(resolver.resolve(content, scopes))?,
            content_type: content_type.clone(),
        },
        RequestBody::Binary { data, content_type } => {
            let bytes = STANDARD
                .decode(data.trim())
                .map_err(|err| InvalidRequestError::new(format!("binary body is not valid base64: {err}")))?;
            ResolvedBody::Binary {
                data: Bytes::from(bytes),
                content_type: content_type.clone(),
            }
        }
        RequestBody::GraphQl { query, variables } => {
            let query = collect.take(resolver.resolve(query, scopes))?;
            let variables = collect.take(resolver.resolve_value(variables, scopes))?;
            ResolvedBody::Json(json!({ "query": query, "variables": variables }))
        }
    })
}

/// Absolute URLs are kept; anything else is appended to the base.
pub(crate) fn join_url(base: Option<&str>, url: &str) -> String {
    if is_absolute(url) {
        return url.to_string();
    }
    match base {
        Some(base) if url.is_empty() => base.to_string(),
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
        None => url.to_string(),
    }
}

fn is_absolute(url: &str) -> bool {
    url.split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'))
}

fn append_query(url: &str, pairs: &[(String, String)]) -> Result<String, InvalidRequestError> {
    if pairs.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed = reqwest::Url::parse(url)
        .map_err(|err| InvalidRequestError::new(format!("invalid URL `{url}`: {err}")))?;
    {
        let mut query = parsed.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
    }
    Ok(parsed.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKeyLocation, AuthMethod};
    use crate::environment::VariableMap;
    use serde_json::json;

    fn scopes(pairs: &[(&str, serde_json::Value)]) -> ScopeStack {
        let env: VariableMap = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        ScopeStack::new(VariableMap::new(), VariableMap::new(), env)
    }

    fn prepare(
        collection: &ApiCollection,
        environment: Option<&ApiEnvironment>,
        request: &ApiRequest,
        scopes: &ScopeStack,
    ) -> Result<ResolvedRequest, PrepareError> {
        prepare_request(&VariableResolver::new(), scopes, collection, environment, request)
    }

    #[test]
    fn joins_relative_urls_onto_base() {
        assert_eq!(join_url(Some("http://h/api/"), "/items"), "http://h/api/items");
        assert_eq!(join_url(Some("http://h"), "items"), "http://h/items");
        assert_eq!(join_url(Some("http://h"), "https://other/x"), "https://other/x");
        assert_eq!(join_url(None, "/items"), "/items");
        assert_eq!(join_url(Some("http://h"), ""), "http://h");
    }

    #[test]
    fn headers_merge_in_priority_order() {
        let collection = ApiCollection::new("c")
            .with_header("X-Layer", "collection")
            .with_header("Accept", "text/plain");
        let mut env = ApiEnvironment::new("dev");
        env.default_headers.insert("x-layer".into(), "environment".into());
        let request = ApiRequest::get("r", "http://h/").with_header("Accept", "application/json");

        let resolved = prepare(&collection, Some(&env), &request, &ScopeStack::default()).unwrap();
        assert_eq!(resolved.header("X-Layer"), Some("environment"));
        assert_eq!(resolved.header("accept"), Some("application/json"));
        assert_eq!(resolved.headers.len(), 2);
    }

    #[test]
    fn environment_base_url_wins() {
        let collection = ApiCollection::new("c").with_base_url("http://collection");
        let env = ApiEnvironment::new("dev").with_base_url("{{host}}");
        let request = ApiRequest::get("r", "/ping").with_query("q", "{{term}}");
        let s = scopes(&[("host", json!("http://env:9000")), ("term", json!("a b"))]);

        let resolved = prepare(&collection, Some(&env), &request, &s).unwrap();
        assert_eq!(resolved.url, "http://env:9000/ping?q=a+b");
    }

    #[test]
    fn absolute_urls_ignore_an_unresolvable_base() {
        let collection = ApiCollection::new("c").with_base_url("{{base}}");
        let request = ApiRequest::get("r", "http://127.0.0.1:1/x");
        let resolved = prepare(&collection, None, &request, &ScopeStack::default()).unwrap();
        assert_eq!(resolved.url, "http://127.0.0.1:1/x");

        let relative = ApiRequest::get("r", "/x");
        let err = prepare(&collection, None, &relative, &ScopeStack::default()).unwrap_err();
        assert!(matches!(
            err,
            PrepareError::Resolve(ResolveError::Unresolved { ref names }) if names == &["base"]
        ));
    }

    #[test]
    fn auth_contributes_header_or_query() {
        let collection = ApiCollection::new("c");
        let request = ApiRequest::get("r", "http://h/x").with_auth(AuthMethod::ApiKey {
            key: "key".into(),
            value: "{{k}}".into(),
            location: ApiKeyLocation::Query,
        });
        let resolved = prepare(&collection, None, &request, &scopes(&[("k", json!("s3"))])).unwrap();
        assert_eq!(resolved.url, "http://h/x?key=s3");

        let mut collection = ApiCollection::new("c");
        collection.auth = Some(AuthMethod::Bearer { token: "t".into() });
        let request = ApiRequest::get("r", "http://h/x");
        let resolved = prepare(&collection, None, &request, &ScopeStack::default()).unwrap();
        assert_eq!(resolved.header("authorization"), Some("Bearer t"));
    }

    #[test]
    fn all_unresolved_names_are_reported() {
        let collection = ApiCollection::new("c");
        let request = ApiRequest::post("r", "{{base}}/items")
            .with_header("Authorization", "Bearer {{token}}")
            .with_json(json!({ "owner": "{{user}}", "again": "{{base}}" }));
        let err = prepare(&collection, None, &request, &ScopeStack::default()).unwrap_err();
        match err {
            PrepareError::Resolve(ResolveError::Unresolved { names }) => {
                assert_eq!(names, vec!["base", "token", "user"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn graphql_becomes_json_envelope() {
        let collection = ApiCollection::new("c");
        let request = ApiRequest::post("q", "http://h/graphql").with_body(RequestBody::GraphQl {
            query: "query { item(id: {{id}}) { name } }".into(),
            variables: json!({ "limit": 1 }),
        });
        let resolved = prepare(&collection, None, &request, &scopes(&[("id", json!(3))])).unwrap();
        assert_eq!(
            resolved.body,
            ResolvedBody::Json(json!({ "query": "query { item(id: 3) { name } }", "variables": { "limit": 1 } }))
        );
    }

    #[test]
    fn bad_base64_is_invalid() {
        let collection = ApiCollection::new("c");
        let request = ApiRequest::post("b", "http://h/upload").with_body(RequestBody::Binary {
            data: "***".into(),
            content_type: None,
        });
        assert!(matches!(
            prepare(&collection, None, &request, &ScopeStack::default()),
            Err(PrepareError::Invalid(_))
        ));
    }
}
