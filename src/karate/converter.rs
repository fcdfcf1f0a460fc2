use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use super::model::{Background, FeatureModel, Scenario, Step, StepKeyword};
use crate::collections::{ApiCollection, ApiRequest, CollectionSource, PassthroughStep, RequestBody, StepPhase};
use crate::http::HttpMethod;
use crate::testing::{
    AssertionKind, AssertionSpec, BodyPath, ExtractionRule, ExtractionSource, JsonType, Operator,
};

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("static pattern"));
    };
}

pattern!(EMBEDDED, r"#\(\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\)");
pattern!(TOKEN, r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}");
pattern!(QUOTED, r#"'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)""#);
pattern!(URL, r"^url\s+(.+)$");
pattern!(PATH, r"^path\s+(.+)$");
pattern!(PARAM, r"^param\s+([A-Za-z0-9_.\-\[\]]+)\s*=\s*(.+)$");
pattern!(HEADER, r"^header\s+([A-Za-z0-9_\-]+)\s*=\s*(.+)$");
pattern!(FORM_FIELD, r"^form\s+field\s+([A-Za-z0-9_.\-\[\]]+)\s*=\s*(.+)$");
pattern!(REQUEST, r"^request(?:\s+(.+))?$");
pattern!(METHOD, r"^method\s+([A-Za-z]+)$");
pattern!(STATUS, r"^status\s+(\d{3})$");
pattern!(STATUS_CMP, r"^assert\s+responseStatus\s*(==|!=)\s*(\d{3})$");
pattern!(
    STATUS_RANGE,
    r"^assert\s+responseStatus\s*>=\s*(\d{3})\s*&&\s*responseStatus\s*<=\s*(\d{3})$"
);
pattern!(STATUS_ANY, r"^assert\s+(responseStatus\s*==\s*\d{3}(?:\s*\|\|\s*responseStatus\s*==\s*\d{3})+)$");
pattern!(CODE, r"\d{3}");
pattern!(RESPONSE_TIME, r"^assert\s+responseTime\s*(<=|<)\s*(\d+)$");
pattern!(
    MATCH_HEADER,
    r"^match\s+responseHeaders\['([^']+)'\](\[0\])?\s+(==|!=|contains|!contains)\s+(.+)$"
);
pattern!(MATCH_BODY, r"^match\s+(response(?:[.\[]\S*)?)\s+(==|!=|contains|!contains)\s+(.+)$");
pattern!(BODY_CMP, r"^assert\s+(response(?:[.\[]\S*)?)\s*(>|<)\s*(-?\d+(?:\.\d+)?)$");
pattern!(DEF, r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$");
pattern!(DEF_HEADER, r"^responseHeaders\['([^']+)'\]\[0\]$");
pattern!(DEF_REGEX, r#"^karate\.extract\(\s*response\s*,\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")\s*,\s*1\s*\)$"#);

/// Maps between feature files and collections.
///
/// Feature to collection: every scenario (every example row of an outline)
/// becomes one request per `method` step. Steps with no mapping ride along
/// as passthrough steps. Collection to feature: one scenario per request,
/// rendered in a fixed canonical form.
#[derive(Debug, Clone, Copy, Default)]
pub struct KarateConverter;

impl KarateConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn to_collection(&self, feature: &FeatureModel) -> ApiCollection {
        let mut collection = ApiCollection::new(feature.name.clone());
        collection.description = feature.description.clone();
        collection.source = CollectionSource::Karate;

        if let Some(background) = &feature.background {
            self.apply_background(background, &mut collection);
        }

        for scenario in &feature.scenarios {
            let tags = request_tags(&feature.tags, &scenario.tags);
            for (name, steps) in instances(scenario) {
                for mut request in ScenarioBuilder::new(&name, scenario).build(&steps) {
                    request.tags = tags.clone();
                    request.description = scenario.description.clone();
                    collection.requests.push(request);
                }
            }
        }
        collection
    }

    fn apply_background(&self, background: &Background, collection: &mut ApiCollection) {
        for step in &background.steps {
            let text = step.text.as_str();
            let mapped = if let Some(caps) = URL.captures(text) {
                literal_string(&caps[1]).map(|url| collection.base_url = Some(url))
            } else if let Some(caps) = HEADER.captures(text) {
                literal_string(&caps[2]).map(|value| {
                    collection.default_headers.insert(caps[1].to_string(), value);
                })
            } else if let Some(caps) = DEF.captures(text) {
                literal_value(&caps[2]).map(|value| {
                    collection.variables.insert(caps[1].to_string(), value);
                })
            } else {
                None
            };
            if mapped.is_none() {
                warn!(line = step.line, step = %step.text, "background step kept for manual review");
                collection.passthrough.push(passthrough(step, StepPhase::BeforeSend));
            }
        }
    }

    pub fn from_collection(&self, collection: &ApiCollection) -> FeatureModel {
        let mut background = Vec::new();
        if let Some(base) = collection.base_url.as_deref().filter(|b| !b.is_empty()) {
            background.push(Step::new(StepKeyword::Star, format!("url {}", quote(base))));
        }
        for (name, value) in &collection.default_headers {
            background.push(Step::new(StepKeyword::Star, format!("header {name} = {}", quote(value))));
        }
        for (name, value) in &collection.variables {
            background.push(Step::new(StepKeyword::Star, format!("def {name} = {}", render_value(value))));
        }
        background.extend(collection.passthrough.iter().map(restore_step));

        FeatureModel {
            name: collection.name.clone(),
            description: collection.description.clone(),
            tags: Vec::new(),
            background: (!background.is_empty()).then_some(Background {
                line: 0,
                steps: background,
            }),
            scenarios: collection.requests.iter().map(request_scenario).collect(),
        }
    }
}

/// Expand an outline into named instances with `<column>` substituted.
fn instances(scenario: &Scenario) -> Vec<(String, Vec<Step>)> {
    if !scenario.outline {
        return vec![(scenario.name.clone(), scenario.steps.clone())];
    }
    let mut out = Vec::new();
    let rows = scenario
        .examples
        .iter()
        .flat_map(|examples| examples.rows.iter().map(move |row| (&examples.header, row)));
    for (number, (header, row)) in rows.enumerate() {
        let fill = |text: &str| {
            header
                .iter()
                .zip(row)
                .fold(text.to_string(), |acc, (column, value)| acc.replace(&format!("<{column}>"), value))
        };
        let steps = scenario
            .steps
            .iter()
            .map(|step| Step {
                keyword: step.keyword,
                text: fill(step.text.as_str()),
                line: step.line,
                doc_string: step.doc_string.as_deref().map(&fill),
                table: step
                    .table
                    .as_ref()
                    .map(|table| table.iter().map(|r| r.iter().map(|c| fill(c.as_str())).collect()).collect()),
            })
            .collect();
        out.push((format!("{} [{}]", fill(scenario.name.as_str()), number + 1), steps));
    }
    out
}

fn request_tags(feature: &[String], scenario: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in feature.iter().chain(scenario) {
        let tag = tag.trim_start_matches('@').to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Accumulates the requests of one scenario instance.
struct ScenarioBuilder<'a> {
    name: &'a str,
    scenario: &'a Scenario,
    done: Vec<ApiRequest>,
    url: Option<String>,
    path: Vec<String>,
    draft: ApiRequest,
    sent: bool,
}

impl<'a> ScenarioBuilder<'a> {
    fn new(name: &'a str, scenario: &'a Scenario) -> Self {
        Self {
            name,
            scenario,
            done: Vec::new(),
            url: None,
            path: Vec::new(),
            draft: ApiRequest::get(name, ""),
            sent: false,
        }
    }

    fn build(mut self, steps: &[Step]) -> Vec<ApiRequest> {
        for step in steps {
            if !self.apply(step) {
                warn!(
                    scenario = %self.scenario.name,
                    line = step.line,
                    step = %step.text,
                    "step kept for manual review"
                );
                let phase = if self.sent { StepPhase::AfterSend } else { StepPhase::BeforeSend };
                self.draft.passthrough.push(passthrough(step, phase));
            }
        }
        if !self.sent {
            warn!(scenario = %self.name, "scenario has no `method` step; defaulting to GET");
        }
        self.flush();
        self.done
    }

    /// Starting a new request after one was sent closes the previous one.
    fn building(&mut self) {
        if self.sent {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let number = self.done.len() + 1;
        let name = if number == 1 { self.name.to_string() } else { format!("{} ({number})", self.name) };
        let mut request = std::mem::replace(&mut self.draft, ApiRequest::get(String::new(), ""));
        request.name = name;
        request.url = compose_url(self.url.as_deref(), &self.path);
        self.done.push(request);
        self.sent = false;
        self.path.clear();
    }

    fn apply(&mut self, step: &Step) -> bool {
        let text = step.text.as_str();

        if let Some(caps) = URL.captures(text) {
            let Some(url) = literal_string(&caps[1]) else { return false };
            self.building();
            self.url = Some(url);
            return true;
        }
        if let Some(caps) = PATH.captures(text) {
            let Some(segments) = literal_list(&caps[1]) else { return false };
            self.building();
            self.path.extend(segments);
            return true;
        }
        if let Some(caps) = PARAM.captures(text) {
            let Some(value) = literal_string(&caps[2]) else { return false };
            self.building();
            self.draft.query.insert(caps[1].to_string(), value);
            return true;
        }
        if let Some(caps) = HEADER.captures(text) {
            let Some(value) = literal_string(&caps[2]) else { return false };
            self.building();
            self.draft.headers.insert(caps[1].to_string(), value);
            return true;
        }
        if let Some(caps) = FORM_FIELD.captures(text) {
            let Some(value) = literal_string(&caps[2]) else { return false };
            self.building();
            match &mut self.draft.body {
                RequestBody::Form { fields } => {
                    fields.insert(caps[1].to_string(), value);
                }
                body => {
                    *body = RequestBody::Form {
                        fields: BTreeMap::from([(caps[1].to_string(), value)]),
                    }
                }
            }
            return true;
        }
        if let Some(caps) = REQUEST.captures(text) {
            let body = match (caps.get(1), step.doc_string.as_deref()) {
                (None, Some(doc)) => doc_body(doc),
                (Some(inline), None) => inline_body(inline.as_str()),
                _ => None,
            };
            let Some(body) = body else { return false };
            self.building();
            self.draft.body = body;
            return true;
        }
        if let Some(caps) = METHOD.captures(text) {
            self.building();
            self.draft.method = HttpMethod::from(caps[1].to_ascii_uppercase());
            self.sent = true;
            return true;
        }

        if !self.sent {
            return false;
        }
        if let Some(assertion) = assertion_step(text) {
            self.draft.assertions.push(assertion);
            return true;
        }
        if let Some(rule) = extraction_step(text) {
            self.draft.extractions.push(rule);
            return true;
        }
        false
    }
}

fn compose_url(url: Option<&str>, path: &[String]) -> String {
    let joined: Vec<&str> = path
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    let joined = joined.join("/");
    match (url, joined.is_empty()) {
        (Some(url), true) => url.to_string(),
        (Some(url), false) => format!("{}/{joined}", url.trim_end_matches('/')),
        (None, _) => format!("/{joined}"),
    }
}

fn doc_body(doc: &str) -> Option<RequestBody> {
    let text = to_tokens(doc.trim());
    Some(match serde_json::from_str::<Value>(&text) {
        Ok(content @ (Value::Object(_) | Value::Array(_))) => RequestBody::Json { content },
        _ => RequestBody::Raw {
            content: to_tokens(doc),
            content_type: None,
        },
    })
}

fn inline_body(inline: &str) -> Option<RequestBody> {
    match literal_value(inline)? {
        Value::String(content) => Some(RequestBody::Raw {
            content,
            content_type: None,
        }),
        content @ (Value::Object(_) | Value::Array(_)) => Some(RequestBody::Json { content }),
        _ => None,
    }
}

fn assertion_step(text: &str) -> Option<AssertionSpec> {
    if let Some(caps) = STATUS.captures(text) {
        return Some(AssertionSpec::status(caps[1].parse().ok()?));
    }
    if let Some(caps) = STATUS_CMP.captures(text) {
        let code: u16 = caps[2].parse().ok()?;
        return Some(match &caps[1] {
            "==" => AssertionSpec::status(code),
            _ => AssertionSpec::new(AssertionKind::Status, Operator::NotEquals).expecting(code),
        });
    }
    if let Some(caps) = STATUS_RANGE.captures(text) {
        return Some(AssertionSpec::status_range(caps[1].parse().ok()?, caps[2].parse().ok()?));
    }
    if let Some(caps) = STATUS_ANY.captures(text) {
        let codes: Vec<u16> = CODE
            .find_iter(&caps[1])
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        return Some(AssertionSpec::status_in(&codes));
    }
    if let Some(caps) = RESPONSE_TIME.captures(text) {
        let limit: u64 = caps[2].parse().ok()?;
        return Some(match &caps[1] {
            "<=" => AssertionSpec::response_time(limit),
            _ => AssertionSpec::new(AssertionKind::ResponseTime, Operator::LessThan).expecting(limit),
        });
    }
    if let Some(caps) = MATCH_HEADER.captures(text) {
        return header_match(&caps);
    }
    if let Some(caps) = MATCH_BODY.captures(text) {
        return body_match(&caps);
    }
    if let Some(caps) = BODY_CMP.captures(text) {
        let path = karate_path(&caps[1])?;
        let limit: f64 = caps[3].parse().ok()?;
        let operator = if &caps[2] == ">" { Operator::GreaterThan } else { Operator::LessThan };
        return Some(AssertionSpec::body_path(path, operator).expecting(limit));
    }
    None
}

/// Fuzzy markers accepted on the right of `match`.
enum Expectation {
    Present,
    NotPresent,
    Type(JsonType),
    NotNull,
    Regex(String),
    Literal(Value),
}

fn expectation(raw: &str) -> Option<Expectation> {
    let value = literal_value(raw)?;
    let Value::String(text) = &value else {
        return Some(Expectation::Literal(value));
    };
    Some(match text.as_str() {
        "#present" => Expectation::Present,
        "#notpresent" => Expectation::NotPresent,
        "#notnull" => Expectation::NotNull,
        marker if marker.starts_with("#regex ") => Expectation::Regex(marker["#regex ".len()..].to_string()),
        marker => match marker.strip_prefix('#').and_then(JsonType::parse) {
            Some(json_type) => Expectation::Type(json_type),
            None => Expectation::Literal(value),
        },
    })
}

fn header_match(caps: &Captures<'_>) -> Option<AssertionSpec> {
    let name = &caps[1];
    let first = caps.get(2).is_some();
    let op = &caps[3];
    let expected = expectation(&caps[4])?;
    let spec = match (op, expected) {
        ("==", Expectation::Present) | ("!=", Expectation::NotPresent) if !first => {
            AssertionSpec::header(name, Operator::Exists)
        }
        ("==", Expectation::NotPresent) | ("!=", Expectation::Present) if !first => {
            AssertionSpec::header(name, Operator::NotExists)
        }
        ("==", Expectation::Regex(pattern)) if first => {
            AssertionSpec::header(name, Operator::Matches).expecting(pattern)
        }
        (op, Expectation::Literal(Value::String(value))) if first => {
            AssertionSpec::header(name, text_operator(op)).expecting(value)
        }
        _ => return None,
    };
    Some(spec)
}

fn body_match(caps: &Captures<'_>) -> Option<AssertionSpec> {
    let path = karate_path(&caps[1])?;
    let root = path == "$";
    let op = &caps[2];
    let spec = match (op, expectation(&caps[3])?) {
        ("==", Expectation::Present) | ("!=", Expectation::NotPresent) => AssertionSpec::body_exists(path),
        ("==", Expectation::NotPresent) | ("!=", Expectation::Present) => {
            AssertionSpec::body_path(path, Operator::NotExists)
        }
        ("==", Expectation::NotNull) => AssertionSpec::body_path(path, Operator::NotEquals).expecting(Value::Null),
        ("==", Expectation::Type(json_type)) => {
            AssertionSpec::body_path(path, Operator::TypeIs).expecting(json_type.as_str())
        }
        ("==", Expectation::Regex(pattern)) if root => {
            AssertionSpec::new(AssertionKind::BodyText, Operator::Matches).expecting(pattern)
        }
        ("==", Expectation::Regex(pattern)) => AssertionSpec::body_path(path, Operator::Matches).expecting(pattern),
        (op, Expectation::Literal(Value::String(text))) if root => {
            AssertionSpec::new(AssertionKind::BodyText, text_operator(op)).expecting(text)
        }
        (op, Expectation::Literal(value)) => AssertionSpec::body_path(path, text_operator(op)).expecting(value),
        _ => return None,
    };
    Some(spec)
}

fn text_operator(op: &str) -> Operator {
    match op {
        "!=" => Operator::NotEquals,
        "contains" => Operator::Contains,
        "!contains" => Operator::NotContains,
        _ => Operator::Equals,
    }
}

fn extraction_step(text: &str) -> Option<ExtractionRule> {
    let caps = DEF.captures(text)?;
    let name = &caps[1];
    let expr = caps[2].trim();
    if expr == "responseStatus" {
        return Some(ExtractionRule::new(name, ExtractionSource::Status, ""));
    }
    if let Some(header) = DEF_HEADER.captures(expr) {
        return Some(ExtractionRule::header(name, &header[1]));
    }
    if let Some(regex) = DEF_REGEX.captures(expr) {
        let pattern = regex.get(1).or_else(|| regex.get(2))?.as_str().replace("\\'", "'");
        return Some(ExtractionRule::new(name, ExtractionSource::Regex, pattern));
    }
    karate_path(expr).map(|path| ExtractionRule::body(name, path))
}

/// `response.a[0].b` to `$.a[0].b`.
fn karate_path(expr: &str) -> Option<String> {
    let rest = expr.strip_prefix("response")?;
    if !(rest.is_empty() || rest.starts_with('.') || rest.starts_with('[')) {
        return None;
    }
    BodyPath::parse(&format!("${rest}")).ok().map(|path| path.to_string())
}

/// A quoted string or JSON literal. Anything else is an expression we do
/// not evaluate.
fn literal_value(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Some(caps) = QUOTED.captures(raw)
        && caps.get(0).map(|m| m.as_str().len()) == Some(raw.len())
    {
        let inner = caps.get(1).or_else(|| caps.get(2))?.as_str();
        return Some(Value::String(to_tokens(&unescape(inner))));
    }
    serde_json::from_str::<Value>(&to_tokens(raw)).ok()
}

fn literal_string(raw: &str) -> Option<String> {
    match literal_value(raw)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// `'a', 'b', 1` as used by `path`.
fn literal_list(raw: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let (item, tail) = match QUOTED.find(rest) {
            Some(found) if found.start() == 0 => (&rest[..found.end()], &rest[found.end()..]),
            _ => match rest.find(',') {
                Some(comma) => (&rest[..comma], &rest[comma..]),
                None => (rest, ""),
            },
        };
        items.push(literal_string(item)?);
        rest = tail.trim_start();
        rest = match rest.strip_prefix(',') {
            Some(after) => after.trim_start(),
            None if rest.is_empty() => rest,
            None => return None,
        };
    }
    (!items.is_empty()).then_some(items)
}

fn unescape(text: &str) -> String {
    text.replace("\\'", "'").replace("\\\"", "\"")
}

/// `#(name)` to `{{name}}`.
pub(crate) fn to_tokens(text: &str) -> String {
    EMBEDDED.replace_all(text, "{{$1}}").into_owned()
}

/// `{{name}}` to `#(name)`.
pub(crate) fn to_embedded(text: &str) -> String {
    TOKEN.replace_all(text, "#($1)").into_owned()
}

fn passthrough(step: &Step, phase: StepPhase) -> PassthroughStep {
    PassthroughStep {
        keyword: step.keyword.as_str().to_string(),
        text: step.text.clone(),
        phase,
        doc_string: step.doc_string.clone(),
        table: step.table.clone(),
    }
}

fn restore_step(step: &PassthroughStep) -> Step {
    let keyword = StepKeyword::ALL
        .into_iter()
        .find(|k| k.as_str() == step.keyword)
        .unwrap_or(StepKeyword::Star);
    Step {
        keyword,
        text: step.text.clone(),
        line: 0,
        doc_string: step.doc_string.clone(),
        table: step.table.clone(),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", to_embedded(text).replace('\'', "\\'"))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => quote(text),
        other => to_embedded(&other.to_string()),
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("{{")
}

fn request_scenario(request: &ApiRequest) -> Scenario {
    let mut steps = StepList::default();

    if request.url.is_empty() {
        steps.given("path '/'".to_string());
    } else if is_absolute(&request.url) {
        steps.given(format!("url {}", quote(&request.url)));
    } else {
        steps.given(format!("path {}", quote(&request.url)));
    }
    for (name, value) in &request.query {
        steps.given(format!("param {name} = {}", quote(value)));
    }
    for (name, value) in &request.headers {
        steps.given(format!("header {name} = {}", quote(value)));
    }
    match &request.body {
        RequestBody::None => {}
        RequestBody::Json { content } => steps.request_doc(content),
        RequestBody::GraphQl { query, variables } => {
            steps.request_doc(&serde_json::json!({ "query": query, "variables": variables }));
        }
        RequestBody::Form { fields } => {
            for (name, value) in fields {
                steps.given(format!("form field {name} = {}", quote(value)));
            }
        }
        RequestBody::Raw { content, .. } if !content.contains('\n') => {
            steps.given(format!("request {}", quote(content)));
        }
        RequestBody::Raw { content, .. } => {
            steps.push(Step::new(StepKeyword::And, "request").with_doc_string(to_embedded(content)));
        }
        RequestBody::Binary { .. } => {
            warn!(request = %request.name, "binary bodies have no feature form; body omitted");
        }
    }
    for step in request.passthrough.iter().filter(|s| s.phase == StepPhase::BeforeSend) {
        steps.push(restore_step(step));
    }

    steps.push(Step::new(
        StepKeyword::When,
        format!("method {}", request.method.as_str().to_ascii_lowercase()),
    ));

    for assertion in &request.assertions {
        match assertion_text(assertion) {
            Some(text) => steps.then(text),
            None => warn!(request = %request.name, kind = %assertion.kind.as_str(), "assertion has no feature form"),
        }
    }
    for rule in &request.extractions {
        match extraction_text(rule) {
            Some(text) => steps.then(text),
            None => warn!(request = %request.name, variable = %rule.name, "extraction has no feature form"),
        }
    }
    for step in request.passthrough.iter().filter(|s| s.phase == StepPhase::AfterSend) {
        steps.push(restore_step(step));
    }

    Scenario {
        name: request.name.clone(),
        line: 0,
        tags: request.tags.iter().map(|tag| format!("@{}", tag.trim_start_matches('@'))).collect(),
        description: request.description.clone(),
        steps: steps.0,
        outline: false,
        examples: Vec::new(),
    }
}

/// Picks `Given`/`Then` for the first step of a phase and `And` after.
#[derive(Default)]
struct StepList(Vec<Step>);

impl StepList {
    fn push(&mut self, step: Step) {
        self.0.push(step);
    }

    fn phase(&mut self, lead: StepKeyword, text: String) {
        let keyword = match self.0.last() {
            Some(last) if last.keyword == lead || (last.keyword == StepKeyword::And && self.in_phase(lead)) => {
                StepKeyword::And
            }
            _ => lead,
        };
        self.0.push(Step::new(keyword, text));
    }

    fn in_phase(&self, lead: StepKeyword) -> bool {
        self.0
            .iter()
            .rev()
            .find(|step| step.keyword != StepKeyword::And)
            .is_some_and(|step| step.keyword == lead)
    }

    fn given(&mut self, text: String) {
        self.phase(StepKeyword::Given, text);
    }

    fn then(&mut self, text: String) {
        self.phase(StepKeyword::Then, text);
    }

    fn request_doc(&mut self, content: &Value) {
        let pretty = serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string());
        self.given("request".to_string());
        if let Some(last) = self.0.last_mut() {
            last.doc_string = Some(to_embedded(&pretty));
        }
    }
}

fn expected_literal(spec: &AssertionSpec) -> String {
    spec.expected.as_ref().map(render_value).unwrap_or_else(|| "null".to_string())
}

fn expected_u64(spec: &AssertionSpec) -> Option<u64> {
    spec.expected.as_ref()?.as_u64()
}

fn match_op(operator: Operator) -> Option<&'static str> {
    Some(match operator {
        Operator::Equals => "==",
        Operator::NotEquals => "!=",
        Operator::Contains => "contains",
        Operator::NotContains => "!contains",
        _ => return None,
    })
}

fn assertion_text(spec: &AssertionSpec) -> Option<String> {
    let expected_text = || spec.expected.as_ref().and_then(Value::as_str).map(str::to_string);
    match spec.kind {
        AssertionKind::Status => match spec.operator.unwrap_or(Operator::Equals) {
            Operator::Equals => Some(format!("status {}", expected_u64(spec)?)),
            Operator::NotEquals => Some(format!("assert responseStatus != {}", expected_u64(spec)?)),
            Operator::In => {
                let codes: Vec<String> = spec
                    .expected
                    .as_ref()?
                    .as_array()?
                    .iter()
                    .map(|code| code.as_u64().map(|c| format!("responseStatus == {c}")))
                    .collect::<Option<_>>()?;
                Some(format!("assert {}", codes.join(" || ")))
            }
            Operator::Range => {
                let bounds = spec.expected.as_ref()?.as_array()?;
                let (low, high) = (bounds.first()?.as_u64()?, bounds.get(1)?.as_u64()?);
                Some(format!("assert responseStatus >= {low} && responseStatus <= {high}"))
            }
            _ => None,
        },
        AssertionKind::Header => {
            let name = spec.target.as_deref()?;
            match spec.operator.unwrap_or(Operator::Exists) {
                Operator::Exists => Some(format!("match responseHeaders['{name}'] == '#present'")),
                Operator::NotExists => Some(format!("match responseHeaders['{name}'] == '#notpresent'")),
                Operator::Matches => Some(format!(
                    "match responseHeaders['{name}'][0] == {}",
                    quote(&format!("#regex {}", expected_text()?))
                )),
                operator => Some(format!(
                    "match responseHeaders['{name}'][0] {} {}",
                    match_op(operator)?,
                    quote(&expected_text()?)
                )),
            }
        }
        AssertionKind::BodyPath => {
            let path = BodyPath::parse(spec.target.as_deref().unwrap_or("$")).ok()?;
            let karate = path.render_with_root("response");
            let default = if spec.expected.is_some() { Operator::Equals } else { Operator::Exists };
            match spec.operator.unwrap_or(default) {
                Operator::Exists => Some(format!("match {karate} == '#present'")),
                Operator::NotExists => Some(format!("match {karate} == '#notpresent'")),
                Operator::TypeIs => Some(format!("match {karate} == '#{}'", expected_text()?)),
                Operator::Matches => Some(format!("match {karate} == {}", quote(&format!("#regex {}", expected_text()?)))),
                Operator::NotEquals if spec.expected.as_ref().is_some_and(Value::is_null) => {
                    Some(format!("match {karate} == '#notnull'"))
                }
                Operator::GreaterThan => Some(format!("assert {karate} > {}", spec.expected.as_ref()?)),
                Operator::LessThan => Some(format!("assert {karate} < {}", spec.expected.as_ref()?)),
                operator => Some(format!("match {karate} {} {}", match_op(operator)?, expected_literal(spec))),
            }
        }
        AssertionKind::BodyText => match spec.operator.unwrap_or(Operator::Contains) {
            Operator::Matches => Some(format!("match response == {}", quote(&format!("#regex {}", expected_text()?)))),
            operator => Some(format!("match response {} {}", match_op(operator)?, quote(&expected_text()?))),
        },
        AssertionKind::ResponseTime => match spec.operator.unwrap_or(Operator::AtMost) {
            Operator::AtMost => Some(format!("assert responseTime <= {}", expected_u64(spec)?)),
            Operator::LessThan => Some(format!("assert responseTime < {}", expected_u64(spec)?)),
            _ => None,
        },
        AssertionKind::Unknown => None,
    }
}

fn extraction_text(rule: &ExtractionRule) -> Option<String> {
    let expr = match rule.source {
        ExtractionSource::Body => BodyPath::parse(&rule.path).ok()?.render_with_root("response"),
        ExtractionSource::RawBody => "response".to_string(),
        ExtractionSource::Header => format!("responseHeaders['{}'][0]", rule.path),
        ExtractionSource::Status => "responseStatus".to_string(),
        ExtractionSource::Regex => format!("karate.extract(response, '{}', 1)", rule.path.replace('\'', "\\'")),
        ExtractionSource::Unknown => return None,
    };
    Some(format!("def {} = {expr}", rule.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::karate::KarateFeatureParser;
    use serde_json::json;

    fn convert(text: &str) -> ApiCollection {
        let feature = KarateFeatureParser::new().parse(text).unwrap();
        KarateConverter::new().to_collection(&feature)
    }

    const FEATURE: &str = r##"
Feature: Items
  Background:
    * url 'http://svc'
    * header Accept = 'application/json'
    * def item = 'widget'

  @smoke
  Scenario: create and fetch
    Given path '/items'
    And request
      """
      { "name": "#(item)" }
      """
    When method post
    Then status 201
    And match response.id == '#present'
    And match response.name == '#(item)'
    And def id = response.id
    Given path '/items', '#(id)'
    When method get
    Then assert responseStatus >= 200 && responseStatus <= 299
    And match responseHeaders['Content-Type'][0] contains 'json'
    And assert responseTime < 500
    And print response
"##;

    #[test]
    fn scenario_splits_on_method() {
        let collection = convert(FEATURE);
        assert_eq!(collection.source, CollectionSource::Karate);
        assert_eq!(collection.base_url.as_deref(), Some("http://svc"));
        assert_eq!(collection.default_headers.get("Accept").map(String::as_str), Some("application/json"));
        assert_eq!(collection.variables.get("item"), Some(&json!("widget")));
        assert_eq!(collection.requests.len(), 2);

        let create = &collection.requests[0];
        assert_eq!(create.name, "create and fetch");
        assert_eq!(create.method, HttpMethod::Post);
        assert_eq!(create.url, "/items");
        assert_eq!(create.tags, vec!["smoke"]);
        assert_eq!(create.body, RequestBody::Json { content: json!({ "name": "{{item}}" }) });
        assert_eq!(create.assertions[0], AssertionSpec::status(201));
        assert_eq!(create.assertions[1], AssertionSpec::body_exists("$.id"));
        assert_eq!(create.assertions[2], AssertionSpec::body_equals("$.name", "{{item}}"));
        assert_eq!(create.extractions, vec![ExtractionRule::body("id", "$.id")]);

        let fetch = &collection.requests[1];
        assert_eq!(fetch.name, "create and fetch (2)");
        assert_eq!(fetch.url, "/items/{{id}}");
        assert_eq!(fetch.assertions[0], AssertionSpec::status_range(200, 299));
        assert_eq!(
            fetch.assertions[1],
            AssertionSpec::header("Content-Type", Operator::Contains).expecting("json")
        );
        assert_eq!(fetch.passthrough.len(), 1);
        assert_eq!(fetch.passthrough[0].text, "print response");
        assert_eq!(fetch.passthrough[0].phase, StepPhase::AfterSend);
        assert!(collection.needs_review());
    }

    #[test]
    fn outline_rows_become_requests() {
        let text = "Feature: f\nScenario Outline: get <id>\n* path '/items/<id>'\n* method get\n* status <code>\nExamples:\n| id | code |\n| 1 | 200 |\n| 2 | 404 |\n";
        let collection = convert(text);
        let names: Vec<&str> = collection.requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["get 1 [1]", "get 2 [2]"]);
        assert_eq!(collection.requests[1].url, "/items/2");
        assert_eq!(collection.requests[1].assertions[0], AssertionSpec::status(404));
    }

    #[test]
    fn fuzzy_markers() {
        let text = "Feature: f\nScenario: s\n* method get\n\
* match response.name == '#string'\n\
* match response.gone == '#notpresent'\n\
* match response.code == '#regex [A-Z]+'\n\
* match response contains 'ok'\n\
* assert response.count > 2\n\
* match responseHeaders['X-Id'] == '#present'\n\
* assert responseStatus == 200 || responseStatus == 204\n";
        let assertions = &convert(text).requests[0].assertions;
        assert_eq!(assertions[0], AssertionSpec::body_path("$.name", Operator::TypeIs).expecting("string"));
        assert_eq!(assertions[1], AssertionSpec::body_path("$.gone", Operator::NotExists));
        assert_eq!(assertions[2], AssertionSpec::body_path("$.code", Operator::Matches).expecting("[A-Z]+"));
        assert_eq!(assertions[3], AssertionSpec::body_contains("ok"));
        assert_eq!(assertions[4], AssertionSpec::body_path("$.count", Operator::GreaterThan).expecting(2.0));
        assert_eq!(assertions[5], AssertionSpec::header("X-Id", Operator::Exists));
        assert_eq!(assertions[6], AssertionSpec::status_in(&[200, 204]));
    }

    #[test]
    fn scenario_without_method_defaults_to_get() {
        let collection = convert("Feature: f\nScenario: s\n* url 'http://h/ping'\n* print 'hi'\n");
        let request = &collection.requests[0];
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "http://h/ping");
        assert_eq!(request.passthrough[0].phase, StepPhase::BeforeSend);
    }

    #[test]
    fn extraction_forms() {
        let text = "Feature: f\nScenario: s\n* method get\n\
* def code = responseStatus\n\
* def etag = responseHeaders['ETag'][0]\n\
* def token = karate.extract(response, 'token=(\\w+)', 1)\n";
        let rules = &convert(text).requests[0].extractions;
        assert_eq!(rules[0], ExtractionRule::new("code", ExtractionSource::Status, ""));
        assert_eq!(rules[1], ExtractionRule::header("etag", "ETag"));
        assert_eq!(rules[2], ExtractionRule::new("token", ExtractionSource::Regex, "token=(\\w+)"));
    }

    #[test]
    fn tokens_map_both_ways() {
        assert_eq!(to_tokens("/items/#(id)?q=#( user.name )"), "/items/{{id}}?q={{user.name}}");
        assert_eq!(to_embedded("{{base}}/x/{{ id }}"), "#(base)/x/#(id)");
    }

    #[test]
    fn from_collection_is_a_fixed_point() {
        let converter = KarateConverter::new();
        let first = converter.from_collection(&convert(FEATURE)).to_feature_text();
        let reparsed = KarateFeatureParser::new().parse(&first).unwrap();
        let second = converter.from_collection(&converter.to_collection(&reparsed)).to_feature_text();
        assert_eq!(first, second);
        assert!(first.contains("  Background:\n    * url 'http://svc'\n"));
        assert!(first.contains("    When method post\n    Then status 201\n    And match response.id == '#present'\n"));
        assert!(first.contains("    Given path '/items/#(id)'\n"));
    }

    #[test]
    fn from_collection_renders_native_requests() {
        let collection = ApiCollection::new("native")
            .with_base_url("{{base}}")
            .with_request(
                ApiRequest::post("create", "/items")
                    .with_query("dry", "true")
                    .with_json(json!({ "name": "{{item}}" }))
                    .with_assertion(AssertionSpec::status(201))
                    .with_assertion(AssertionSpec::response_time(800))
                    .with_extraction(ExtractionRule::body("id", "id")),
            );
        let text = KarateConverter::new().from_collection(&collection).to_feature_text();
        let expected = "\
Feature: native

  Background:
    * url '#(base)'

  Scenario: create
    Given path '/items'
    And param dry = 'true'
    And request
      \"\"\"
      {
        \"name\": \"#(item)\"
      }
      \"\"\"
    When method post
    Then status 201
    And assert responseTime <= 800
    And def id = response.id
";
        assert_eq!(text, expected);
    }
}
