use std::fmt::{self, Display};

use serde_json::Value;

/// A path into a JSON response body.
///
/// Three spellings are accepted and normalize to the same segments:
/// JSON Pointer (`/items/0/id`), JSONPath-lite (`$.items[0].id`,
/// `$['odd key']`) and plain dots (`items.0.id`). An empty path, `$` or `/`
/// address the whole body. Wildcards and filters are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key; also matches an array index when it is all digits.
    Key(String),
    Index(usize),
}

impl BodyPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "$" || raw == "/" {
            return Ok(Self::root());
        }
        if let Some(pointer) = raw.strip_prefix('/') {
            return Ok(Self {
                segments: pointer
                    .split('/')
                    .map(|part| Segment::Key(part.replace("~1", "/").replace("~0", "~")))
                    .collect(),
            });
        }
        if raw.contains("..") {
            return Err(format!("recursive descent is not supported: `{raw}`"));
        }
        let rest = raw
            .strip_prefix("$.")
            .or_else(|| raw.strip_prefix('$'))
            .unwrap_or(raw);
        parse_dotted(rest).map(|segments| Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn lookup<'v>(&self, document: &'v Value) -> Option<&'v Value> {
        let mut current = document;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(fields)) => fields.get(key)?,
                (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Render with `prefix` as the root, e.g. `$` or `response`.
    pub fn render_with_root(&self, prefix: &str) -> String {
        let mut out = prefix.to_string();
        for segment in &self.segments {
            match segment {
                Segment::Key(key) if is_plain_key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                Segment::Key(key) => {
                    out.push_str("['");
                    out.push_str(&key.replace('\'', "\\'"));
                    out.push_str("']");
                }
                Segment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

impl Display for BodyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_with_root("$"))
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_dotted(input: &str) -> Result<Vec<Segment>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    let mut key = String::new();

    let flush = |key: &mut String, segments: &mut Vec<Segment>| {
        if !key.is_empty() {
            segments.push(Segment::Key(std::mem::take(key)));
        }
    };

    while i < chars.len() {
        match chars[i] {
            '.' => {
                flush(&mut key, &mut segments);
                i += 1;
            }
            '[' => {
                flush(&mut key, &mut segments);
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| format!("unclosed `[` in path `{input}`"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                if let Some(quoted) = strip_quotes(inner) {
                    segments.push(Segment::Key(quoted.replace("\\'", "'")));
                } else if let Ok(index) = inner.parse::<usize>() {
                    segments.push(Segment::Index(index));
                } else {
                    return Err(format!("unsupported selector `[{inner}]` in path `{input}`"));
                }
                i = close + 1;
            }
            '*' | '?' | '@' => {
                return Err(format!("wildcards and filters are not supported: `{input}`"));
            }
            c => {
                key.push(c);
                i += 1;
            }
        }
    }
    flush(&mut key, &mut segments);
    Ok(segments)
}

fn strip_quotes(text: &str) -> Option<&str> {
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
}
