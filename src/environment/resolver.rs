use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::ScopeStack;
use crate::error::ResolveError;

/// Maximum number of nested expansions before resolution gives up.
pub const MAX_RESOLVE_DEPTH: usize = 5;

/// `{{name}}` or `{{name.path.0}}`, with optional inner whitespace.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("token pattern is valid")
});

/// Names of all tokens in `template`, in order of appearance, deduplicated.
pub fn tokens(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in TOKEN.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

pub fn has_tokens(template: &str) -> bool {
    TOKEN.is_match(template)
}

/// Substitutes `{{tokens}}` using a [`ScopeStack`].
///
/// Substituted values are themselves resolved, up to a fixed depth, so a
/// variable may reference another. Non-string values are rendered as compact
/// JSON. Dotted tokens walk into objects and arrays of the root variable.
#[derive(Debug, Clone, Copy)]
pub struct VariableResolver {
    max_depth: usize,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self {
            max_depth: MAX_RESOLVE_DEPTH,
        }
    }
}

impl VariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Resolve every token in `template`. Literal text is left untouched.
    pub fn resolve(&self, template: &str, scopes: &ScopeStack) -> Result<String, ResolveError> {
        let mut unresolved = Vec::new();
        let resolved = self.expand(template, scopes, 0, &mut unresolved)?;
        if unresolved.is_empty() {
            Ok(resolved)
        } else {
            Err(ResolveError::Unresolved { names: unresolved })
        }
    }

    /// Resolve each value of a string map. Keys are never rewritten.
    pub fn resolve_all<'a, I>(
        &self,
        entries: I,
        scopes: &ScopeStack,
    ) -> Result<Vec<(String, String)>, ResolveError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut unresolved = Vec::new();
        let mut out = Vec::new();
        for (key, value) in entries {
            let value = self.expand(value, scopes, 0, &mut unresolved)?;
            out.push((key.clone(), value));
        }
        if unresolved.is_empty() {
            Ok(out)
        } else {
            Err(ResolveError::Unresolved { names: unresolved })
        }
    }

    /// Resolve every string leaf of a JSON document. Object keys and
    /// non-string scalars are preserved.
    pub fn resolve_value(&self, value: &Value, scopes: &ScopeStack) -> Result<Value, ResolveError> {
        let mut unresolved = Vec::new();
        let resolved = self.expand_value(value, scopes, &mut unresolved)?;
        if unresolved.is_empty() {
            Ok(resolved)
        } else {
            Err(ResolveError::Unresolved { names: unresolved })
        }
    }

    fn expand_value(
        &self,
        value: &Value,
        scopes: &ScopeStack,
        unresolved: &mut Vec<String>,
    ) -> Result<Value, ResolveError> {
        Ok(match value {
            Value::String(text) => Value::String(self.expand(text, scopes, 0, unresolved)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand_value(item, scopes, unresolved))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => {
                let mut out = serde_json::Map::with_capacity(fields.len());
                for (key, item) in fields {
                    out.insert(key.clone(), self.expand_value(item, scopes, unresolved)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    fn expand(
        &self,
        template: &str,
        scopes: &ScopeStack,
        depth: usize,
        unresolved: &mut Vec<String>,
    ) -> Result<String, ResolveError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in TOKEN.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = name.as_str();
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            let Some(value) = lookup_path(name, scopes) else {
                if !unresolved.iter().any(|n| n == name) {
                    unresolved.push(name.to_string());
                }
                out.push_str(whole.as_str());
                continue;
            };

            let text = render(value);
            if has_tokens(&text) {
                if depth + 1 > self.max_depth {
                    return Err(ResolveError::TooDeep {
                        name: name.to_string(),
                        limit: self.max_depth,
                    });
                }
                out.push_str(&self.expand(&text, scopes, depth + 1, unresolved)?);
            } else {
                out.push_str(&text);
            }
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// Look up `root.seg.seg`: the root in the scope stack, the rest inside it.
fn lookup_path<'s>(name: &str, scopes: &'s ScopeStack) -> Option<&'s Value> {
    let mut segments = name.split('.');
    let root = segments.next()?;
    let mut current = scopes.get(root)?;
    for segment in segments {
        current = match current {
            Value::Object(fields) => fields.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Gathers unresolved names across several independent resolutions so a
/// request reports every missing variable at once. `TooDeep` still
/// short-circuits.
#[derive(Debug, Default)]
pub struct UnresolvedCollector {
    names: Vec<String>,
}

impl UnresolvedCollector {
    pub fn take<T: Default>(&mut self, result: Result<T, ResolveError>) -> Result<T, ResolveError> {
        match result {
            Ok(value) => Ok(value),
            Err(ResolveError::Unresolved { names }) => {
                for name in names {
                    if !self.names.contains(&name) {
                        self.names.push(name);
                    }
                }
                Ok(T::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn finish(self) -> Result<(), ResolveError> {
        if self.names.is_empty() {
            Ok(())
        } else {
            Err(ResolveError::Unresolved { names: self.names })
        }
    }
}
