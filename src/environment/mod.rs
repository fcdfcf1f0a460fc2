//! # Environments & Variables
//!
//! Named environments (dev / staging / prod), the layered scope stack a run
//! resolves against, and the `{{variable}}` resolver.
//!
//! Lookup order, highest priority first: values captured earlier in the
//! run, the selected environment, the collection, run defaults.

mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::auth::AuthMethod;

pub use resolver::{MAX_RESOLVE_DEPTH, UnresolvedCollector, VariableResolver, has_tokens, tokens};

/// Variable name to value. Ordered so resolved output is deterministic.
pub type VariableMap = BTreeMap<String, Value>;

/// Scope at which a variable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Captured,
    Environment,
    Collection,
    Default,
}

/// A single environment entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub key: String,
    pub value: Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// An environment is a named set of variables plus optional connection
/// defaults that apply to every request run against it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvironment {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Vec<EnvVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMethod>,
}

impl ApiEnvironment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set a variable, replacing an existing entry with the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.variables.iter_mut().find(|v| v.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.enabled = true;
            }
            None => self.variables.push(EnvVariable {
                key,
                value,
                enabled: true,
            }),
        }
    }

    /// Enabled variables as a map. Later entries win over earlier duplicates.
    pub fn variable_map(&self) -> VariableMap {
        self.variables
            .iter()
            .filter(|v| v.enabled && !v.key.is_empty())
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect()
    }
}

/// Environment files may list variables as entries or as a plain mapping.
fn deserialize_variables<'de, D>(deserializer: D) -> Result<Vec<EnvVariable>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        List(Vec<EnvVariable>),
        Map(BTreeMap<String, Value>),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::List(list) => list,
        Repr::Map(map) => map
            .into_iter()
            .map(|(key, value)| EnvVariable {
                key,
                value,
                enabled: true,
            })
            .collect(),
    })
}

/// The layered scopes one run resolves against.
///
/// Only the captured layer changes during a run, and only through
/// [`ScopeStack::capture`].
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    captured: VariableMap,
    environment: VariableMap,
    collection: VariableMap,
    defaults: VariableMap,
}

impl ScopeStack {
    pub fn new(defaults: VariableMap, collection: VariableMap, environment: VariableMap) -> Self {
        Self {
            captured: VariableMap::new(),
            environment,
            collection,
            defaults,
        }
    }

    pub fn capture(&mut self, name: impl Into<String>, value: Value) {
        self.captured.insert(name.into(), value);
    }

    pub fn captured(&self) -> &VariableMap {
        &self.captured
    }

    /// Find a top-level variable and the scope that supplied it.
    pub fn lookup(&self, name: &str) -> Option<(&Value, VariableScope)> {
        [
            (&self.captured, VariableScope::Captured),
            (&self.environment, VariableScope::Environment),
            (&self.collection, VariableScope::Collection),
            (&self.defaults, VariableScope::Default),
        ]
        .into_iter()
        .find_map(|(layer, scope)| layer.get(name).map(|value| (value, scope)))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.lookup(name).map(|(value, _)| value)
    }
}
