//! # Authentication
//!
//! Auth settings attached to a collection, an environment or a single
//! request. Credentials may contain `{{tokens}}`; they are resolved right
//! before the request is sent and turned into a header or a query pair.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::environment::{ScopeStack, VariableResolver};
use crate::error::ResolveError;

/// Supported authentication methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    ApiKey {
        key: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

/// Where to place the API key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// What a resolved auth method contributes to the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCredential {
    Header { name: String, value: String },
    Query { name: String, value: String },
}

impl AuthMethod {
    pub fn is_none(&self) -> bool {
        matches!(self, AuthMethod::None)
    }

    /// Resolve templated credentials and produce the request contribution.
    pub fn credential(
        &self,
        resolver: &VariableResolver,
        scopes: &ScopeStack,
    ) -> Result<Option<AuthCredential>, ResolveError> {
        let credential = match self {
            AuthMethod::None => None,
            AuthMethod::Bearer { token } => Some(AuthCredential::Header {
                name: "Authorization".to_string(),
                value: format!("Bearer {}", resolver.resolve(token, scopes)?),
            }),
            AuthMethod::Basic { username, password } => {
                let username = resolver.resolve(username, scopes)?;
                let password = resolver.resolve(password, scopes)?;
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Some(AuthCredential::Header {
                    name: "Authorization".to_string(),
                    value: format!("Basic {encoded}"),
                })
            }
            AuthMethod::ApiKey {
                key,
                value,
                location,
            } => {
                let name = resolver.resolve(key, scopes)?;
                let value = resolver.resolve(value, scopes)?;
                Some(match location {
                    ApiKeyLocation::Header => AuthCredential::Header { name, value },
                    ApiKeyLocation::Query => AuthCredential::Query { name, value },
                })
            }
        };
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::VariableMap;
    use serde_json::json;

    fn scopes() -> ScopeStack {
        let mut env = VariableMap::new();
        env.insert("token".into(), json!("abc123"));
        env.insert("user".into(), json!("alice"));
        ScopeStack::new(VariableMap::new(), VariableMap::new(), env)
    }

    #[test]
    fn bearer_token_is_resolved() {
        let auth = AuthMethod::Bearer {
            token: "{{token}}".into(),
        };
        let credential = auth
            .credential(&VariableResolver::new(), &scopes())
            .unwrap();
        assert_eq!(
            credential,
            Some(AuthCredential::Header {
                name: "Authorization".into(),
                value: "Bearer abc123".into(),
            })
        );
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let auth = AuthMethod::Basic {
            username: "{{user}}".into(),
            password: "secret".into(),
        };
        let credential = auth
            .credential(&VariableResolver::new(), &scopes())
            .unwrap();
        assert_eq!(
            credential,
            Some(AuthCredential::Header {
                name: "Authorization".into(),
                value: "Basic YWxpY2U6c2VjcmV0".into(),
            })
        );
    }

    #[test]
    fn api_key_in_query() {
        let auth: AuthMethod = serde_json::from_value(json!({
            "type": "api_key",
            "key": "api_key",
            "value": "{{token}}",
            "location": "query"
        }))
        .unwrap();
        let credential = auth
            .credential(&VariableResolver::new(), &scopes())
            .unwrap();
        assert_eq!(
            credential,
            Some(AuthCredential::Query {
                name: "api_key".into(),
                value: "abc123".into(),
            })
        );
    }

    #[test]
    fn unresolved_credential_is_an_error() {
        let auth = AuthMethod::Bearer {
            token: "{{missing}}".into(),
        };
        let err = auth
            .credential(&VariableResolver::new(), &scopes())
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Unresolved {
                names: vec!["missing".into()]
            }
        );
    }
}
