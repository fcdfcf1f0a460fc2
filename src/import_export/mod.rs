//! # Import / Export
//!
//! Brings collections in from other API tools and writes them back out.
//!
//! ## Formats
//! - Postman Collection v2.0 / v2.1 and Postman environment exports
//! - OpenAPI 3.x and Swagger 2.0, JSON or YAML
//! - Native collections as JSON or YAML
//! - Karate feature text (export only; see [`crate::karate`] for import)

mod openapi;
mod postman;

use std::fmt::{self, Display};
use std::str::FromStr;

use serde_json::Value;
use tracing::warn;

use crate::collections::ApiCollection;
use crate::environment::ApiEnvironment;
use crate::error::UnsupportedFormatError;
use crate::karate::KarateConverter;

pub use openapi::import_document as import_openapi;
pub use postman::{import_collection as import_postman, import_environment as import_postman_environment};

/// Supported import source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Postman,
    PostmanEnvironment,
    OpenApi,
    Native,
}

impl ImportFormat {
    /// Guess the format from document content.
    pub fn detect(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text)
            .ok()
            .or_else(|| serde_yaml::from_str(text).ok())?;
        let object = value.as_object()?;
        if object.contains_key("openapi") || object.contains_key("swagger") {
            Some(ImportFormat::OpenApi)
        } else if object
            .get("info")
            .and_then(|info| info.get("schema"))
            .and_then(Value::as_str)
            .is_some_and(|schema| schema.contains("getpostman.com"))
        {
            Some(ImportFormat::Postman)
        } else if object.contains_key("values") && object.contains_key("name") {
            Some(ImportFormat::PostmanEnvironment)
        } else if object.contains_key("requests") && object.contains_key("name") {
            Some(ImportFormat::Native)
        } else {
            None
        }
    }
}

impl Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImportFormat::Postman => "postman",
            ImportFormat::PostmanEnvironment => "postman-env",
            ImportFormat::OpenApi => "openapi",
            ImportFormat::Native => "native",
        };
        write!(f, "{label}")
    }
}

/// What an import produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Imported {
    Collection(ApiCollection),
    Environment(ApiEnvironment),
}

/// Import `text` as `format`, or as whatever [`ImportFormat::detect`]
/// recognizes when `format` is `None`.
pub fn import(format: Option<ImportFormat>, text: &str) -> Result<Imported, UnsupportedFormatError> {
    let format = match format.or_else(|| ImportFormat::detect(text)) {
        Some(format) => format,
        None => return Err(UnsupportedFormatError::new("import", "format not recognized")),
    };
    match format {
        ImportFormat::Postman => import_postman(text).map(Imported::Collection),
        ImportFormat::PostmanEnvironment => import_postman_environment(text).map(Imported::Environment),
        ImportFormat::OpenApi => import_openapi(text).map(Imported::Collection),
        ImportFormat::Native => parse_native(text).map(Imported::Collection),
    }
}

fn parse_native(text: &str) -> Result<ApiCollection, UnsupportedFormatError> {
    serde_json::from_str::<ApiCollection>(text)
        .or_else(|_| serde_yaml::from_str::<ApiCollection>(text))
        .map_err(|err| UnsupportedFormatError::new("native collection", err.to_string()))
}

/// Supported export target formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Yaml,
    Karate,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Karate => "feature",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "karate" | "feature" => Ok(ExportFormat::Karate),
            other => Err(format!("unknown export format `{other}`")),
        }
    }
}

/// Render a collection in the given format.
pub fn export_collection(collection: &ApiCollection, format: ExportFormat) -> Result<String, String> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(collection).map_err(|e| e.to_string()),
        ExportFormat::Yaml => serde_yaml::to_string(collection).map_err(|e| e.to_string()),
        ExportFormat::Karate => {
            if collection.needs_review() {
                warn!(collection = %collection.name, "exporting a collection with unmapped steps");
            }
            Ok(KarateConverter::new().from_collection(collection).to_feature_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::ApiRequest;
    use crate::testing::AssertionSpec;

    #[test]
    fn detects_formats() {
        assert_eq!(ImportFormat::detect(r#"{"openapi": "3.1.0"}"#), Some(ImportFormat::OpenApi));
        assert_eq!(ImportFormat::detect("swagger: '2.0'\n"), Some(ImportFormat::OpenApi));
        assert_eq!(
            ImportFormat::detect(
                r#"{"info": {"schema": "https://schema.getpostman.com/json/collection/v2.1.0/collection.json"}}"#
            ),
            Some(ImportFormat::Postman)
        );
        assert_eq!(
            ImportFormat::detect(r#"{"name": "dev", "values": []}"#),
            Some(ImportFormat::PostmanEnvironment)
        );
        assert_eq!(ImportFormat::detect(r#"{"name": "c", "requests": []}"#), Some(ImportFormat::Native));
        assert_eq!(ImportFormat::detect("Feature: nope"), None);
    }

    #[test]
    fn unrecognized_input_is_rejected() {
        let err = import(None, r#"{"hello": 1}"#).unwrap_err();
        assert_eq!(err.format, "import");
    }

    #[test]
    fn native_export_reimports() {
        let collection = ApiCollection::new("smoke")
            .with_base_url("http://h")
            .with_request(ApiRequest::get("ping", "/ping").with_assertion(AssertionSpec::status(200)));
        for format in [ExportFormat::Json, ExportFormat::Yaml] {
            let text = export_collection(&collection, format).unwrap();
            let Imported::Collection(back) = import(Some(ImportFormat::Native), &text).unwrap() else {
                panic!("expected a collection");
            };
            assert_eq!(back, collection);
        }
    }

    #[test]
    fn karate_export_is_feature_text() {
        let collection = ApiCollection::new("smoke").with_request(ApiRequest::get("ping", "http://h/ping"));
        let text = export_collection(&collection, ExportFormat::Karate).unwrap();
        assert!(text.starts_with("Feature: smoke"));
        assert_eq!("yml".parse::<ExportFormat>(), Ok(ExportFormat::Yaml));
    }
}
