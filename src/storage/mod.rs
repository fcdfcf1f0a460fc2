//! # Storage
//!
//! Collections, environments, feature files and run reports on disk. JSON
//! or YAML is picked by file extension; anything that is not `.yaml`/`.yml`
//! is treated as JSON.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::collections::ApiCollection;
use crate::engine::ApiTestRun;
use crate::environment::ApiEnvironment;
use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    Yaml,
}

impl Encoding {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => Encoding::Yaml,
            _ => Encoding::Json,
        }
    }
}

pub fn load_text(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_text(path: &Path, text: &str) -> Result<(), LoadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| LoadError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| LoadError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let raw = load_text(path)?;
    let parsed = match Encoding::of(path) {
        Encoding::Json => serde_json::from_str(&raw).map_err(|e| e.to_string()),
        Encoding::Yaml => serde_yaml::from_str(&raw).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| LoadError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

fn save<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), LoadError> {
    let raw = match Encoding::of(path) {
        Encoding::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        Encoding::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
    }
    .map_err(|message| LoadError::Serialize {
        what: what.to_string(),
        message,
    })?;
    save_text(path, &raw)
}

pub fn load_collection(path: &Path) -> Result<ApiCollection, LoadError> {
    load(path)
}

pub fn save_collection(path: &Path, collection: &ApiCollection) -> Result<(), LoadError> {
    save(path, collection, "collection")
}

pub fn load_environment(path: &Path) -> Result<ApiEnvironment, LoadError> {
    load(path)
}

pub fn save_environment(path: &Path, environment: &ApiEnvironment) -> Result<(), LoadError> {
    save(path, environment, "environment")
}

/// Write a finished run as a JSON (or YAML) report.
pub fn save_report(path: &Path, run: &ApiTestRun) -> Result<(), LoadError> {
    save(path, run, "run report")
}
