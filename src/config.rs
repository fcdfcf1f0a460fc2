//! # Settings
//!
//! Optional settings file for the command line. Values layer as built-in
//! defaults, then the file, then flags.
//!
//! ```yaml
//! run:
//!   failure_policy: continue-on-failure
//!   default_timeout_ms: 10000
//!   retry: { max_attempts: 3 }
//! client:
//!   verify_tls: false
//! log: info
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::RunConfig;
use crate::error::LoadError;
use crate::http::ClientConfig;
use crate::storage;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_SETTINGS_FILE: &str = "apicheck.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub run: RunConfig,
    pub client: ClientConfig,
    /// Default log filter when neither `APICHECK_LOG` nor `RUST_LOG` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl Settings {
    /// Parse a settings file. YAML is a superset of JSON, so one parser
    /// covers both.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let raw = storage::load_text(path)?;
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// `explicit` when given, else [`DEFAULT_SETTINGS_FILE`] inside `dir` if
    /// present, else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, LoadError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let candidate: PathBuf = dir.join(DEFAULT_SETTINGS_FILE);
                if candidate.is_file() {
                    Self::load(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        let retry = &self.run.retry;
        if retry.max_attempts == 0 {
            return Err(LoadError::Invalid("run.retry.max_attempts must be at least 1".into()));
        }
        if !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0) {
            return Err(LoadError::Invalid("run.retry.backoff_multiplier must be >= 1".into()));
        }
        if self.run.default_timeout_ms == 0 {
            return Err(LoadError::Invalid("run.default_timeout_ms must be positive".into()));
        }
        if self.client.max_body_bytes == 0 {
            return Err(LoadError::Invalid("client.max_body_bytes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::engine::FailurePolicy;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::discover(None, dir.path()).unwrap(), Settings::default());
    }

    #[test]
    fn discovered_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(DEFAULT_SETTINGS_FILE),
            "run:\n  failure_policy: continue-on-failure\n  retry:\n    max_attempts: 3\nclient:\n  verify_tls: false\nlog: debug\n",
        )
        .unwrap();
        let settings = Settings::discover(None, dir.path()).unwrap();
        assert_eq!(settings.run.failure_policy, FailurePolicy::ContinueOnFailure);
        assert_eq!(settings.run.retry.max_attempts, 3);
        assert!(settings.run.follow_redirects);
        assert!(!settings.client.verify_tls);
        assert_eq!(settings.log.as_deref(), Some("debug"));
    }

    #[test]
    fn rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "run:\n  retry:\n    max_attempts: 0\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(LoadError::Invalid(_))));

        fs::write(&path, "nonsense: true\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(LoadError::Parse { .. })));
    }
}
