//! Run configuration discovered from `.fiat_run_config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RUN_CONFIG_FILE: &str = ".fiat_run_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Catch failures of user functions and show them as node errors.
    pub catch_function_exceptions: bool,
    /// Disable input editors while an async invocation is in flight.
    pub disable_input_during_execution: bool,
    /// Refuse textual signature overrides.
    pub disable_type_eval: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            catch_function_exceptions: true,
            disable_input_during_execution: false,
            disable_type_eval: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

const KNOWN_KEYS: [&str; 3] = [
    "catch_function_exceptions",
    "disable_input_during_execution",
    "disable_type_eval",
];

impl RunConfig {
    /// First config file found in `start` or any of its ancestors.
    pub fn find_file(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(RUN_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load the config that applies to `start`, or the defaults when no file
    /// exists.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        match Self::find_file(start) {
            Some(path) => {
                log::info!("using run config {}", path.display());
                Self::from_file(&path)
            }
            None => {
                log::debug!("no {RUN_CONFIG_FILE} above {}, using defaults", start.display());
                Ok(RunConfig::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a config document. Unknown keys are ignored with a warning.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        if let Some(obj) = raw.as_object() {
            for key in obj.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
                log::warn!("ignoring unknown run config key {key:?}");
            }
        }
        serde_json::from_value(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = RunConfig::from_json_str(r#"{"disable_type_eval": true, "colour": 3}"#)
            .expect("parse");
        assert!(cfg.catch_function_exceptions);
        assert!(!cfg.disable_input_during_execution);
        assert!(cfg.disable_type_eval);
    }

    #[test]
    fn discovery_walks_up_to_ancestors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(
            dir.path().join(RUN_CONFIG_FILE),
            r#"{"catch_function_exceptions": false}"#,
        )
        .expect("write");

        let cfg = RunConfig::discover(&nested).expect("discover");
        assert!(!cfg.catch_function_exceptions);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(RUN_CONFIG_FILE), "{not json").expect("write");
        let err = RunConfig::discover(dir.path()).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
