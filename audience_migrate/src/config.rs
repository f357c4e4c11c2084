//! Import configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// What to do when one `<Audience>` element cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Validate the whole document before touching the directory, then stop
    /// at the first failing element
    #[default]
    FailFast,
    /// Skip failing elements and report them as warnings
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Delete every audience in the scope before importing
    pub delete_existing: bool,
    /// Trigger a compile for each audience that receives rules
    pub compile_after: bool,
    /// Where to write the identifier remap document
    pub remap_output: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delete_existing: false,
            compile_after: false,
            remap_output: None,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl ImportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_existing(mut self, delete: bool) -> Self {
        self.delete_existing = delete;
        self
    }

    pub fn compile_after(mut self, compile: bool) -> Self {
        self.compile_after = compile;
        self
    }

    pub fn remap_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.remap_output = Some(path.into());
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MigrateError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_config_defaults() {
        let config = ImportConfig::default();
        assert!(!config.delete_existing);
        assert!(!config.compile_after);
        assert!(config.remap_output.is_none());
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_import_config_from_json() {
        let json = serde_json::json!({
            "delete_existing": true,
            "remap_output": "out/remap.xml",
            "failure_policy": "best_effort"
        })
        .to_string();

        let config = ImportConfig::from_json(&json).unwrap();
        assert!(config.delete_existing);
        assert!(!config.compile_after);
        assert_eq!(config.remap_output, Some(PathBuf::from("out/remap.xml")));
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
    }

    #[test]
    fn test_import_config_rejects_unknown_policy() {
        let err = ImportConfig::from_json("{\"failure_policy\": \"retry\"}").unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
