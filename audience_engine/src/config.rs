// Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{AudienceError, Result};
use crate::rule_grammar::Connective;
use crate::rule_serializer::ExportMode;

/// Defaults applied by [`crate::AudienceManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Connective used when callers do not choose one
    pub default_append_op: Connective,
    /// Trigger a compile after every successful `add_rules`
    pub compile_after_add: bool,
    /// Request full (not incremental) compiles
    pub full_compile: bool,
    /// Export fidelity when the caller has no preference
    pub export_mode: ExportMode,
    /// Records kept by the change audit trail
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_append_op: Connective::And,
            compile_after_add: false,
            full_compile: true,
            export_mode: ExportMode::Explicit,
            audit_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| AudienceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audit_capacity == 0 {
            return Err(AudienceError::Config(
                "audit_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
