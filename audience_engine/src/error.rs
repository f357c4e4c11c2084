// Error taxonomy for audience operations.
//
// Every variant is fatal to the operation that raised it; nothing here is
// retried internally. Grammar errors carry the zero-based position of the
// offending component so callers can point at the exact rule.

use thiserror::Error;

use crate::rule_grammar::Operand;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, AudienceError>;

/// Errors raised by the audience engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudienceError {
    #[error("Audience not found: {0}")]
    AudienceNotFound(String),

    #[error("Audience already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid audience name: '{0}'")]
    InvalidName(String),

    #[error("Invalid operator at rule {index}: '{operator}'")]
    InvalidOperator { index: usize, operator: String },

    #[error("Missing {operand} at rule {index} for operator '{operator}'")]
    MissingOperand {
        index: usize,
        operator: String,
        operand: Operand,
    },

    #[error("Empty rule set: no leaf rules supplied")]
    EmptyRuleSet,

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Group operation is locked in {current}; clear the rules to unlock it")]
    GroupOperationLocked { current: String },

    #[error("Profile scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AudienceError {
    /// True for errors produced by rule validation (before any mutation)
    pub fn is_grammar_error(&self) -> bool {
        matches!(
            self,
            AudienceError::InvalidOperator { .. }
                | AudienceError::MissingOperand { .. }
                | AudienceError::EmptyRuleSet
        )
    }
}
