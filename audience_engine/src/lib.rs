pub mod error;
pub mod rule_grammar;
pub mod audience_metadata;
pub mod rule_builder;
pub mod rule_serializer;
pub mod directory;
pub mod compile;
pub mod scope;
pub mod audit_record;
pub mod config;
pub mod audience_crud;

pub use error::{AudienceError, Result};

pub use rule_grammar::{
    Connective, Operand, OperandRule, Operator, OperatorClass, RuleComponent, RuleGrammar,
    RuleSpec, MEMBER_OF_FIELD, REPORTS_UNDER_FIELD,
};

pub use audience_metadata::{
    name_key, shape_of, Audience, AudienceId, CompileState, GroupOperation, GroupOperationState,
};

pub use rule_builder::{AddRulesOptions, RuleBuilder};

pub use rule_serializer::{
    AudienceRecord,         // Parsed <Audience> element
    ExportMode,             // Explicit or semantic fidelity
    RuleXml,                // XML reader/writer
};

pub use directory::{AudienceDirectory, InMemoryDirectory};

pub use compile::{CompileRequest, CompileTrigger, NoopCompileTrigger, RecordingCompileTrigger};

pub use scope::{ScopeLocator, ScopeRegistry, ScopeResolver};

pub use audit_record::{rules_digest, AuditRecord, AuditTrail, ChangeKind, SequenceNumber};

pub use config::EngineConfig;

pub use audience_crud::{
    AudienceManager,        // Lifecycle, rules, export
    AudienceProperties,     // create_or_update input
    UpsertOutcome,          // Created or updated
};
