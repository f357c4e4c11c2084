// Core audience data model.
//
// An audience is a named, rule-defined group of directory principals. The
// host directory owns its identity (the id is regenerated whenever an
// audience is deleted and recreated) and its compile state; this engine owns
// the description, owner, group operation and rule list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AudienceError, Result};
use crate::rule_grammar::{OperatorClass, Operator, RuleComponent};

// ============================================================================
// Identifiers
// ============================================================================

/// Audience identifier assigned by the host directory.
///
/// The canonical text form is the lowercase hyphenated GUID; that is what
/// other exported artifacts embed and what remap tables search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AudienceId(Uuid);

impl AudienceId {
    /// Well-known empty id some directories report for their default entry
    pub const EMPTY: AudienceId = AudienceId(Uuid::nil());

    /// Creates a new random id.
    pub fn new() -> Self {
        AudienceId(Uuid::new_v4())
    }

    /// Parses braced, hyphenated, simple or URN forms.
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text.trim()).ok().map(AudienceId)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    /// Lowercase hyphenated text
    pub fn canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for AudienceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AudienceId {
    fn from(uuid: Uuid) -> Self {
        AudienceId(uuid)
    }
}

impl std::fmt::Display for AudienceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Key used for case-insensitive name uniqueness within a profile scope.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// Group operation
// ============================================================================

/// Declared combination semantics of an audience's rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupOperation {
    /// No rules
    #[default]
    None,
    /// Rules combined with OR
    Any,
    /// Rules combined with AND
    All,
    /// Hand-authored AND/OR/grouping logic
    Mix,
}

impl GroupOperation {
    /// Host enum name used on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            GroupOperation::None => "AUDIENCE_NOGROUP_OPERATION",
            GroupOperation::Any => "AUDIENCE_OR_OPERATION",
            GroupOperation::All => "AUDIENCE_AND_OPERATION",
            GroupOperation::Mix => "AUDIENCE_MIX_OPERATION",
        }
    }

    /// Accepts wire names, short names (any case) and numeric codes.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let parsed = match text.to_ascii_uppercase().as_str() {
            "AUDIENCE_NOGROUP_OPERATION" | "NONE" | "0" => GroupOperation::None,
            "AUDIENCE_OR_OPERATION" | "ANY" | "1" => GroupOperation::Any,
            "AUDIENCE_AND_OPERATION" | "ALL" | "2" => GroupOperation::All,
            "AUDIENCE_MIX_OPERATION" | "MIX" | "3" => GroupOperation::Mix,
            _ => return None,
        };
        Some(parsed)
    }

    pub fn is_mix(&self) -> bool {
        matches!(self, GroupOperation::Mix)
    }
}

impl std::fmt::Display for GroupOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupOperation::None => write!(f, "None"),
            GroupOperation::Any => write!(f, "Any"),
            GroupOperation::All => write!(f, "All"),
            GroupOperation::Mix => write!(f, "Mix"),
        }
    }
}

/// Group operation as a state machine.
///
/// States are `None`, `Any`, `All` and `Mix`. Every state may move into
/// `Mix`, but `Mix` is sticky: the only way out is the unlock transition,
/// which is staged (pending `Any` plus a mode-changed flag) and then
/// committed, and is only allowed once the rule list is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupOperationState {
    current: GroupOperation,
    pending: Option<GroupOperation>,
    mode_changed: bool,
}

impl GroupOperationState {
    pub fn new(initial: GroupOperation) -> Self {
        Self {
            current: initial,
            pending: None,
            mode_changed: false,
        }
    }

    pub fn current(&self) -> GroupOperation {
        self.current
    }

    pub fn pending(&self) -> Option<GroupOperation> {
        self.pending
    }

    pub fn mode_changed(&self) -> bool {
        self.mode_changed
    }

    /// Ordinary transition.
    ///
    /// Returns `Ok(true)` when the mode changed, `Ok(false)` when it was
    /// already `target`, and [`AudienceError::GroupOperationLocked`] when
    /// asked to leave `Mix`.
    pub fn transition(&mut self, target: GroupOperation) -> Result<bool> {
        if self.current == target {
            return Ok(false);
        }
        if self.current.is_mix() {
            return Err(AudienceError::GroupOperationLocked {
                current: self.current.to_string(),
            });
        }
        self.current = target;
        Ok(true)
    }

    /// Stages the `Mix -> Any` unlock. `rules_empty` must hold.
    pub fn stage_unlock(&mut self, rules_empty: bool) -> Result<()> {
        if !self.current.is_mix() || !rules_empty {
            return Err(AudienceError::GroupOperationLocked {
                current: self.current.to_string(),
            });
        }
        self.pending = Some(GroupOperation::Any);
        self.mode_changed = true;
        Ok(())
    }

    /// Applies a staged change. Returns the new mode if one was applied.
    pub fn commit(&mut self) -> Option<GroupOperation> {
        if !self.mode_changed {
            return None;
        }
        let next = self.pending.take()?;
        self.current = next;
        self.mode_changed = false;
        Some(next)
    }
}

/// Group operation implied by the shape of a rule list, or `None` when the
/// list does not decide (empty, or a single leaf).
pub fn shape_of(rules: &[RuleComponent]) -> Option<GroupOperation> {
    let mut has_and = false;
    let mut has_or = false;

    for rule in rules {
        match rule.operator() {
            Operator::And => has_and = true,
            Operator::Or => has_or = true,
            _ if rule.operator().class() == OperatorClass::Grouping => {
                return Some(GroupOperation::Mix)
            }
            _ => {}
        }
    }

    match (has_and, has_or) {
        (true, true) => Some(GroupOperation::Mix),
        (true, false) => Some(GroupOperation::All),
        (false, true) => Some(GroupOperation::Any),
        (false, false) => None,
    }
}

// ============================================================================
// Compile state
// ============================================================================

/// State written by the host directory and the external compile job.
///
/// The engine only reads it; directory implementations and compile jobs use
/// the `record_*` methods.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompileState {
    last_compilation: Option<DateTime<Utc>>,
    last_error: Option<String>,
    member_count: u64,
    last_rule_update: Option<DateTime<Utc>>,
    last_property_update: Option<DateTime<Utc>>,
}

impl CompileState {
    pub fn last_compilation(&self) -> Option<DateTime<Utc>> {
        self.last_compilation
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn member_count(&self) -> u64 {
        self.member_count
    }

    pub fn last_rule_update(&self) -> Option<DateTime<Utc>> {
        self.last_rule_update
    }

    pub fn last_property_update(&self) -> Option<DateTime<Utc>> {
        self.last_property_update
    }

    /// Outcome of a compile run
    pub fn record_compilation(&mut self, at: DateTime<Utc>, member_count: u64, error: Option<String>) {
        self.last_compilation = Some(at);
        self.member_count = member_count;
        self.last_error = error;
    }

    pub fn record_rule_update(&mut self, at: DateTime<Utc>) {
        self.last_rule_update = Some(at);
    }

    pub fn record_property_update(&mut self, at: DateTime<Utc>) {
        self.last_property_update = Some(at);
    }
}

// ============================================================================
// Audience
// ============================================================================

/// A named, rule-defined audience
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    id: AudienceId,
    name: String,
    description: String,
    owner: Option<String>,
    group: GroupOperationState,
    rules: Vec<RuleComponent>,
    create_time: DateTime<Utc>,
    compile_state: CompileState,
}

impl Audience {
    /// Fresh, empty audience. Used by directory implementations on create.
    pub fn new(id: AudienceId, name: impl Into<String>, group_operation: GroupOperation) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            owner: None,
            group: GroupOperationState::new(group_operation),
            rules: Vec::new(),
            create_time: Utc::now(),
            compile_state: CompileState::default(),
        }
    }

    pub fn id(&self) -> AudienceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Empty text clears ownership.
    pub fn set_owner(&mut self, owner: &str) {
        self.owner = if owner.is_empty() {
            None
        } else {
            Some(owner.to_string())
        };
    }

    pub fn group_operation(&self) -> GroupOperation {
        self.group.current()
    }

    pub fn group_state(&self) -> &GroupOperationState {
        &self.group
    }

    /// See [`GroupOperationState::transition`].
    pub fn set_group_operation(&mut self, target: GroupOperation) -> Result<bool> {
        self.group.transition(target)
    }

    pub fn rules(&self) -> &[RuleComponent] {
        &self.rules
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn compile_state(&self) -> &CompileState {
        &self.compile_state
    }

    /// Host-side access for directory implementations and compile jobs.
    pub fn compile_state_mut(&mut self) -> &mut CompileState {
        &mut self.compile_state
    }

    /// Replaces the rule list and lets its shape steer the group operation.
    ///
    /// Mixed connectives or grouping tokens move the audience into `Mix`;
    /// pure AND/OR lists select `All`/`Any` unless the audience is already in
    /// `Mix`. An empty list leaves the mode untouched (see
    /// [`Audience::clear_rules`] for the unlock).
    pub fn replace_rules(&mut self, rules: Vec<RuleComponent>) {
        let shape = shape_of(&rules);
        self.rules = rules;

        let target = match shape {
            Some(target) => target,
            None if self.rules.is_empty() => return,
            None if self.group.current() == GroupOperation::None => GroupOperation::Any,
            None => return,
        };

        if let Err(err) = self.group.transition(target) {
            log::debug!("audience '{}': keeping group operation ({})", self.name, err);
        }
    }

    /// Empties the rule list, unlocking `Mix` through its staged transition.
    ///
    /// Returns true when the unlock ran.
    pub fn clear_rules(&mut self) -> bool {
        self.rules.clear();
        if !self.group.current().is_mix() {
            return false;
        }
        // Stage and commit are both required; emptying the list alone keeps Mix.
        match self.group.stage_unlock(true) {
            Ok(()) => self.group.commit().is_some(),
            Err(_) => false,
        }
    }
}
