// Rule list composition.
//
// Appending to a non-empty list always inserts exactly one connective between
// the old content and the new, whether or not the old content is wrapped in
// a group first:
//
//   clear_existing          -> new
//   group_existing          -> ( old ) <op> new
//   otherwise               -> old <op> new
//
// Validation happens before composition, so a rejected batch never touches
// the stored list.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rule_grammar::{Connective, RuleComponent, RuleGrammar, RuleSpec};

/// Options for appending rules to an audience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddRulesOptions {
    /// Discard the current list first
    pub clear_existing: bool,
    /// Wrap the current list in `( ... )` before appending
    pub group_existing: bool,
    /// Connective between old and new content
    pub append_op: Connective,
    /// Trigger the compile job after persisting
    pub compile: bool,
}

impl Default for AddRulesOptions {
    fn default() -> Self {
        Self {
            clear_existing: false,
            group_existing: false,
            append_op: Connective::And,
            compile: false,
        }
    }
}

impl AddRulesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_existing(mut self, clear: bool) -> Self {
        self.clear_existing = clear;
        self
    }

    pub fn group_existing(mut self, group: bool) -> Self {
        self.group_existing = group;
        self
    }

    pub fn append_op(mut self, op: Connective) -> Self {
        self.append_op = op;
        self
    }

    pub fn compile(mut self, compile: bool) -> Self {
        self.compile = compile;
        self
    }
}

/// Builds the rule list that results from appending `incoming`.
pub struct RuleBuilder;

impl RuleBuilder {
    /// Validates `incoming` and composes the resulting list.
    ///
    /// Nothing is returned unless every incoming component is valid.
    pub fn build(existing: &[RuleComponent], incoming: &[RuleSpec], options: &AddRulesOptions) -> Result<Vec<RuleComponent>> {
        let validated = RuleGrammar::parse(incoming)?;
        Ok(Self::compose(existing, validated, options))
    }

    /// Composes already-validated components.
    pub fn compose(
        existing: &[RuleComponent],
        incoming: Vec<RuleComponent>,
        options: &AddRulesOptions,
    ) -> Vec<RuleComponent> {
        if options.clear_existing || existing.is_empty() {
            return incoming;
        }

        let wrap = usize::from(options.group_existing) * 2;
        let mut rules = Vec::with_capacity(existing.len() + wrap + 1 + incoming.len());

        if options.group_existing {
            rules.push(RuleComponent::open());
            rules.extend_from_slice(existing);
            rules.push(RuleComponent::close());
        } else {
            rules.extend_from_slice(existing);
        }
        rules.push(RuleComponent::token(options.append_op.operator()));
        rules.extend(incoming);

        log::debug!(
            "composed {} rules from {} existing (grouped: {}, joined with {})",
            rules.len(),
            existing.len(),
            options.group_existing,
            options.append_op.operator()
        );
        rules
    }
}
