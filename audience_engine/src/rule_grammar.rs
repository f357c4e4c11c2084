// Fixed operator taxonomy for audience membership rules.
//
// A rule list is a flat token sequence: leaf comparisons plus the
// connectives AND/OR and the grouping tokens ( and ). Each operator decides
// which operands a component must carry:
//
//   Comparison    (=, >, >=, <, <=, <>, Contains, Not contains)  field + value
//   Reports Under                                  field fixed to "Everyone", value
//   Member Of                                      field fixed to "DL", value
//   Connective    (AND, OR)                        none
//   Grouping      ( ( , ) )                        none
//
// Operand text on connective and grouping tokens is carried untouched but
// never required; it only survives an explicit-mode export.

use serde::{Deserialize, Serialize};

use crate::error::{AudienceError, Result};

/// Field literal every `Reports Under` component carries
pub const REPORTS_UNDER_FIELD: &str = "Everyone";

/// Field literal every `Member Of` component carries
pub const MEMBER_OF_FIELD: &str = "DL";

// ============================================================================
// Operators
// ============================================================================

/// Every operator an audience rule component may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "<>")]
    NotEqual,
    #[serde(rename = "Contains")]
    Contains,
    #[serde(rename = "Not contains")]
    NotContains,
    #[serde(rename = "Reports Under")]
    ReportsUnder,
    #[serde(rename = "Member Of")]
    MemberOf,
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
    #[serde(rename = "(")]
    OpenGroup,
    #[serde(rename = ")")]
    CloseGroup,
}

impl Operator {
    /// All operators, in table order
    pub const ALL: [Operator; 14] = [
        Operator::Equal,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThan,
        Operator::LessThanOrEqual,
        Operator::NotEqual,
        Operator::Contains,
        Operator::NotContains,
        Operator::ReportsUnder,
        Operator::MemberOf,
        Operator::And,
        Operator::Or,
        Operator::OpenGroup,
        Operator::CloseGroup,
    ];

    /// Looks up an operator by its text, ignoring ASCII case.
    pub fn parse(text: &str) -> Option<Operator> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(text))
    }

    /// Canonical spelling used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::NotEqual => "<>",
            Operator::Contains => "Contains",
            Operator::NotContains => "Not contains",
            Operator::ReportsUnder => "Reports Under",
            Operator::MemberOf => "Member Of",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::OpenGroup => "(",
            Operator::CloseGroup => ")",
        }
    }

    pub fn class(&self) -> OperatorClass {
        match self {
            Operator::Equal
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual
            | Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::NotEqual
            | Operator::Contains
            | Operator::NotContains => OperatorClass::Comparison,
            Operator::ReportsUnder => OperatorClass::ReportsUnder,
            Operator::MemberOf => OperatorClass::MemberOf,
            Operator::And | Operator::Or => OperatorClass::Connective,
            Operator::OpenGroup | Operator::CloseGroup => OperatorClass::Grouping,
        }
    }

    /// What this operator demands of the left operand (the field)
    pub fn field_rule(&self) -> OperandRule {
        match self.class() {
            OperatorClass::Comparison => OperandRule::Required,
            OperatorClass::ReportsUnder => OperandRule::Fixed(REPORTS_UNDER_FIELD),
            OperatorClass::MemberOf => OperandRule::Fixed(MEMBER_OF_FIELD),
            OperatorClass::Connective | OperatorClass::Grouping => OperandRule::Forbidden,
        }
    }

    /// What this operator demands of the right operand (the value)
    pub fn value_rule(&self) -> OperandRule {
        if self.class().is_leaf() {
            OperandRule::Required
        } else {
            OperandRule::Forbidden
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator classes from the grammar table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorClass {
    Comparison,
    ReportsUnder,
    MemberOf,
    Connective,
    Grouping,
}

impl OperatorClass {
    /// Leaf classes test a principal; the others only shape the expression.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            OperatorClass::Comparison | OperatorClass::ReportsUnder | OperatorClass::MemberOf
        )
    }
}

/// Connective placed between existing rules and appended ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Connective {
    #[default]
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

impl Connective {
    pub fn operator(&self) -> Operator {
        match self {
            Connective::And => Operator::And,
            Connective::Or => Operator::Or,
        }
    }
}

/// Which side of a component an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Field,
    Value,
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Field => write!(f, "field"),
            Operand::Value => write!(f, "value"),
        }
    }
}

/// Per-operand requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRule {
    /// Caller must supply non-empty text
    Required,
    /// Always this literal, whatever the caller supplied
    Fixed(&'static str),
    /// Not required and never interpreted
    Forbidden,
}

// ============================================================================
// Rule components
// ============================================================================

/// Unvalidated operator/operand triple, as read from a document or supplied
/// by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSpec {
    pub op: String,
    pub field: Option<String>,
    pub value: Option<String>,
}

impl RuleSpec {
    pub fn new(field: Option<&str>, op: &str, value: Option<&str>) -> Self {
        Self {
            op: op.to_string(),
            field: field.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    /// Operator-only token such as `AND` or `(`
    pub fn token(op: &str) -> Self {
        Self::new(None, op, None)
    }
}

/// Validated component of an audience's rule list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleComponent {
    operator: Operator,
    field: Option<String>,
    value: Option<String>,
}

impl RuleComponent {
    /// Field/value comparison. Not validated; run caller input through
    /// [`RuleGrammar`] instead.
    pub fn comparison(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            operator,
            field: Some(field.into()),
            value: Some(value.into()),
        }
    }

    pub fn reports_under(manager: impl Into<String>) -> Self {
        Self {
            operator: Operator::ReportsUnder,
            field: Some(REPORTS_UNDER_FIELD.to_string()),
            value: Some(manager.into()),
        }
    }

    pub fn member_of(group: impl Into<String>) -> Self {
        Self {
            operator: Operator::MemberOf,
            field: Some(MEMBER_OF_FIELD.to_string()),
            value: Some(group.into()),
        }
    }

    /// Bare connective or grouping token
    pub fn token(operator: Operator) -> Self {
        Self {
            operator,
            field: None,
            value: None,
        }
    }

    pub fn and() -> Self {
        Self::token(Operator::And)
    }

    pub fn or() -> Self {
        Self::token(Operator::Or)
    }

    pub fn open() -> Self {
        Self::token(Operator::OpenGroup)
    }

    pub fn close() -> Self {
        Self::token(Operator::CloseGroup)
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.operator.class().is_leaf()
    }

    /// `(op, field, value)` view used for comparisons and serialization
    pub fn triple(&self) -> (&'static str, Option<&str>, Option<&str>) {
        (self.operator.as_str(), self.field(), self.value())
    }

    /// Back to the unvalidated form
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            op: self.operator.as_str().to_string(),
            field: self.field.clone(),
            value: self.value.clone(),
        }
    }
}

impl std::fmt::Display for RuleComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operator.class() {
            OperatorClass::Comparison => write!(
                f,
                "{} {} '{}'",
                self.field().unwrap_or_default(),
                self.operator,
                self.value().unwrap_or_default()
            ),
            OperatorClass::ReportsUnder | OperatorClass::MemberOf => {
                write!(f, "{} '{}'", self.operator, self.value().unwrap_or_default())
            }
            OperatorClass::Connective | OperatorClass::Grouping => write!(f, "{}", self.operator),
        }
    }
}

// ============================================================================
// Grammar
// ============================================================================

/// Validates rule specs against the operator table
pub struct RuleGrammar;

impl RuleGrammar {
    /// Validates a full batch of incoming components.
    ///
    /// The batch is rejected as a whole: the first invalid component aborts
    /// the parse, and a batch without a single leaf rule is an
    /// [`AudienceError::EmptyRuleSet`].
    pub fn parse(specs: &[RuleSpec]) -> Result<Vec<RuleComponent>> {
        if specs.is_empty() {
            return Err(AudienceError::EmptyRuleSet);
        }

        let components = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Self::validate(index, spec))
            .collect::<Result<Vec<_>>>()?;

        if !components.iter().any(RuleComponent::is_leaf) {
            return Err(AudienceError::EmptyRuleSet);
        }

        Ok(components)
    }

    /// Validates a single component at position `index`.
    pub fn validate(index: usize, spec: &RuleSpec) -> Result<RuleComponent> {
        let operator = Operator::parse(&spec.op).ok_or_else(|| AudienceError::InvalidOperator {
            index,
            operator: spec.op.clone(),
        })?;

        let field = Self::resolve_operand(index, operator, Operand::Field, operator.field_rule(), spec.field.as_deref())?;
        let value = Self::resolve_operand(index, operator, Operand::Value, operator.value_rule(), spec.value.as_deref())?;

        Ok(RuleComponent {
            operator,
            field,
            value,
        })
    }

    fn resolve_operand(
        index: usize,
        operator: Operator,
        operand: Operand,
        rule: OperandRule,
        supplied: Option<&str>,
    ) -> Result<Option<String>> {
        let present = supplied.filter(|text| !text.is_empty());

        match rule {
            OperandRule::Required => match present {
                Some(text) => Ok(Some(text.to_string())),
                None => Err(AudienceError::MissingOperand {
                    index,
                    operator: operator.as_str().to_string(),
                    operand,
                }),
            },
            OperandRule::Fixed(literal) => {
                if let Some(text) = present {
                    if text != literal {
                        log::warn!(
                            "rule {}: {} ignores {} '{}', using '{}'",
                            index,
                            operator,
                            operand,
                            text,
                            literal
                        );
                    }
                }
                Ok(Some(literal.to_string()))
            }
            OperandRule::Forbidden => Ok(present.map(str::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_lookup_ignores_case() {
        assert_eq!(Operator::parse("contains"), Some(Operator::Contains));
        assert_eq!(Operator::parse("NOT CONTAINS"), Some(Operator::NotContains));
        assert_eq!(Operator::parse("reports under"), Some(Operator::ReportsUnder));
        assert_eq!(Operator::parse("member of"), Some(Operator::MemberOf));
        assert_eq!(Operator::parse("and"), Some(Operator::And));
        assert_eq!(Operator::parse("<>"), Some(Operator::NotEqual));
        assert_eq!(Operator::parse("!="), None);
        assert_eq!(Operator::parse("Like"), None);
    }

    #[test]
    fn every_operator_round_trips_through_its_spelling() {
        for op in Operator::ALL {
            assert_eq!(Operator::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn unknown_operator_is_reported_with_its_position() {
        let specs = vec![
            RuleSpec::new(Some("Department"), "=", Some("HR")),
            RuleSpec::new(Some("Department"), "Like", Some("H%")),
        ];
        let err = RuleGrammar::parse(&specs).unwrap_err();
        assert_eq!(
            err,
            AudienceError::InvalidOperator {
                index: 1,
                operator: "Like".to_string()
            }
        );
    }

    #[test]
    fn comparison_needs_value() {
        for op in Operator::ALL.iter().filter(|op| op.class() == OperatorClass::Comparison) {
            let missing = RuleSpec::new(Some("Title"), op.as_str(), None);
            let err = RuleGrammar::validate(0, &missing).unwrap_err();
            assert!(matches!(
                err,
                AudienceError::MissingOperand { operand: Operand::Value, .. }
            ));

            let present = RuleSpec::new(Some("Title"), op.as_str(), Some("Manager"));
            assert!(RuleGrammar::validate(0, &present).is_ok());
        }
    }

    #[test]
    fn comparison_needs_field() {
        let spec = RuleSpec::new(None, "Contains", Some("Sales"));
        let err = RuleGrammar::validate(3, &spec).unwrap_err();
        assert_eq!(
            err,
            AudienceError::MissingOperand {
                index: 3,
                operator: "Contains".to_string(),
                operand: Operand::Field,
            }
        );
    }

    #[test]
    fn empty_text_counts_as_missing() {
        let spec = RuleSpec::new(Some("Department"), "=", Some(""));
        assert!(RuleGrammar::validate(0, &spec).is_err());
    }

    #[test]
    fn connectives_and_groups_never_need_operands() {
        for op in ["AND", "OR", "(", ")"] {
            let component = RuleGrammar::validate(0, &RuleSpec::token(op)).unwrap();
            assert_eq!(component.field(), None);
            assert_eq!(component.value(), None);
        }
    }

    #[test]
    fn operand_text_on_tokens_is_carried() {
        let spec = RuleSpec::new(Some("leftover"), "AND", Some("junk"));
        let component = RuleGrammar::validate(0, &spec).unwrap();
        assert_eq!(component.triple(), ("AND", Some("leftover"), Some("junk")));
    }

    #[test]
    fn fixed_fields_are_filled_in() {
        let reports = RuleGrammar::validate(0, &RuleSpec::new(None, "Reports Under", Some("contoso\\ceo"))).unwrap();
        assert_eq!(reports.field(), Some(REPORTS_UNDER_FIELD));

        let member = RuleGrammar::validate(0, &RuleSpec::new(Some("Group"), "member of", Some("Execs"))).unwrap();
        assert_eq!(member.field(), Some(MEMBER_OF_FIELD));
        assert_eq!(member.operator(), Operator::MemberOf);
    }

    #[test]
    fn member_of_needs_value() {
        let err = RuleGrammar::validate(0, &RuleSpec::new(None, "Member Of", None)).unwrap_err();
        assert!(matches!(err, AudienceError::MissingOperand { operand: Operand::Value, .. }));
    }

    #[test]
    fn empty_batch_and_token_only_batch_are_rejected() {
        assert_eq!(RuleGrammar::parse(&[]), Err(AudienceError::EmptyRuleSet));

        let tokens = vec![RuleSpec::token("("), RuleSpec::token(")")];
        assert_eq!(RuleGrammar::parse(&tokens), Err(AudienceError::EmptyRuleSet));
    }

    #[test]
    fn unbalanced_groups_pass_validation() {
        let specs = vec![
            RuleSpec::token("("),
            RuleSpec::new(Some("Department"), "=", Some("HR")),
        ];
        let parsed = RuleGrammar::parse(&specs).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn to_spec_revalidates_to_canonical_component() {
        let raw = RuleSpec::new(Some("Group"), "member of", Some("Execs"));
        let component = RuleGrammar::validate(0, &raw).unwrap();

        let spec = component.to_spec();
        assert_eq!(spec, RuleSpec::new(Some(MEMBER_OF_FIELD), "Member Of", Some("Execs")));
        assert_eq!(RuleGrammar::validate(0, &spec).unwrap(), component);
    }

    #[test]
    fn display_reads_like_the_rule() {
        let rule = RuleComponent::comparison("Department", Operator::Contains, "Sales");
        assert_eq!(rule.to_string(), "Department Contains 'Sales'");
        assert_eq!(RuleComponent::member_of("Execs").to_string(), "Member Of 'Execs'");
        assert_eq!(RuleComponent::or().to_string(), "OR");
    }
}
