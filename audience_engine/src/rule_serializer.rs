// XML wire form for rule lists and audiences.
//
// Shape:
//
//   <Audiences>
//     <Audience AudienceID=".." AudienceName=".." ... MemberShipCount="..">
//       <rules>
//         <rule field=".." op=".." value=".." />
//       </rules>
//     </Audience>
//   </Audiences>
//
// Rule attributes are always written in the order field, op, value.
// Explicit mode writes all three for every component, semantic mode writes
// only what the operator class uses. Semantic mode therefore drops operand
// text left on connective and grouping tokens; that loss is accepted because
// those operands never take part in evaluation.
//
// Attribute and element names are part of the wire contract.

use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::audience_metadata::{Audience, AudienceId, GroupOperation};
use crate::error::{AudienceError, Result};
use crate::rule_grammar::{OperatorClass, RuleComponent, RuleSpec};

pub const AUDIENCES_ELEMENT: &str = "Audiences";
pub const AUDIENCE_ELEMENT: &str = "Audience";
pub const RULES_ELEMENT: &str = "rules";
pub const RULE_ELEMENT: &str = "rule";

pub const ATTR_ID: &str = "AudienceID";
pub const ATTR_NAME: &str = "AudienceName";
pub const ATTR_DESCRIPTION: &str = "AudienceDescription";
pub const ATTR_OWNER: &str = "OwnerAccountName";
pub const ATTR_GROUP_OPERATION: &str = "GroupOperation";
pub const ATTR_CREATE_TIME: &str = "CreateTime";
pub const ATTR_LAST_COMPILATION: &str = "LastCompilation";
pub const ATTR_LAST_ERROR: &str = "LastError";
pub const ATTR_LAST_PROPERTY_UPDATE: &str = "LastPropertyUpdate";
pub const ATTR_LAST_RULE_UPDATE: &str = "LastRuleUpdate";
pub const ATTR_MEMBER_COUNT: &str = "MemberShipCount";

pub const ATTR_FIELD: &str = "field";
pub const ATTR_OP: &str = "op";
pub const ATTR_VALUE: &str = "value";

/// Export fidelity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Every component carries field, op and value verbatim
    #[default]
    Explicit,
    /// Only the operands the operator uses
    Semantic,
}

/// One `<Audience>` element as read from a document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudienceRecord {
    /// `AudienceID` in the source document
    pub id: Option<AudienceId>,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub group_operation: Option<GroupOperation>,
    /// Rules in document order; empty for `<rules/>`
    pub rules: Vec<RuleSpec>,
}

/// XML reader and writer for the audience wire format
pub struct RuleXml;

impl RuleXml {
    // ========================================================================
    // Export
    // ========================================================================

    /// Serializes a bare rule list as a `<rules>` element.
    pub fn export_rules(rules: &[RuleComponent], mode: ExportMode) -> Result<String> {
        let mut writer = new_writer();
        write_rules(&mut writer, rules, mode)?;
        finish(writer)
    }

    /// Serializes one audience as an `<Audience>` element.
    pub fn export_audience(audience: &Audience, mode: ExportMode) -> Result<String> {
        let mut writer = new_writer();
        write_audience(&mut writer, audience, mode)?;
        finish(writer)
    }

    /// Serializes a set of audiences under an `<Audiences>` root, in the
    /// order given.
    pub fn export_audiences<'a, I>(audiences: I, mode: ExportMode) -> Result<String>
    where
        I: IntoIterator<Item = &'a Audience>,
    {
        let mut writer = new_writer();
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(write_error)?;
        writer
            .write_event(Event::Start(BytesStart::new(AUDIENCES_ELEMENT)))
            .map_err(write_error)?;
        for audience in audiences {
            write_audience(&mut writer, audience, mode)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(AUDIENCES_ELEMENT)))
            .map_err(write_error)?;
        finish(writer)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Reads the rules of a bare `<rules>` document, in document order.
    ///
    /// Operator and operand text comes back as written. Once validated by
    /// [`crate::RuleGrammar`], operators take their canonical spelling and
    /// `Reports Under`/`Member Of` fields become `Everyone`/`DL`, so an
    /// explicit re-export reproduces the canonical `(op, field, value)`
    /// triples rather than the original bytes.
    pub fn parse_rules(xml: &str) -> Result<Vec<RuleSpec>> {
        let parsed = parse_document(xml)?;
        if !parsed.saw_loose_rules {
            return Err(malformed("no <rules> element found"));
        }
        Ok(parsed.loose_rules)
    }

    /// Reads every `<Audience>` element, in document order. A document with
    /// none yields an empty list.
    pub fn parse_audiences(xml: &str) -> Result<Vec<AudienceRecord>> {
        Ok(parse_document(xml)?.audiences)
    }
}

// ============================================================================
// Writing
// ============================================================================

fn new_writer() -> Writer<Cursor<Vec<u8>>> {
    Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2)
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> Result<String> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| AudienceError::Serialization(e.to_string()))
}

fn write_error(err: impl std::fmt::Display) -> AudienceError {
    AudienceError::Serialization(err.to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Attributes of one `<rule>`, in wire order.
fn rule_attributes(rule: &RuleComponent, mode: ExportMode) -> Vec<(&'static str, &str)> {
    let field = rule.field().unwrap_or_default();
    let op = rule.operator().as_str();
    let value = rule.value().unwrap_or_default();

    match (mode, rule.operator().class()) {
        (ExportMode::Explicit, _) | (ExportMode::Semantic, OperatorClass::Comparison) => {
            vec![(ATTR_FIELD, field), (ATTR_OP, op), (ATTR_VALUE, value)]
        }
        (ExportMode::Semantic, OperatorClass::ReportsUnder | OperatorClass::MemberOf) => {
            vec![(ATTR_OP, op), (ATTR_VALUE, value)]
        }
        (ExportMode::Semantic, OperatorClass::Connective | OperatorClass::Grouping) => {
            vec![(ATTR_OP, op)]
        }
    }
}

fn write_rules<W: std::io::Write>(writer: &mut Writer<W>, rules: &[RuleComponent], mode: ExportMode) -> Result<()> {
    if rules.is_empty() {
        writer
            .write_event(Event::Empty(BytesStart::new(RULES_ELEMENT)))
            .map_err(write_error)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(BytesStart::new(RULES_ELEMENT)))
        .map_err(write_error)?;
    for rule in rules {
        let mut element = BytesStart::new(RULE_ELEMENT);
        for attribute in rule_attributes(rule, mode) {
            element.push_attribute(attribute);
        }
        writer.write_event(Event::Empty(element)).map_err(write_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(RULES_ELEMENT)))
        .map_err(write_error)?;
    Ok(())
}

fn write_audience<W: std::io::Write>(writer: &mut Writer<W>, audience: &Audience, mode: ExportMode) -> Result<()> {
    let compile = audience.compile_state();

    let mut attributes: Vec<(&str, String)> = vec![
        (ATTR_ID, audience.id().canonical()),
        (ATTR_NAME, audience.name().to_string()),
        (ATTR_DESCRIPTION, audience.description().to_string()),
        (ATTR_OWNER, audience.owner().unwrap_or_default().to_string()),
        (ATTR_GROUP_OPERATION, audience.group_operation().wire_name().to_string()),
        (ATTR_CREATE_TIME, timestamp(audience.create_time())),
    ];
    if let Some(at) = compile.last_compilation() {
        attributes.push((ATTR_LAST_COMPILATION, timestamp(at)));
    }
    if let Some(error) = compile.last_error() {
        attributes.push((ATTR_LAST_ERROR, error.to_string()));
    }
    if let Some(at) = compile.last_property_update() {
        attributes.push((ATTR_LAST_PROPERTY_UPDATE, timestamp(at)));
    }
    if let Some(at) = compile.last_rule_update() {
        attributes.push((ATTR_LAST_RULE_UPDATE, timestamp(at)));
    }
    attributes.push((ATTR_MEMBER_COUNT, compile.member_count().to_string()));

    let mut element = BytesStart::new(AUDIENCE_ELEMENT);
    for (key, value) in &attributes {
        element.push_attribute((*key, value.as_str()));
    }

    writer.write_event(Event::Start(element)).map_err(write_error)?;
    write_rules(writer, audience.rules(), mode)?;
    writer
        .write_event(Event::End(BytesEnd::new(AUDIENCE_ELEMENT)))
        .map_err(write_error)?;
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

fn malformed(reason: impl Into<String>) -> AudienceError {
    AudienceError::MalformedDocument(reason.into())
}

#[derive(Default)]
struct ParsedDocument {
    audiences: Vec<AudienceRecord>,
    loose_rules: Vec<RuleSpec>,
    saw_loose_rules: bool,
}

/// Audience element being read
struct OpenAudience {
    record: AudienceRecord,
    saw_rules: bool,
}

impl OpenAudience {
    fn close(self) -> Result<AudienceRecord> {
        if !self.saw_rules {
            return Err(malformed(format!(
                "audience '{}' has no <{}> element",
                self.record.name, RULES_ELEMENT
            )));
        }
        Ok(self.record)
    }
}

fn element_is(name: &[u8], expected: &str) -> bool {
    name.eq_ignore_ascii_case(expected.as_bytes())
}

fn read_attributes(element: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| malformed(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| malformed(format!("bad attribute name: {e}")))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| malformed(format!("bad value for {key}: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

fn attribute<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.is_empty()).map(str::to_string)
}

fn read_audience(element: &BytesStart) -> Result<AudienceRecord> {
    let attributes = read_attributes(element)?;

    let name = attribute(&attributes, ATTR_NAME)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| malformed(format!("<{AUDIENCE_ELEMENT}> without {ATTR_NAME}")))?
        .to_string();

    let id = match attribute(&attributes, ATTR_ID).filter(|t| !t.trim().is_empty()) {
        Some(text) => Some(
            AudienceId::parse(text)
                .ok_or_else(|| malformed(format!("audience '{name}' has invalid {ATTR_ID} '{text}'")))?,
        ),
        None => None,
    };

    let group_operation = match attribute(&attributes, ATTR_GROUP_OPERATION).filter(|t| !t.trim().is_empty()) {
        Some(text) => Some(GroupOperation::parse(text).ok_or_else(|| {
            malformed(format!("audience '{name}' has invalid {ATTR_GROUP_OPERATION} '{text}'"))
        })?),
        None => None,
    };

    Ok(AudienceRecord {
        id,
        description: attribute(&attributes, ATTR_DESCRIPTION).map(str::to_string),
        owner: attribute(&attributes, ATTR_OWNER).map(str::to_string),
        group_operation,
        name,
        rules: Vec::new(),
    })
}

fn read_rule(element: &BytesStart, position: usize) -> Result<RuleSpec> {
    let attributes = read_attributes(element)?;
    let op = attribute(&attributes, ATTR_OP)
        .ok_or_else(|| malformed(format!("<{RULE_ELEMENT}> {position} without {ATTR_OP}")))?;

    Ok(RuleSpec {
        op: op.to_string(),
        field: non_empty(attribute(&attributes, ATTR_FIELD)),
        value: non_empty(attribute(&attributes, ATTR_VALUE)),
    })
}

fn parse_document(xml: &str) -> Result<ParsedDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedDocument::default();
    let mut open: Option<OpenAudience> = None;
    let mut in_rules = false;
    let mut rule_position = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("XML parse error at {}: {e}", reader.buffer_position())))?;

        let is_empty = matches!(event, Event::Empty(_));
        match &event {
            Event::Start(element) | Event::Empty(element) => {
                let local = element.local_name();
                let name = local.as_ref();

                if element_is(name, AUDIENCE_ELEMENT) {
                    if open.is_some() || in_rules {
                        return Err(malformed("nested <Audience> element"));
                    }
                    let current = OpenAudience {
                        record: read_audience(element)?,
                        saw_rules: false,
                    };
                    if is_empty {
                        parsed.audiences.push(current.close()?);
                    } else {
                        open = Some(current);
                    }
                } else if element_is(name, RULES_ELEMENT) {
                    if in_rules {
                        return Err(malformed("nested <rules> element"));
                    }
                    match open.as_mut() {
                        Some(current) if current.saw_rules => {
                            return Err(malformed(format!(
                                "audience '{}' has more than one <rules> element",
                                current.record.name
                            )));
                        }
                        Some(current) => current.saw_rules = true,
                        None => parsed.saw_loose_rules = true,
                    }
                    rule_position = 0;
                    in_rules = !is_empty;
                } else if element_is(name, RULE_ELEMENT) {
                    if !in_rules {
                        return Err(malformed("<rule> outside of <rules>"));
                    }
                    let spec = read_rule(element, rule_position)?;
                    rule_position += 1;
                    match open.as_mut() {
                        Some(current) => current.record.rules.push(spec),
                        None => parsed.loose_rules.push(spec),
                    }
                }
            }
            Event::End(element) => {
                let local = element.local_name();
                let name = local.as_ref();
                if element_is(name, RULES_ELEMENT) {
                    in_rules = false;
                } else if element_is(name, AUDIENCE_ELEMENT) {
                    if let Some(current) = open.take() {
                        parsed.audiences.push(current.close()?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if in_rules || open.is_some() {
        return Err(malformed("document ended inside an open element"));
    }
    Ok(parsed)
}
