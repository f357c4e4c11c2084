//! Identifier remap table.
//!
//! Audience ids are assigned by the host directory, so an audience that is
//! deleted and recreated comes back with a new id. Anything else that stored the old id as text is stale until
//! an external search/replace pass runs over it. This module produces the
//! table that pass consumes:
//!
//!   <Replacements>
//!     <Replacement SearchString="(?i)<old id>" ReplaceString="<new id>" />
//!   </Replacements>
//!
//! SearchString is a case-insensitive literal match on the old id's canonical
//! text; ReplaceString is the new id's canonical text.

use std::io::Cursor;
use std::path::Path;

use audience_engine::{AudienceError, AudienceId};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

use crate::error::{MigrateError, Result};

pub const REPLACEMENTS_ELEMENT: &str = "Replacements";
pub const REPLACEMENT_ELEMENT: &str = "Replacement";
pub const ATTR_SEARCH: &str = "SearchString";
pub const ATTR_REPLACE: &str = "ReplaceString";

const CASE_INSENSITIVE: &str = "(?i)";

// ================================================================================================
// ENTRY
// ================================================================================================

/// One stale id and the id that replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEntry {
    pub old: AudienceId,
    pub new: AudienceId,
}

impl RemapEntry {
    pub fn new(old: AudienceId, new: AudienceId) -> Self {
        Self { old, new }
    }

    /// Case-insensitive literal pattern for the old id.
    pub fn search_pattern(&self) -> String {
        format!("{}{}", CASE_INSENSITIVE, regex::escape(&self.old.canonical()))
    }

    pub fn replacement(&self) -> String {
        self.new.canonical()
    }

    /// Compiled search pattern, as the substitution pass will apply it.
    pub fn matcher(&self) -> Result<Regex> {
        Ok(Regex::new(&self.search_pattern())?)
    }
}

// ================================================================================================
// TABLE
// ================================================================================================

/// Remap entries in the order they were discovered, at most one per old id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    entries: Vec<RemapEntry>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `old -> new`. Identity mappings and repeated old ids are ignored.
    pub fn insert(&mut self, old: AudienceId, new: AudienceId) -> bool {
        if old == new || self.entries.iter().any(|e| e.old == old) {
            return false;
        }
        self.entries.push(RemapEntry::new(old, new));
        true
    }

    pub fn entries(&self) -> &[RemapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every entry over `text`, in table order.
    pub fn apply(&self, text: &str) -> Result<String> {
        let mut result = text.to_string();
        for entry in &self.entries {
            result = entry
                .matcher()?
                .replace_all(&result, regex::NoExpand(&entry.replacement()))
                .into_owned();
        }
        Ok(result)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(write_error)?;

        if self.entries.is_empty() {
            writer
                .write_event(Event::Empty(BytesStart::new(REPLACEMENTS_ELEMENT)))
                .map_err(write_error)?;
        } else {
            writer
                .write_event(Event::Start(BytesStart::new(REPLACEMENTS_ELEMENT)))
                .map_err(write_error)?;
            for entry in &self.entries {
                let search = entry.search_pattern();
                let replace = entry.replacement();
                let mut element = BytesStart::new(REPLACEMENT_ELEMENT);
                element.push_attribute((ATTR_SEARCH, search.as_str()));
                element.push_attribute((ATTR_REPLACE, replace.as_str()));
                writer.write_event(Event::Empty(element)).map_err(write_error)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(REPLACEMENTS_ELEMENT)))
                .map_err(write_error)?;
        }

        String::from_utf8(writer.into_inner().into_inner()).map_err(write_error)
    }

    /// Writes the remap document, creating parent directories as needed.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let xml = self.to_xml()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;
            }
        }
        std::fs::write(path, xml).map_err(|e| MigrateError::io(path, e))?;
        log::info!("wrote {} remap entries to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Reads a remap document produced by [`RemapTable::to_xml`].
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut table = RemapTable::new();
        let mut saw_root = false;

        loop {
            match reader.read_event().map_err(|e| malformed(format!("XML parse error: {e}")))? {
                Event::Start(element) | Event::Empty(element) => {
                    let local = element.local_name();
                    let name = local.as_ref();
                    if name.eq_ignore_ascii_case(REPLACEMENTS_ELEMENT.as_bytes()) {
                        saw_root = true;
                    } else if name.eq_ignore_ascii_case(REPLACEMENT_ELEMENT.as_bytes()) {
                        let entry = read_entry(&element)?;
                        table.insert(entry.old, entry.new);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(malformed(format!("no <{REPLACEMENTS_ELEMENT}> element found")));
        }
        Ok(table)
    }
}

fn read_entry(element: &BytesStart) -> Result<RemapEntry> {
    let mut search = None;
    let mut replace = None;
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| malformed(format!("bad attribute: {e}")))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| malformed(format!("bad attribute value: {e}")))?
            .into_owned();
        let key = attribute.key.as_ref();
        if key.eq_ignore_ascii_case(ATTR_SEARCH.as_bytes()) {
            search = Some(value);
        } else if key.eq_ignore_ascii_case(ATTR_REPLACE.as_bytes()) {
            replace = Some(value);
        }
    }

    let search = search.ok_or_else(|| malformed(format!("<{REPLACEMENT_ELEMENT}> without {ATTR_SEARCH}")))?;
    let replace = replace.ok_or_else(|| malformed(format!("<{REPLACEMENT_ELEMENT}> without {ATTR_REPLACE}")))?;

    // Undo the case flag and regex escaping to get back to the id text.
    let literal: String = search
        .strip_prefix(CASE_INSENSITIVE)
        .unwrap_or(&search)
        .chars()
        .filter(|c| *c != '\\')
        .collect();

    let old = AudienceId::parse(&literal).ok_or_else(|| malformed(format!("bad {ATTR_SEARCH} '{search}'")))?;
    let new = AudienceId::parse(&replace).ok_or_else(|| malformed(format!("bad {ATTR_REPLACE} '{replace}'")))?;
    Ok(RemapEntry::new(old, new))
}

fn malformed(reason: impl Into<String>) -> MigrateError {
    MigrateError::Audience(AudienceError::MalformedDocument(reason.into()))
}

fn write_error(err: impl std::fmt::Display) -> MigrateError {
    MigrateError::Audience(AudienceError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> AudienceId {
        AudienceId::parse(text).unwrap()
    }

    #[test]
    fn test_search_pattern_is_case_insensitive_literal() {
        let entry = RemapEntry::new(
            id("6f9619ff-8b86-d011-b42d-00c04fc964ff"),
            id("0e984725-c51c-4bf4-9960-e1c80e27aba0"),
        );
        let pattern = entry.search_pattern();
        assert!(pattern.starts_with("(?i)6f9619ff"));

        let matcher = entry.matcher().unwrap();
        assert!(matcher.is_match("audience=6F9619FF-8B86-D011-B42D-00C04FC964FF;"));
        assert!(!matcher.is_match("6f9619ff8b86d011b42d00c04fc964ff"));
        assert_eq!(entry.replacement(), "0e984725-c51c-4bf4-9960-e1c80e27aba0");
    }

    #[test]
    fn test_insert_skips_identity_and_duplicates() {
        let a = AudienceId::new();
        let b = AudienceId::new();
        let c = AudienceId::new();

        let mut table = RemapTable::new();
        assert!(!table.insert(a, a));
        assert!(table.insert(a, b));
        assert!(!table.insert(a, c));
        assert_eq!(table.entries(), &[RemapEntry::new(a, b)]);
    }

    #[test]
    fn test_xml_round_trip() {
        let mut table = RemapTable::new();
        table.insert(AudienceId::new(), AudienceId::new());
        table.insert(AudienceId::new(), AudienceId::new());

        let xml = table.to_xml().unwrap();
        assert!(xml.contains("<Replacements>"));
        assert!(xml.contains("SearchString=\"(?i)"));
        assert_eq!(RemapTable::from_xml(&xml).unwrap(), table);
    }

    #[test]
    fn test_empty_table_writes_empty_root() {
        let xml = RemapTable::new().to_xml().unwrap();
        assert!(xml.contains("<Replacements/>"));
        assert!(RemapTable::from_xml(&xml).unwrap().is_empty());
    }

    #[test]
    fn test_apply_rewrites_embedded_ids() {
        let old = AudienceId::new();
        let new = AudienceId::new();
        let mut table = RemapTable::new();
        table.insert(old, new);

        let config = format!("<WebPart Audience=\"{}\" />", old.canonical().to_uppercase());
        let patched = table.apply(&config).unwrap();
        assert_eq!(patched, format!("<WebPart Audience=\"{}\" />", new.canonical()));
    }

    #[test]
    fn test_from_xml_rejects_garbage() {
        assert!(RemapTable::from_xml("<Other/>").is_err());
        let bad = "<Replacements><Replacement SearchString=\"(?i)nope\" ReplaceString=\"x\"/></Replacements>";
        assert!(matches!(
            RemapTable::from_xml(bad),
            Err(MigrateError::Audience(AudienceError::MalformedDocument(_)))
        ));
    }
}
