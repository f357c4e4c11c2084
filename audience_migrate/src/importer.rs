//! Bulk audience import.
//!
//! Applies an `<Audiences>` document to one scope, element by element in
//! document order, and works out which audience ids went stale along the
//! way. The remap bookkeeping depends on the snapshot taken before any
//! deletion, so elements are never processed in parallel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use audience_engine::{
    name_key, AddRulesOptions, AudienceError, AudienceId, AudienceManager, AudienceProperties,
    AudienceRecord, Connective, RuleGrammar, RuleXml, UpsertOutcome,
};

use crate::config::{FailurePolicy, ImportConfig};
use crate::error::{MigrateError, Result};
use crate::remap::RemapTable;

// ================================================================================================
// REPORT
// ================================================================================================

/// Something that was skipped during a best-effort import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportWarning {
    /// Element position in the document; `None` for the pre-import delete
    pub index: Option<usize>,
    pub name: String,
    pub message: String,
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Audiences that did not exist when their element was applied
    pub created: Vec<String>,
    /// Audiences updated in place
    pub updated: Vec<String>,
    /// Audiences whose element carried an empty rule list
    pub cleared: Vec<String>,
    /// Ids removed by `delete_existing`
    pub deleted: Vec<AudienceId>,
    pub remap: RemapTable,
    pub warnings: Vec<ImportWarning>,
}

impl ImportReport {
    /// Elements applied successfully
    pub fn applied(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

// ================================================================================================
// IMPORTER
// ================================================================================================

pub struct BulkImporter {
    manager: Arc<AudienceManager>,
    config: ImportConfig,
}

impl BulkImporter {
    pub fn new(manager: Arc<AudienceManager>, config: ImportConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn import_file(&self, path: impl AsRef<Path>) -> Result<ImportReport> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
        self.import_str(&xml)
    }

    /// Imports every `<Audience>` element of `xml`.
    pub fn import_str(&self, xml: &str) -> Result<ImportReport> {
        let records = RuleXml::parse_audiences(xml)?;
        log::info!(
            "importing {} audiences (delete_existing: {}, policy: {:?})",
            records.len(),
            self.config.delete_existing,
            self.config.failure_policy
        );

        if self.config.failure_policy == FailurePolicy::FailFast {
            // Nothing may be deleted or written for a document that cannot
            // be applied in full.
            for (index, record) in records.iter().enumerate() {
                validate(record).map_err(|source| element_failed(index, record, source))?;
            }
        }

        let mut report = ImportReport::default();

        let snapshot = if self.config.delete_existing {
            self.delete_existing(&mut report)?
        } else {
            HashMap::new()
        };

        for (index, record) in records.iter().enumerate() {
            if let Err(source) = self.apply(record, &snapshot, &mut report) {
                match self.config.failure_policy {
                    FailurePolicy::FailFast => return Err(element_failed(index, record, source)),
                    FailurePolicy::BestEffort => {
                        log::warn!("skipping audience '{}' (element {}): {}", record.name, index, source);
                        report.warnings.push(ImportWarning {
                            index: Some(index),
                            name: record.name.clone(),
                            message: source.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(path) = &self.config.remap_output {
            report.remap.write_to(path)?;
        }

        log::info!(
            "import finished: {} created, {} updated, {} deleted, {} remapped, {} warnings",
            report.created.len(),
            report.updated.len(),
            report.deleted.len(),
            report.remap.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Deletes every audience in the scope and returns `name_key -> old id`.
    ///
    /// The well-known empty id is neither deleted nor remembered.
    fn delete_existing(&self, report: &mut ImportReport) -> Result<HashMap<String, AudienceId>> {
        let mut snapshot = HashMap::new();

        for audience in self.manager.list_audiences() {
            if audience.id().is_empty() {
                continue;
            }
            snapshot.insert(name_key(audience.name()), audience.id());

            match self.manager.delete_audience(audience.name()) {
                Ok(id) => report.deleted.push(id),
                Err(err) if self.config.failure_policy == FailurePolicy::BestEffort => {
                    log::warn!("could not delete audience '{}': {}", audience.name(), err);
                    report.warnings.push(ImportWarning {
                        index: None,
                        name: audience.name().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        log::info!("deleted {} existing audiences", report.deleted.len());
        Ok(snapshot)
    }

    /// Applies one element. Rules are validated before anything is written.
    fn apply(
        &self,
        record: &AudienceRecord,
        snapshot: &HashMap<String, AudienceId>,
        report: &mut ImportReport,
    ) -> std::result::Result<(), AudienceError> {
        validate(record)?;

        let properties = AudienceProperties {
            description: record.description.clone(),
            owner: record.owner.clone(),
            group_operation: record.group_operation,
        };
        let (audience, outcome) = self.manager.create_or_update(&record.name, &properties, true)?;

        if record.rules.is_empty() {
            self.manager.clear_rules(&record.name)?;
            report.cleared.push(record.name.clone());
        } else {
            let options = AddRulesOptions::new()
                .clear_existing(true)
                .group_existing(false)
                .append_op(Connective::And)
                .compile(self.config.compile_after);
            self.manager.add_rules(&record.name, &record.rules, &options)?;
        }

        let current = audience.id();
        let document_id = record.id.filter(|id| !id.is_empty());
        match outcome {
            UpsertOutcome::Updated => {
                if let Some(old) = document_id {
                    report.remap.insert(old, current);
                }
                report.updated.push(record.name.clone());
            }
            UpsertOutcome::Created => {
                // Only ids deleted by this run are stale. A document id may
                // still belong to a live audience under another name.
                if let Some(old) = snapshot.get(&name_key(&record.name)) {
                    report.remap.insert(*old, current);
                }
                report.created.push(record.name.clone());
            }
        }

        log::debug!("applied audience '{}' ({:?}, id {})", record.name, outcome, current);
        Ok(())
    }
}

fn validate(record: &AudienceRecord) -> std::result::Result<(), AudienceError> {
    if !record.rules.is_empty() {
        RuleGrammar::parse(&record.rules)?;
    }
    Ok(())
}

fn element_failed(index: usize, record: &AudienceRecord, source: AudienceError) -> MigrateError {
    MigrateError::ElementFailed {
        index,
        name: record.name.clone(),
        source,
    }
}
