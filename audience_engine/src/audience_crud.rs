// Audience lifecycle management.
//
// `AudienceManager` is the entry point for everything that changes an
// audience inside one profile-service scope:
// 1. create_or_update  -> metadata (description, owner, group operation)
// 2. add_rules         -> validated rule composition, optional compile
// 3. clear_rules       -> empties the list and unlocks Mix
// 4. delete_audience   -> permanent removal, no tombstone
// 5. start_compilation -> manual compile trigger
// 6. export_*          -> XML documents for the bulk importer
//
// Every successful mutation appends to the change audit trail.
//
// Group operation on update:
// - Mix is sticky; a requested mode is ignored while the audience is in Mix
// - Otherwise the mode changes only when it differs from the current one

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audience_metadata::{name_key, Audience, AudienceId, GroupOperation};
use crate::audit_record::{AuditRecord, AuditTrail, ChangeKind};
use crate::compile::CompileTrigger;
use crate::config::EngineConfig;
use crate::directory::AudienceDirectory;
use crate::error::{AudienceError, Result};
use crate::rule_builder::{AddRulesOptions, RuleBuilder};
use crate::rule_grammar::RuleSpec;
use crate::rule_serializer::{ExportMode, RuleXml};
use crate::scope::{ScopeLocator, ScopeResolver};

// ============================================================================
// Core Types
// ============================================================================

/// Metadata supplied to `create_or_update`.
///
/// `None` leaves a property untouched on update. An empty owner clears
/// ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceProperties {
    pub description: Option<String>,
    pub owner: Option<String>,
    pub group_operation: Option<GroupOperation>,
}

impl AudienceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group_operation(mut self, group_operation: GroupOperation) -> Self {
        self.group_operation = Some(group_operation);
        self
    }
}

/// Which branch `create_or_update` took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn is_update(&self) -> bool {
        matches!(self, UpsertOutcome::Updated)
    }
}

// ============================================================================
// Audience Manager
// ============================================================================

pub struct AudienceManager {
    directory: Arc<dyn AudienceDirectory>,
    trigger: Arc<dyn CompileTrigger>,
    config: EngineConfig,
    audit: Mutex<AuditTrail>,
}

impl AudienceManager {
    pub fn new(
        directory: Arc<dyn AudienceDirectory>,
        trigger: Arc<dyn CompileTrigger>,
        config: EngineConfig,
    ) -> Self {
        let audit = Mutex::new(AuditTrail::new(config.audit_capacity));
        Self {
            directory,
            trigger,
            config,
            audit,
        }
    }

    /// Manager bound to the directory a locator resolves to.
    pub fn for_scope(
        resolver: &dyn ScopeResolver,
        locator: &ScopeLocator,
        trigger: Arc<dyn CompileTrigger>,
        config: EngineConfig,
    ) -> Result<Self> {
        let directory = resolver.resolve(locator)?;
        log::info!("audience manager bound to {}", locator);
        Ok(Self::new(directory, trigger, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// `add_rules` options seeded from the engine configuration.
    pub fn default_options(&self) -> AddRulesOptions {
        AddRulesOptions::new()
            .append_op(self.config.default_append_op)
            .compile(self.config.compile_after_add)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates the audience, or updates it in place when `allow_update` is set.
    pub fn create_or_update(
        &self,
        name: &str,
        properties: &AudienceProperties,
        allow_update: bool,
    ) -> Result<(Audience, UpsertOutcome)> {
        match self.directory.find_by_name(name) {
            None => self.create(name, properties).map(|a| (a, UpsertOutcome::Created)),
            Some(_) if !allow_update => Err(AudienceError::AlreadyExists(name.to_string())),
            Some(existing) => self
                .update(existing, properties)
                .map(|a| (a, UpsertOutcome::Updated)),
        }
    }

    fn create(&self, name: &str, properties: &AudienceProperties) -> Result<Audience> {
        let group_operation = properties.group_operation.unwrap_or(GroupOperation::Any);
        let mut audience = self.directory.create(name, group_operation)?;

        let mut touched = false;
        if let Some(description) = &properties.description {
            audience.set_description(description.as_str());
            touched = true;
        }
        if let Some(owner) = &properties.owner {
            audience.set_owner(owner);
            touched = true;
        }
        if touched {
            self.directory.save(&audience)?;
        }

        log::info!(
            "created audience '{}' ({}, group operation {})",
            audience.name(),
            audience.id(),
            audience.group_operation()
        );
        self.audit(&audience, ChangeKind::Created);
        Ok(self.refreshed(audience))
    }

    fn update(&self, mut audience: Audience, properties: &AudienceProperties) -> Result<Audience> {
        if let Some(description) = &properties.description {
            audience.set_description(description.as_str());
        }
        if let Some(owner) = &properties.owner {
            audience.set_owner(owner);
        }
        if let Some(requested) = properties.group_operation {
            if audience.group_operation().is_mix() {
                log::debug!(
                    "audience '{}' is in Mix; ignoring requested group operation {}",
                    audience.name(),
                    requested
                );
            } else {
                audience.set_group_operation(requested)?;
            }
        }

        self.directory.save(&audience)?;
        log::info!("updated audience '{}' ({})", audience.name(), audience.id());
        self.audit(&audience, ChangeKind::Updated);
        Ok(self.refreshed(audience))
    }

    pub fn get_audience(&self, name: &str) -> Result<Audience> {
        self.directory
            .find_by_name(name)
            .ok_or_else(|| AudienceError::AudienceNotFound(name.to_string()))
    }

    pub fn get_audience_by_id(&self, id: AudienceId) -> Result<Audience> {
        self.directory
            .find_by_id(id)
            .ok_or_else(|| AudienceError::AudienceNotFound(id.canonical()))
    }

    /// All audiences in the scope, sorted by name ignoring case.
    pub fn list_audiences(&self) -> Vec<Audience> {
        let mut audiences = self.directory.list();
        audiences.sort_by_cached_key(|a| name_key(a.name()));
        audiences
    }

    /// Permanently deletes an audience and returns the id it had.
    pub fn delete_audience(&self, name: &str) -> Result<AudienceId> {
        let audience = self.get_audience(name)?;
        if !self.directory.delete(audience.id())? {
            return Err(AudienceError::AudienceNotFound(name.to_string()));
        }

        log::info!("deleted audience '{}' ({})", audience.name(), audience.id());
        self.audit(&audience, ChangeKind::Deleted);
        Ok(audience.id())
    }

    // ========================================================================
    // Rules
    // ========================================================================

    /// Validates `incoming` and appends it to the audience's rule list.
    ///
    /// Nothing is written unless the whole batch is valid.
    pub fn add_rules(&self, name: &str, incoming: &[RuleSpec], options: &AddRulesOptions) -> Result<Audience> {
        let mut audience = self.get_audience(name)?;
        let rules = RuleBuilder::build(audience.rules(), incoming, options)?;

        audience.replace_rules(rules);
        self.directory.save(&audience)?;
        log::debug!(
            "audience '{}' now has {} rules (group operation {})",
            audience.name(),
            audience.rules().len(),
            audience.group_operation()
        );
        self.audit(&audience, ChangeKind::RulesAdded { count: incoming.len() });

        if options.compile {
            self.request_compile(&audience, self.config.full_compile);
        }
        Ok(self.refreshed(audience))
    }

    /// Empties the rule list. An audience in Mix is unlocked back to Any.
    pub fn clear_rules(&self, name: &str) -> Result<Audience> {
        let mut audience = self.get_audience(name)?;
        let unlocked = audience.clear_rules();
        self.directory.save(&audience)?;

        if unlocked {
            log::info!("cleared rules of '{}' and unlocked Mix", audience.name());
        } else {
            log::debug!("cleared rules of '{}'", audience.name());
        }
        self.audit(&audience, ChangeKind::RulesCleared { unlocked });
        Ok(self.refreshed(audience))
    }

    pub fn start_compilation(&self, name: &str, full: bool) -> Result<()> {
        let audience = self.get_audience(name)?;
        self.request_compile(&audience, full);
        Ok(())
    }

    fn request_compile(&self, audience: &Audience, full: bool) {
        self.trigger.run_compile(audience.id(), true, full, audience.name());
        self.audit(audience, ChangeKind::CompileRequested { full });
    }

    // ========================================================================
    // Export
    // ========================================================================

    pub fn export_audience(&self, name: &str, mode: ExportMode) -> Result<String> {
        let audience = self.get_audience(name)?;
        RuleXml::export_audience(&audience, mode)
    }

    /// Whole-scope `<Audiences>` document, sorted by name.
    pub fn export_all(&self, mode: ExportMode) -> Result<String> {
        let audiences = self.list_audiences();
        RuleXml::export_audiences(audiences.iter(), mode)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().records().cloned().collect()
    }

    pub fn audit_records_for(&self, id: AudienceId) -> Vec<AuditRecord> {
        self.audit.lock().records_for(id).into_iter().cloned().collect()
    }

    pub fn verify_audit_chain(&self) -> bool {
        self.audit.lock().verify_chain()
    }

    fn audit(&self, audience: &Audience, change: ChangeKind) {
        self.audit
            .lock()
            .record(audience.id(), audience.name(), change, audience.rules());
    }

    /// Re-reads an audience so host-stamped fields are current.
    fn refreshed(&self, audience: Audience) -> Audience {
        self.directory.find_by_id(audience.id()).unwrap_or(audience)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::RecordingCompileTrigger;
    use crate::directory::InMemoryDirectory;
    use crate::rule_grammar::{Connective, Operator, RuleComponent};

    fn setup() -> (AudienceManager, Arc<RecordingCompileTrigger>) {
        let trigger = Arc::new(RecordingCompileTrigger::new());
        let manager = AudienceManager::new(
            Arc::new(InMemoryDirectory::new()),
            trigger.clone(),
            EngineConfig::default(),
        );
        (manager, trigger)
    }

    fn sales() -> RuleSpec {
        RuleSpec::new(Some("Department"), "Contains", Some("Sales"))
    }

    fn execs() -> RuleSpec {
        RuleSpec::new(None, "Member Of", Some("Execs"))
    }

    #[test]
    fn test_create_defaults_to_any() {
        let (manager, _) = setup();
        let props = AudienceProperties::new().description("Human resources").owner("CONTOSO\\jane");
        let (audience, outcome) = manager.create_or_update("HR", &props, false).unwrap();

        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(audience.group_operation(), GroupOperation::Any);
        assert_eq!(audience.description(), "Human resources");
        assert_eq!(audience.owner(), Some("CONTOSO\\jane"));
        assert!(audience.rules().is_empty());
    }

    #[test]
    fn test_create_with_explicit_mode() {
        let (manager, _) = setup();
        let props = AudienceProperties::new().group_operation(GroupOperation::All);
        let (audience, _) = manager.create_or_update("IT", &props, false).unwrap();
        assert_eq!(audience.group_operation(), GroupOperation::All);
    }

    #[test]
    fn test_existing_name_without_update_fails() {
        let (manager, _) = setup();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();

        let err = manager
            .create_or_update("hr", &AudienceProperties::new(), false)
            .unwrap_err();
        assert_eq!(err, AudienceError::AlreadyExists("hr".to_string()));
    }

    #[test]
    fn test_update_in_place_and_clear_owner() {
        let (manager, _) = setup();
        let (created, _) = manager
            .create_or_update("HR", &AudienceProperties::new().owner("CONTOSO\\jane"), false)
            .unwrap();

        let props = AudienceProperties::new()
            .description("People team")
            .owner("")
            .group_operation(GroupOperation::All);
        let (updated, outcome) = manager.create_or_update("HR", &props, true).unwrap();

        assert!(outcome.is_update());
        assert_eq!(updated.id(), created.id());
        assert_eq!(updated.description(), "People team");
        assert_eq!(updated.owner(), None);
        assert_eq!(updated.group_operation(), GroupOperation::All);
        assert!(updated.compile_state().last_property_update().is_some());
    }

    #[test]
    fn test_hr_grouped_or_append() {
        let (manager, _) = setup();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();

        let options = AddRulesOptions::new().group_existing(true).append_op(Connective::Or);
        let audience = manager.add_rules("HR", &[execs()], &options).unwrap();

        assert_eq!(
            audience.rules(),
            &[
                RuleComponent::open(),
                RuleComponent::comparison("Department", Operator::Contains, "Sales"),
                RuleComponent::close(),
                RuleComponent::or(),
                RuleComponent::member_of("Execs"),
            ]
        );
        assert_eq!(audience.group_operation(), GroupOperation::Mix);
    }

    #[test]
    fn test_empty_batch_leaves_rules_unchanged() {
        let (manager, _) = setup();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        let before = manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();
        let audit_len = manager.audit_records().len();

        let err = manager.add_rules("HR", &[], &AddRulesOptions::default()).unwrap_err();
        assert_eq!(err, AudienceError::EmptyRuleSet);

        let after = manager.get_audience("HR").unwrap();
        assert_eq!(after.rules(), before.rules());
        assert_eq!(manager.audit_records().len(), audit_len);
    }

    #[test]
    fn test_invalid_batch_is_not_applied() {
        let (manager, _) = setup();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();

        let batch = vec![execs(), RuleSpec::new(Some("Title"), "=", None)];
        let err = manager.add_rules("HR", &batch, &AddRulesOptions::default()).unwrap_err();
        assert!(err.is_grammar_error());
        assert_eq!(manager.get_audience("HR").unwrap().rules().len(), 1);
    }

    #[test]
    fn test_add_rules_to_missing_audience() {
        let (manager, _) = setup();
        let err = manager.add_rules("Ghost", &[sales()], &AddRulesOptions::default()).unwrap_err();
        assert_eq!(err, AudienceError::AudienceNotFound("Ghost".to_string()));
    }

    #[test]
    fn test_mix_survives_updates_until_cleared() {
        let (manager, _) = setup();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();
        let options = AddRulesOptions::new().group_existing(true);
        manager.add_rules("HR", &[execs()], &options).unwrap();

        for requested in [GroupOperation::Any, GroupOperation::All, GroupOperation::None] {
            let props = AudienceProperties::new().group_operation(requested);
            let (audience, _) = manager.create_or_update("HR", &props, true).unwrap();
            assert_eq!(audience.group_operation(), GroupOperation::Mix);
        }

        let cleared = manager.clear_rules("HR").unwrap();
        assert!(cleared.rules().is_empty());
        assert_eq!(cleared.group_operation(), GroupOperation::Any);

        let props = AudienceProperties::new().group_operation(GroupOperation::All);
        let (audience, _) = manager.create_or_update("HR", &props, true).unwrap();
        assert_eq!(audience.group_operation(), GroupOperation::All);
    }

    #[test]
    fn test_compile_is_triggered_on_request() {
        let (manager, trigger) = setup();
        let (audience, _) = manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();

        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();
        assert!(trigger.requests().is_empty());

        manager
            .add_rules("HR", &[execs()], &AddRulesOptions::new().compile(true))
            .unwrap();
        manager.start_compilation("HR", false).unwrap();

        let requests = trigger.take();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].audience_id, audience.id());
        assert!(requests[0].start && requests[0].full);
        assert!(!requests[1].full);
    }

    #[test]
    fn test_default_options_follow_config() {
        let config = EngineConfig {
            default_append_op: Connective::Or,
            compile_after_add: true,
            ..EngineConfig::default()
        };
        let manager = AudienceManager::new(
            Arc::new(InMemoryDirectory::new()),
            Arc::new(RecordingCompileTrigger::new()),
            config,
        );
        let options = manager.default_options();
        assert_eq!(options.append_op, Connective::Or);
        assert!(options.compile);
    }

    #[test]
    fn test_list_is_sorted_and_delete_is_permanent() {
        let (manager, _) = setup();
        for name in ["marketing", "HR", "IT"] {
            manager.create_or_update(name, &AudienceProperties::new(), false).unwrap();
        }
        let names: Vec<String> = manager
            .list_audiences()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["HR", "IT", "marketing"]);

        let old_id = manager.delete_audience("hr").unwrap();
        assert!(manager.get_audience_by_id(old_id).is_err());
        assert!(matches!(
            manager.delete_audience("HR"),
            Err(AudienceError::AudienceNotFound(_))
        ));

        let (recreated, outcome) = manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_ne!(recreated.id(), old_id);
    }

    #[test]
    fn test_export_all_contains_every_audience() {
        let (manager, _) = setup();
        manager.create_or_update("IT", &AudienceProperties::new(), false).unwrap();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();

        let xml = manager.export_all(ExportMode::Explicit).unwrap();
        let records = RuleXml::parse_audiences(&xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "HR");
        assert_eq!(records[0].rules, vec![sales()]);
        assert!(records[1].rules.is_empty());
    }

    #[test]
    fn test_every_mutation_is_audited() {
        let (manager, _) = setup();
        let (audience, _) = manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        manager.add_rules("HR", &[sales()], &AddRulesOptions::default()).unwrap();
        manager.clear_rules("HR").unwrap();
        manager.delete_audience("HR").unwrap();

        let changes: Vec<ChangeKind> = manager
            .audit_records_for(audience.id())
            .into_iter()
            .map(|r| r.change)
            .collect();
        assert_eq!(
            changes,
            vec![
                ChangeKind::Created,
                ChangeKind::RulesAdded { count: 1 },
                ChangeKind::RulesCleared { unlocked: false },
                ChangeKind::Deleted,
            ]
        );
        assert!(manager.verify_audit_chain());
    }

    #[test]
    fn test_for_scope_resolves_directory() {
        use crate::scope::ScopeRegistry;

        let registry = ScopeRegistry::new();
        let directory = Arc::new(InMemoryDirectory::new());
        registry.register(ScopeLocator::service_application("UPA"), directory.clone());

        let manager = AudienceManager::for_scope(
            &registry,
            &ScopeLocator::service_application("UPA"),
            Arc::new(RecordingCompileTrigger::new()),
            EngineConfig::default(),
        )
        .unwrap();
        manager.create_or_update("HR", &AudienceProperties::new(), false).unwrap();
        assert_eq!(directory.len(), 1);

        let missing = AudienceManager::for_scope(
            &registry,
            &ScopeLocator::service_application("Other"),
            Arc::new(RecordingCompileTrigger::new()),
            EngineConfig::default(),
        );
        assert!(matches!(missing, Err(AudienceError::ScopeNotFound(_))));
    }
}
