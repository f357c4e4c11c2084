use std::sync::Arc;

use audience_engine::{
    AddRulesOptions, AudienceId, AudienceManager, AudienceProperties, Connective, EngineConfig,
    ExportMode, GroupOperation, InMemoryDirectory, RecordingCompileTrigger, RuleSpec, RuleXml,
};
use audience_migrate::{BulkImporter, FailurePolicy, ImportConfig, RemapTable};

fn scope() -> (Arc<AudienceManager>, Arc<RecordingCompileTrigger>) {
    let trigger = Arc::new(RecordingCompileTrigger::new());
    let manager = Arc::new(AudienceManager::new(
        Arc::new(InMemoryDirectory::new()),
        trigger.clone(),
        EngineConfig::default(),
    ));
    (manager, trigger)
}

fn seed_hr(manager: &AudienceManager) -> AudienceId {
    let props = AudienceProperties::new()
        .description("Human resources")
        .owner("CONTOSO\\jane");
    let (audience, _) = manager.create_or_update("HR", &props, false).unwrap();
    manager
        .add_rules(
            "HR",
            &[RuleSpec::new(Some("Department"), "Contains", Some("Sales"))],
            &AddRulesOptions::default(),
        )
        .unwrap();
    manager
        .add_rules(
            "HR",
            &[RuleSpec::new(None, "Member Of", Some("Execs"))],
            &AddRulesOptions::new().group_existing(true).append_op(Connective::Or),
        )
        .unwrap();
    audience.id()
}

#[test]
fn delete_and_recreate_writes_single_remap_entry() {
    let (manager, _) = scope();
    let old_id = seed_hr(&manager);
    let xml = manager.export_all(ExportMode::Explicit).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let remap_path = dir.path().join("remap").join("audiences.xml");
    let config = ImportConfig::new()
        .delete_existing(true)
        .remap_output(&remap_path);

    let report = BulkImporter::new(manager.clone(), config).import_str(&xml).unwrap();
    assert_eq!(report.deleted, vec![old_id]);
    assert_eq!(report.created, vec!["HR".to_string()]);

    let hr = manager.get_audience("HR").unwrap();
    assert_ne!(hr.id(), old_id);

    let written = std::fs::read_to_string(&remap_path).unwrap();
    let table = RemapTable::from_xml(&written).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.entries()[0].old, old_id);
    assert_eq!(table.entries()[0].new, hr.id());
    assert!(written.contains(&format!("ReplaceString=\"{}\"", hr.id().canonical())));
}

#[test]
fn import_restores_rules_and_metadata() {
    let (source, _) = scope();
    seed_hr(&source);
    let original = source.get_audience("HR").unwrap();
    let xml = source.export_all(ExportMode::Explicit).unwrap();

    let (target, _) = scope();
    let report = BulkImporter::new(target.clone(), ImportConfig::default())
        .import_str(&xml)
        .unwrap();
    assert!(report.is_clean());

    let imported = target.get_audience("HR").unwrap();
    assert_eq!(imported.rules(), original.rules());
    assert_eq!(imported.description(), "Human resources");
    assert_eq!(imported.owner(), Some("CONTOSO\\jane"));
    assert_eq!(imported.group_operation(), GroupOperation::Mix);

    // Nothing was deleted and nothing pre-existed, so no id went stale.
    assert!(report.remap.is_empty());
}

#[test]
fn explicit_round_trip_keeps_rule_triples() {
    let (manager, _) = scope();
    seed_hr(&manager);
    let exported = manager.export_audience("HR", ExportMode::Explicit).unwrap();
    let first = RuleXml::parse_audiences(&exported).unwrap();

    let (copy, _) = scope();
    BulkImporter::new(copy.clone(), ImportConfig::default())
        .import_str(&exported)
        .unwrap();
    let reexported = copy.export_audience("HR", ExportMode::Explicit).unwrap();
    let second = RuleXml::parse_audiences(&reexported).unwrap();

    assert_eq!(first[0].rules, second[0].rules);
}

#[test]
fn compile_after_triggers_each_audience_with_rules() {
    let (source, _) = scope();
    seed_hr(&source);
    source
        .create_or_update("Empty", &AudienceProperties::new(), false)
        .unwrap();
    let xml = source.export_all(ExportMode::Semantic).unwrap();

    let (target, trigger) = scope();
    let report = BulkImporter::new(target.clone(), ImportConfig::new().compile_after(true))
        .import_str(&xml)
        .unwrap();

    assert_eq!(report.cleared, vec!["Empty".to_string()]);
    let requests = trigger.take();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].audience_name, "HR");
}

#[test]
fn best_effort_import_reports_and_continues() {
    let (manager, _) = scope();
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<Audiences>
  <Audience AudienceName="Finance">
    <rules>
      <rule field="Department" op="=" value="Finance" />
    </rules>
  </Audience>
  <Audience AudienceName="Broken">
    <rules>
      <rule field="" op="Reports Under" value="" />
    </rules>
  </Audience>
  <Audience AudienceName="Nobody">
    <rules />
  </Audience>
</Audiences>"#;

    let config = ImportConfig::new().failure_policy(FailurePolicy::BestEffort);
    let report = BulkImporter::new(manager.clone(), config).import_str(xml).unwrap();

    assert_eq!(report.created, vec!["Finance".to_string(), "Nobody".to_string()]);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].name, "Broken");
    assert!(manager.get_audience("Broken").is_err());
}

#[test]
fn config_and_document_files_drive_import() {
    let (manager, _) = scope();
    seed_hr(&manager);
    let xml = manager.export_all(ExportMode::Explicit).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let remap_path = dir.path().join("remap.xml");
    let config_path = dir.path().join("import.json");
    let json = serde_json::json!({
        "delete_existing": true,
        "remap_output": remap_path,
    });
    std::fs::write(&config_path, json.to_string()).unwrap();

    let document_path = dir.path().join("audiences.xml");
    std::fs::write(&document_path, &xml).unwrap();

    let config = ImportConfig::from_json_file(&config_path).unwrap();
    let report = BulkImporter::new(manager, config).import_file(&document_path).unwrap();
    assert_eq!(report.remap.len(), 1);
    assert!(remap_path.exists());
}

#[test]
fn missing_document_file_is_an_io_error() {
    let (manager, _) = scope();
    let dir = tempfile::tempdir().unwrap();
    let err = BulkImporter::new(manager, ImportConfig::default())
        .import_file(dir.path().join("absent.xml"))
        .unwrap_err();
    assert!(matches!(err, audience_migrate::MigrateError::Io { .. }));
}
