// demos/migration_usage.rs
//
// Moves the audiences of one environment into another, then patches a page
// configuration that still refers to the old audience ids.
//
// Run with: RUST_LOG=info cargo run --example migration_usage

use std::sync::Arc;

use audience_engine::{
    AddRulesOptions, AudienceManager, AudienceProperties, Connective, EngineConfig, ExportMode,
    InMemoryDirectory, RecordingCompileTrigger, RuleSpec,
};
use audience_migrate::{BulkImporter, ImportConfig, RemapTable};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("=== Audience Migration ===\n");

    // ========================================================================
    // Source environment
    // ========================================================================
    let staging = AudienceManager::new(
        Arc::new(InMemoryDirectory::new()),
        Arc::new(RecordingCompileTrigger::new()),
        EngineConfig::default(),
    );

    staging.create_or_update(
        "Sales Leadership",
        &AudienceProperties::new().description("Sales managers and execs"),
        false,
    )?;
    staging.add_rules(
        "Sales Leadership",
        &[RuleSpec::new(Some("Department"), "Contains", Some("Sales"))],
        &AddRulesOptions::default(),
    )?;
    staging.add_rules(
        "Sales Leadership",
        &[RuleSpec::new(None, "Member Of", Some("Execs"))],
        &AddRulesOptions::new().group_existing(true).append_op(Connective::Or),
    )?;
    staging.create_or_update("Contractors", &AudienceProperties::new(), false)?;

    let leadership = staging.get_audience("Sales Leadership")?;
    let page = format!(
        "<WebPart Title=\"Pipeline\" Audience=\"{}\" />",
        leadership.id().canonical().to_uppercase()
    );

    let exported = staging.export_all(ExportMode::Explicit)?;
    println!("Exported document:\n{}\n", exported);

    // ========================================================================
    // Target environment
    // ========================================================================
    let trigger = Arc::new(RecordingCompileTrigger::new());
    let production = Arc::new(AudienceManager::new(
        Arc::new(InMemoryDirectory::new()),
        trigger.clone(),
        EngineConfig::default(),
    ));

    let remap_path = std::env::temp_dir().join("audience_remap.xml");
    let config = ImportConfig::new()
        .delete_existing(true)
        .compile_after(true)
        .remap_output(&remap_path);

    let report = BulkImporter::new(production.clone(), config).import_str(&exported)?;
    println!("Created:  {:?}", report.created);
    println!("Updated:  {:?}", report.updated);
    println!("Cleared:  {:?}", report.cleared);
    println!("Compiles: {}", trigger.requests().len());
    for entry in report.remap.entries() {
        println!("Remap:    {} -> {}", entry.search_pattern(), entry.replacement());
    }

    // ========================================================================
    // Downstream fix-up
    // ========================================================================
    let table = RemapTable::from_xml(&std::fs::read_to_string(&remap_path)?)?;
    println!("\nBefore: {}", page);
    println!("After:  {}", table.apply(&page)?);

    for record in production.audit_records() {
        println!("  {}", record.summary());
    }

    Ok(())
}
